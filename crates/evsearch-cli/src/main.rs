#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use evsearch_core::config::resolve_config;
use evsearch_core::error::{ErrorCode, classify};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "evsearch: reconcile deletion events into an ownership-enriched search table",
    long_about = None
)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ./evsearch.toml, then the user config).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run the events search task once",
        long_about = "Replay deletion, freezing and movement events after the persisted watermarks and write enriched events_search rows.",
        after_help = "EXAMPLES:\n    # Reconcile the configured store\n    evsearch run\n\n    # Small batches against a specific file\n    evsearch run --db events.sqlite3 --batch-size 100\n\n    # Emit machine-readable output\n    evsearch run --json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        about = "Show watermarks and row counts",
        after_help = "EXAMPLES:\n    # Show per event type and entity kind watermarks\n    evsearch status\n\n    # Emit machine-readable output\n    evsearch status --json"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        about = "Import raw events from a JSON-lines file",
        after_help = "EXAMPLES:\n    # Seed a new store\n    evsearch import events.jsonl --db events.sqlite3"
    )]
    Import(cmd::import::ImportArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("EVSEARCH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "evsearch=debug,evsearch_core=debug,info"
        } else {
            "evsearch=info,evsearch_core=info,warn"
        })
    });

    let format = env::var("EVSEARCH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = cli.output_mode();
    let config = match resolve_config(cli.config.as_deref(), |key| env::var(key).ok()) {
        Ok(config) => config,
        Err(err) => {
            render_error(
                output,
                &CliError::from_code(ErrorCode::ConfigParseError, format!("{err:#}")),
            )?;
            return Err(err);
        }
    };
    debug!(?config, "resolved config");

    let result = match &cli.command {
        Commands::Run(args) => cmd::run::run_run(args, &config, output),
        Commands::Status(args) => cmd::status::run_status(args, &config, output),
        Commands::Import(args) => cmd::import::run_import(args, &config, output),
    };

    if let Err(ref err) = result {
        debug!(code = %classify(err), "command failed");
    }
    result
}
