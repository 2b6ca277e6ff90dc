//! `evsearch run`: execute the maintenance task once.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;
use evsearch_core::config::{Config, TaskConfig};
use evsearch_core::error::classify;
use evsearch_core::{EventsSearchTask, RunReport};
use tracing::info;

use crate::output::{CliError, OutputMode, kv, render, render_error, section};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Event store to reconcile (defaults to the configured path).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Raw events loaded per batch.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,
}

pub fn run_run(args: &RunArgs, config: &Config, output: OutputMode) -> anyhow::Result<()> {
    let path = super::store_path(args.db.as_deref(), config);
    let report = execute(&path, args, config, output)?;
    render(output, &report, |report, w| write_report(report, &path, w))
}

fn execute(
    path: &Path,
    args: &RunArgs,
    config: &Config,
    output: OutputMode,
) -> anyhow::Result<RunReport> {
    let source = super::open_existing(path, output)?;
    let batch_size = match args.batch_size {
        Some(size) => usize::try_from(size)?,
        None => config.task.batch_size,
    };
    info!(db = %path.display(), batch_size, "running events search");

    let task = EventsSearchTask::new(TaskConfig { batch_size });
    task.execute(&source).inspect_err(|err| {
        let code = classify(err);
        let _ = render_error(output, &CliError::from_code(code, format!("{err:#}")));
    })
}

fn write_report(report: &RunReport, path: &Path, w: &mut dyn Write) -> std::io::Result<()> {
    section(w, "Events search run")?;
    kv(w, "store", path.display().to_string())?;
    kv(w, "events read", report.events_read().to_string())?;
    kv(w, "rows written", report.rows_written().to_string())?;
    kv(w, "elapsed", format!("{} ms", report.elapsed_ms))?;
    writeln!(w)?;
    writeln!(
        w,
        "{:<30} {:>8} {:>8} {:>8}",
        "PROCESSOR", "BATCHES", "EVENTS", "ROWS"
    )?;
    for processor in report.processors.iter().filter(|p| p.events_read > 0) {
        writeln!(
            w,
            "{:<30} {:>8} {:>8} {:>8}",
            processor.name, processor.batches, processor.events_read, processor.rows_written
        )?;
    }
    Ok(())
}
