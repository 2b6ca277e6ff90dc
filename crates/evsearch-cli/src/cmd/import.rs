//! `evsearch import`: append raw events from a JSON-lines file.
//!
//! One [`RawEvent`] object per line; blank lines are skipped. The whole file
//! is imported in a single transaction, so a bad line leaves the store
//! untouched.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use evsearch_core::config::Config;
use evsearch_core::model::RawEvent;
use evsearch_core::source::{DataSource, SqliteDataSource};
use serde::Serialize;
use tracing::info;

use crate::output::{OutputMode, kv, render};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON-lines file of raw events.
    pub file: PathBuf,

    /// Event store to append to; created when missing.
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ImportOutput {
    db: String,
    file: String,
    imported: usize,
}

pub fn run_import(args: &ImportArgs, config: &Config, output: OutputMode) -> anyhow::Result<()> {
    let path = super::store_path(args.db.as_deref(), config);
    let events = read_events(&args.file)?;
    let source = SqliteDataSource::open(&path)?;
    let imported = import_events(&source, &events)?;
    info!(db = %path.display(), imported, "imported raw events");

    let result = ImportOutput {
        db: path.display().to_string(),
        file: args.file.display().to_string(),
        imported,
    };
    render(output, &result, |result, w| {
        kv(w, "store", &result.db)?;
        kv(w, "imported", format!("{} events from {}", result.imported, result.file))?;
        writeln!(w)
    })
}

fn read_events(path: &Path) -> anyhow::Result<Vec<RawEvent>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid raw event", path.display(), index + 1))?;
        events.push(event);
    }
    Ok(events)
}

fn import_events(source: &SqliteDataSource, events: &[RawEvent]) -> anyhow::Result<usize> {
    source.execute_in_new_transaction(&mut || -> anyhow::Result<()> {
        for event in events {
            source
                .insert_event(event)
                .with_context(|| format!("insert event {}", event.id))?;
        }
        Ok(())
    })?;
    Ok(events.len())
}
