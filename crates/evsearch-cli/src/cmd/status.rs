//! `evsearch status`: watermarks and row counts of an event store.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Args;
use evsearch_core::config::Config;
use evsearch_core::model::{EntityKind, EventType};
use evsearch_core::source::{SqliteDataSource, StoreSummary};
use evsearch_core::watermark::LastTimestamps;
use serde::Serialize;

use crate::output::{OutputMode, kv, render, section};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Event store to inspect (defaults to the configured path).
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Watermark {
    event_type: EventType,
    entity_kind: EntityKind,
    last_timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    db: String,
    summary: StoreSummary,
    watermarks: Vec<Watermark>,
}

pub fn run_status(args: &StatusArgs, config: &Config, output: OutputMode) -> anyhow::Result<()> {
    let path = super::store_path(args.db.as_deref(), config);
    let source = super::open_existing(&path, output)?;
    let status = collect(&source, path.display().to_string())?;
    render(output, &status, write_status)
}

fn collect(source: &SqliteDataSource, db: String) -> anyhow::Result<StatusOutput> {
    let watermarks = LastTimestamps::load(source)?
        .entries()
        .into_iter()
        .map(|(event_type, entity_kind, last_timestamp)| Watermark {
            event_type,
            entity_kind,
            last_timestamp,
        })
        .collect();
    Ok(StatusOutput {
        db,
        summary: source.summary()?,
        watermarks,
    })
}

fn write_status(status: &StatusOutput, w: &mut dyn Write) -> std::io::Result<()> {
    section(w, "Event store")?;
    kv(w, "store", &status.db)?;
    kv(w, "events", status.summary.events.to_string())?;
    kv(w, "events_search", status.summary.events_search.to_string())?;
    kv(
        w,
        "entities",
        format!(
            "{} spaces, {} projects, {} experiments, {} samples",
            status.summary.spaces,
            status.summary.projects,
            status.summary.experiments,
            status.summary.samples
        ),
    )?;
    writeln!(w)?;
    section(w, "Watermarks")?;
    if status.watermarks.is_empty() {
        writeln!(w, "(nothing reconciled yet)")?;
    }
    for mark in &status.watermarks {
        writeln!(
            w,
            "{:<10} {:<20} {}",
            mark.event_type.as_str(),
            mark.entity_kind.as_str(),
            mark.last_timestamp.to_rfc3339()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use evsearch_core::model::{NewEvent, RawEvent};
    use evsearch_core::source::DataSource;

    #[test]
    fn status_lists_persisted_watermarks() {
        let source = SqliteDataSource::open_in_memory().expect("open");
        let at = Utc.with_ymd_and_hms(2022, 5, 1, 8, 0, 0).unwrap();
        let raw = RawEvent {
            id: 3,
            event_type: EventType::Freezing,
            entity_type: EntityKind::Sample,
            identifiers: vec!["S1".into()],
            description: None,
            reason: None,
            content: None,
            attachment_content: None,
            registerer: "admin".into(),
            registration_timestamp: at,
        };
        source.insert_event(&raw).expect("seed");
        source
            .create_events_search(&NewEvent::from_raw(&raw, "S1"))
            .expect("write row");

        let status = collect(&source, ":memory:".into()).expect("collect");
        assert_eq!(status.summary.events, 1);
        assert_eq!(status.summary.events_search, 1);
        assert_eq!(status.watermarks.len(), 1);
        assert_eq!(status.watermarks[0].entity_kind, EntityKind::Sample);
        assert_eq!(status.watermarks[0].last_timestamp, at);

        let mut buf = Vec::new();
        write_status(&status, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("FREEZING"));
        assert!(text.contains("2022-05-01T08:00:00+00:00"));
    }

    #[test]
    fn empty_store_says_so() {
        let source = SqliteDataSource::open_in_memory().expect("open");
        let status = collect(&source, ":memory:".into()).expect("collect");
        let mut buf = Vec::new();
        write_status(&status, &mut buf).expect("write");
        assert!(String::from_utf8(buf).expect("utf8").contains("nothing reconciled yet"));
    }
}
