//! Maintenance task driving the processors in hierarchy order.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, info, info_span};

use crate::config::TaskConfig;
use crate::processor::{EventProcessor, ProcessorReport, RunContext, Strategy, default_pipeline};
use crate::snapshots::SnapshotsFacade;
use crate::source::DataSource;
use crate::watermark::LastTimestamps;

/// Outcome of one [`EventsSearchTask::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub processors: Vec<ProcessorReport>,
    pub elapsed_ms: u128,
}

impl RunReport {
    #[must_use]
    pub fn events_read(&self) -> usize {
        self.processors.iter().map(|p| p.events_read).sum()
    }

    #[must_use]
    pub fn rows_written(&self) -> usize {
        self.processors.iter().map(|p| p.rows_written).sum()
    }
}

/// Scheduled task that reconciles the event log into `events_search`.
#[derive(Debug, Clone)]
pub struct EventsSearchTask {
    config: TaskConfig,
    pipeline: Vec<Strategy>,
}

impl Default for EventsSearchTask {
    fn default() -> Self {
        Self::new(TaskConfig::default())
    }
}

impl EventsSearchTask {
    #[must_use]
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            pipeline: default_pipeline(),
        }
    }

    /// Apply scheduler properties. Only the batch size is read; an invalid
    /// value keeps the default.
    pub fn set_up(&mut self, properties: &HashMap<String, String>) {
        self.config = TaskConfig::from_properties(properties);
    }

    #[must_use]
    pub const fn config(&self) -> &TaskConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &[Strategy] {
        &self.pipeline
    }

    /// Run every processor to exhaustion, in pipeline order.
    ///
    /// Watermarks are read once up front; the snapshot stores live for this
    /// call only.
    ///
    /// # Errors
    ///
    /// Returns the first processor failure. Batches committed before it stay
    /// persisted; the next run resumes after them.
    pub fn execute(&self, source: &dyn DataSource) -> Result<RunReport> {
        let span = info_span!("events_search", batch_size = self.config.batch_size);
        let _guard = span.enter();
        let started = Instant::now();

        let last_timestamps = LastTimestamps::load(source).context("load watermarks")?;
        let mut snapshots = SnapshotsFacade::new();
        let mut ctx = RunContext {
            source,
            last_timestamps: &last_timestamps,
            snapshots: &mut snapshots,
            batch_size: self.config.batch_size,
        };

        let mut processors = Vec::with_capacity(self.pipeline.len());
        for strategy in &self.pipeline {
            match EventProcessor::new(*strategy).run(&mut ctx) {
                Ok(report) => processors.push(report),
                Err(err) => {
                    error!(
                        processor = strategy.name,
                        error = format!("{err:#}"),
                        "events search run failed"
                    );
                    return Err(err.context(format!("{} processor failed", strategy.name)));
                }
            }
        }

        let report = RunReport {
            processors,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            events = report.events_read(),
            rows = report.rows_written(),
            elapsed_ms = report.elapsed_ms,
            "events search run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, EventType, RawEvent};
    use crate::source::{LoadCall, MemoryDataSource};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn set_up_reads_batch_size_only() {
        let mut task = EventsSearchTask::default();
        let mut properties = HashMap::new();
        properties.insert("class".to_string(), "ignored".to_string());
        properties.insert("batch-size".to_string(), "5".to_string());
        task.set_up(&properties);
        assert_eq!(task.config().batch_size, 5);
        assert_eq!(task.pipeline().len(), 13);

        properties.insert("batch-size".to_string(), "-1".to_string());
        task.set_up(&properties);
        assert_eq!(task.config(), &TaskConfig::default());
    }

    #[test]
    fn empty_log_visits_every_processor_once() {
        let source = MemoryDataSource::new();
        let report = EventsSearchTask::default()
            .execute(&source)
            .expect("execute");

        assert_eq!(report.processors.len(), 13);
        assert_eq!(report.rows_written(), 0);

        let loads: Vec<_> = source
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                LoadCall::Events {
                    event_type,
                    entity_kind,
                    ..
                } => Some((event_type, entity_kind)),
                _ => None,
            })
            .collect();
        assert_eq!(loads.first(), Some(&(EventType::Deletion, Some(EntityKind::Space))));
        assert_eq!(loads.get(6), Some(&(EventType::Deletion, Some(EntityKind::Attachment))));
        assert_eq!(loads.get(11), Some(&(EventType::Freezing, None)));
        assert_eq!(loads.get(12), Some(&(EventType::Movement, None)));
        assert!(source.entity_calls().is_empty());
    }

    #[test]
    fn failure_stops_the_run() {
        let broken = RawEvent {
            id: 1,
            event_type: EventType::Deletion,
            entity_type: EntityKind::Experiment,
            identifiers: vec!["E1".into()],
            description: None,
            reason: None,
            content: Some("[1, 2".into()),
            attachment_content: None,
            registerer: "admin".into(),
            registration_timestamp: at(1),
        };
        let source = MemoryDataSource::new().with_event(broken);

        let err = EventsSearchTask::default()
            .execute(&source)
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("experiment-deletion processor failed"));

        let later = source.calls().into_iter().any(|call| {
            matches!(
                call,
                LoadCall::Events {
                    entity_kind: Some(EntityKind::Sample),
                    ..
                }
            )
        });
        assert!(!later, "processors after the failing one must not run");
    }
}
