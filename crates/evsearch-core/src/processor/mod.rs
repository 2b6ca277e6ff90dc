//! Batched event processing.
//!
//! One [`EventProcessor`] drives one [`Strategy`]: it reads raw events after
//! the strategy's watermark in batches, reconciles each batch inside its own
//! transaction and writes the enriched rows.

mod placement;
mod strategy;

pub use placement::{Placement, attachment_owner, reconstruct};
pub use strategy::{Reconciliation, Strategy, default_pipeline, deletion_watermark_kinds};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::ProcessingError;
use crate::model::{EntityKind, EventType, NewEvent, RawEvent, Snapshot};
use crate::payload::{EntityPayload, decode_event};
use crate::snapshots::SnapshotsFacade;
use crate::source::DataSource;
use crate::watermark::LastTimestamps;

/// Run-scoped state shared by the processors of one maintenance run.
pub struct RunContext<'a> {
    pub source: &'a dyn DataSource,
    pub last_timestamps: &'a LastTimestamps,
    pub snapshots: &'a mut SnapshotsFacade,
    pub batch_size: usize,
}

/// What one processor did during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorReport {
    pub name: &'static str,
    pub event_type: EventType,
    pub entity_kind: Option<EntityKind>,
    /// Where reading started.
    pub since: Option<DateTime<Utc>>,
    pub batches: usize,
    pub events_read: usize,
    pub rows_written: usize,
    /// Registration time of the last event read.
    pub last_seen: Option<DateTime<Utc>>,
}

impl ProcessorReport {
    const fn new(strategy: &Strategy, since: Option<DateTime<Utc>>) -> Self {
        Self {
            name: strategy.name,
            event_type: strategy.event_type,
            entity_kind: strategy.entity_kind,
            since,
            batches: 0,
            events_read: 0,
            rows_written: 0,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventProcessor {
    strategy: Strategy,
}

impl EventProcessor {
    #[must_use]
    pub const fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub const fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Process every event after the strategy's watermark, one transaction
    /// per batch.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails, or if a payload cannot
    /// be decoded (as a [`ProcessingError`]). The failing batch is rolled
    /// back; earlier batches stay committed.
    pub fn run(&self, ctx: &mut RunContext<'_>) -> Result<ProcessorReport> {
        let strategy = &self.strategy;
        let coarse = strategy.coarse_watermark(ctx.last_timestamps);
        let fine = strategy.fine_watermark(ctx.last_timestamps);
        let batch_size = ctx.batch_size.max(1);
        let mut report = ProcessorReport::new(strategy, coarse);
        let mut cursor = coarse;

        debug!(
            processor = strategy.name,
            since = ?coarse,
            emit_after = ?fine,
            "starting processor"
        );

        loop {
            let batch = self.next_batch(ctx.source, cursor, batch_size)?;
            let Some(latest) = batch.iter().map(|event| event.registration_timestamp).max() else {
                break;
            };

            let source = ctx.source;
            let snapshots = &mut *ctx.snapshots;
            let mut written = 0;
            source.execute_in_new_transaction(&mut || -> Result<()> {
                written = self.process_batch(source, snapshots, &batch, fine)?;
                Ok(())
            })?;

            debug!(
                processor = strategy.name,
                events = batch.len(),
                rows = written,
                latest = %latest,
                "committed batch"
            );

            report.batches += 1;
            report.events_read += batch.len();
            report.rows_written += written;
            report.last_seen = Some(latest);
            cursor = Some(latest);
        }

        info!(
            processor = strategy.name,
            batches = report.batches,
            events = report.events_read,
            rows = report.rows_written,
            "processor finished"
        );
        Ok(report)
    }

    /// Up to `batch_size` events after `cursor`. Events registered at one
    /// instant are never split across batches, so a cursor strictly after
    /// the batch's latest timestamp skips nothing; a single instant holding
    /// more than `batch_size` events is read as one larger batch.
    fn next_batch(
        &self,
        source: &dyn DataSource,
        cursor: Option<DateTime<Utc>>,
        batch_size: usize,
    ) -> Result<Vec<RawEvent>> {
        let strategy = &self.strategy;
        let mut limit = batch_size;
        loop {
            let mut batch = source
                .load_events(
                    strategy.event_type,
                    strategy.entity_kind,
                    cursor,
                    limit.saturating_add(1),
                )
                .with_context(|| format!("{}: load events after {cursor:?}", strategy.name))?;
            if batch.len() <= limit {
                return Ok(batch);
            }

            let boundary = batch[limit].registration_timestamp;
            batch.truncate(limit);
            match batch
                .iter()
                .position(|event| event.registration_timestamp == boundary)
            {
                None => return Ok(batch),
                Some(0) => {
                    warn!(
                        processor = strategy.name,
                        at = %boundary,
                        limit,
                        "more events at one instant than the batch size, widening batch"
                    );
                    limit = limit.saturating_mul(2);
                }
                Some(tied) => {
                    batch.truncate(tied);
                    return Ok(batch);
                }
            }
        }
    }

    fn process_batch(
        &self,
        source: &dyn DataSource,
        snapshots: &mut SnapshotsFacade,
        batch: &[RawEvent],
        emit_after: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        match self.strategy.reconciliation {
            Reconciliation::Copy => copy_batch(source, batch, emit_after),
            Reconciliation::Placement(kind) => {
                placement_batch(source, snapshots, kind, batch, emit_after)
            }
            Reconciliation::Attachment => attachment_batch(source, snapshots, batch, emit_after),
        }
    }
}

fn is_after(event: &RawEvent, watermark: Option<DateTime<Utc>>) -> bool {
    watermark.is_none_or(|watermark| event.registration_timestamp > watermark)
}

fn decode(event: &RawEvent) -> Result<Vec<EntityPayload>, ProcessingError> {
    decode_event(event).map_err(|source| ProcessingError::new(event, source))
}

/// Row for one decoded entity, carrying its own registration details and
/// history.
fn entity_row(event: &RawEvent, entity: &EntityPayload) -> NewEvent {
    let mut row = NewEvent::from_raw(event, &entity.key);
    row.entity_registerer = entity.registrator().map(str::to_string);
    row.entity_registration_timestamp = entity.registration_timestamp();
    row.content = entity.content();
    row
}

// ---------------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------------

fn copy_batch(
    source: &dyn DataSource,
    batch: &[RawEvent],
    emit_after: Option<DateTime<Utc>>,
) -> Result<usize> {
    let mut written = 0;
    for event in batch.iter().filter(|event| is_after(event, emit_after)) {
        for identifier in &event.identifiers {
            let mut row = NewEvent::from_raw(event, identifier);
            row.content.clone_from(&event.content);
            source.create_events_search(&row)?;
            written += 1;
        }
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

fn placement_batch(
    source: &dyn DataSource,
    snapshots: &mut SnapshotsFacade,
    kind: EntityKind,
    batch: &[RawEvent],
    emit_after: Option<DateTime<Utc>>,
) -> Result<usize> {
    let mut staged: Vec<(String, Snapshot)> = Vec::new();
    // Ends staged earlier in this batch, per key, so consecutive degenerate
    // placements of one key chain without overlap.
    let mut staged_ends: BTreeMap<String, Vec<DateTime<Utc>>> = BTreeMap::new();
    let mut rows = Vec::new();

    for event in batch {
        let entities = decode(event)?;
        for entity in &entities {
            let deleted_at = event.registration_timestamp;
            let placement = reconstruct(kind, entity, deleted_at, || {
                let stored = snapshots
                    .store(kind)
                    .and_then(|store| store.last_end_before(&entity.key, deleted_at));
                let local = staged_ends
                    .get(&entity.key)
                    .and_then(|ends| ends.iter().filter(|end| **end <= deleted_at).max().copied());
                stored.max(local)
            });

            for snapshot in placement.into_snapshots() {
                if let Some(to) = snapshot.to {
                    staged_ends.entry(entity.key.clone()).or_default().push(to);
                }
                staged.push((entity.key.clone(), snapshot));
            }

            if is_after(event, emit_after) {
                rows.push(entity_row(event, entity));
            }
        }
    }

    snapshots
        .put(source, kind, staged)
        .with_context(|| format!("store {kind} snapshots"))?;

    for row in &mut rows {
        let key = row.identifier.clone();
        snapshots.fill_deleted(kind, &key, row);
        source.create_events_search(row)?;
    }
    Ok(rows.len())
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

fn attachment_batch(
    source: &dyn DataSource,
    snapshots: &mut SnapshotsFacade,
    batch: &[RawEvent],
    emit_after: Option<DateTime<Utc>>,
) -> Result<usize> {
    let mut rows: Vec<(Option<(EntityKind, String)>, NewEvent)> = Vec::new();

    for event in batch {
        let entities = decode(event)?;
        if !is_after(event, emit_after) {
            continue;
        }
        for entity in &entities {
            rows.push((attachment_owner(entity), entity_row(event, entity)));
        }
    }

    for owner_kind in [EntityKind::Project, EntityKind::Experiment, EntityKind::Sample] {
        let keys = rows
            .iter()
            .filter_map(|(owner, _)| owner.as_ref())
            .filter(|(kind, _)| *kind == owner_kind)
            .map(|(_, key)| key.as_str());
        snapshots
            .load_existing(source, owner_kind, keys)
            .with_context(|| format!("load attachment owners of kind {owner_kind}"))?;
    }

    for (owner, row) in &mut rows {
        if let Some((owner_kind, owner_key)) = owner.as_ref() {
            snapshots.fill(*owner_kind, owner_key, row);
        }
        source.create_events_search(row)?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParentRef;
    use crate::source::{LoadCall, MemoryDataSource, ProjectRecord, SpaceRecord};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, hour, 0, 0).unwrap()
    }

    fn raw(id: i64, event_type: EventType, kind: EntityKind, hour: u32) -> RawEvent {
        RawEvent {
            id,
            event_type,
            entity_type: kind,
            identifiers: vec![format!("K{id}")],
            description: None,
            reason: None,
            content: None,
            attachment_content: None,
            registerer: "admin".into(),
            registration_timestamp: at(hour),
        }
    }

    fn run(strategy: Strategy, source: &MemoryDataSource, batch_size: usize) -> ProcessorReport {
        let stamps = LastTimestamps::load(source).expect("watermarks");
        let mut facade = SnapshotsFacade::new();
        let mut ctx = RunContext {
            source,
            last_timestamps: &stamps,
            snapshots: &mut facade,
            batch_size,
        };
        EventProcessor::new(strategy).run(&mut ctx).expect("run")
    }

    #[test]
    fn batches_advance_cursor_to_latest_timestamp() {
        let source = MemoryDataSource::new()
            .with_event(raw(1, EventType::Deletion, EntityKind::Material, 1))
            .with_event(raw(2, EventType::Deletion, EntityKind::Material, 2))
            .with_event(raw(3, EventType::Deletion, EntityKind::Material, 3));

        let report = run(Strategy::deletion(EntityKind::Material), &source, 2);
        assert_eq!(report.batches, 2);
        assert_eq!(report.events_read, 3);
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.last_seen, Some(at(3)));
        assert_eq!(source.commits(), 2);

        let sinces: Vec<_> = source
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                LoadCall::Events { since, .. } => Some(since),
                _ => None,
            })
            .collect();
        assert_eq!(sinces, vec![None, Some(at(2)), Some(at(3))]);
    }

    #[test]
    fn same_instant_events_stay_in_one_batch() {
        let source = MemoryDataSource::new()
            .with_event(raw(1, EventType::Deletion, EntityKind::Material, 1))
            .with_event(raw(2, EventType::Deletion, EntityKind::Material, 2))
            .with_event(raw(3, EventType::Deletion, EntityKind::Material, 2))
            .with_event(raw(4, EventType::Deletion, EntityKind::Material, 2));

        let report = run(Strategy::deletion(EntityKind::Material), &source, 2);
        assert_eq!(report.batches, 2);
        assert_eq!(report.events_read, 4);
        assert_eq!(report.rows_written, 4);
        for key in ["K1", "K2", "K3", "K4"] {
            assert!(source.row_for(key).is_some(), "missing row for {key}");
        }
    }

    #[test]
    fn copy_writes_one_row_per_identifier() {
        let mut event = raw(5, EventType::Freezing, EntityKind::Sample, 4);
        event.identifiers = vec!["A".into(), "B".into()];
        event.content = Some("{\"frozen\": true}".into());
        let source = MemoryDataSource::new().with_event(event);

        let report = run(Strategy::non_deletion(EventType::Freezing), &source, 10);
        assert_eq!(report.rows_written, 2);
        let row = source.row_for("B").expect("row for B");
        assert_eq!(row.content.as_deref(), Some("{\"frozen\": true}"));
        assert!(row.entity_space.is_none());
    }

    #[test]
    fn events_before_own_watermark_only_feed_snapshots() {
        // Project rows are persisted up to hour 3 but samples lag behind, so
        // the project processor re-reads from hour 1 without re-emitting.
        let mut old = raw(1, EventType::Deletion, EntityKind::Project, 2);
        old.content = Some(
            r#"{"K1": [
                {"type": "ATTRIBUTE", "key": "CODE", "value": "OLD"},
                {"type": "RELATIONSHIP", "entityType": "SPACE", "value": "LAB", "validFrom": "2021-01-01 00:00:00.000"}
            ]}"#
            .into(),
        );
        let new = raw(2, EventType::Deletion, EntityKind::Project, 4);
        let source = MemoryDataSource::new()
            .with_event(old)
            .with_event(new)
            .with_last_timestamp(EventType::Deletion, EntityKind::Project, at(3))
            .with_last_timestamp(EventType::Deletion, EntityKind::Experiment, at(3))
            .with_last_timestamp(EventType::Deletion, EntityKind::Sample, at(1))
            .with_last_timestamp(EventType::Deletion, EntityKind::DataSet, at(3))
            .with_last_timestamp(EventType::Deletion, EntityKind::Attachment, at(3))
            .with_space(SpaceRecord {
                tech_id: 1,
                code: "LAB".into(),
                registration_date: at(0),
            });

        let stamps = LastTimestamps::load(&source).expect("watermarks");
        let mut facade = SnapshotsFacade::new();
        let mut ctx = RunContext {
            source: &source,
            last_timestamps: &stamps,
            snapshots: &mut facade,
            batch_size: 10,
        };
        let report = EventProcessor::new(Strategy::deletion(EntityKind::Project))
            .run(&mut ctx)
            .expect("run");

        assert_eq!(report.since, Some(at(1)));
        assert_eq!(report.events_read, 2);
        assert_eq!(report.rows_written, 1);
        assert!(source.row_for("K1").is_none());
        assert!(source.row_for("K2").is_some());

        let old_placement = facade
            .get(EntityKind::Project, "K1", at(2))
            .expect("snapshot of the skipped event");
        assert_eq!(old_placement.parent, Some(ParentRef::Space("LAB".into())));
    }

    #[test]
    fn malformed_payload_rolls_back_batch_and_names_event() {
        let mut broken = raw(7, EventType::Deletion, EntityKind::Project, 5);
        broken.content = Some("{not json".into());
        let source = MemoryDataSource::new()
            .with_event(raw(6, EventType::Deletion, EntityKind::Project, 4))
            .with_event(broken);

        let stamps = LastTimestamps::load(&source).expect("watermarks");
        let mut facade = SnapshotsFacade::new();
        let mut ctx = RunContext {
            source: &source,
            last_timestamps: &stamps,
            snapshots: &mut facade,
            batch_size: 10,
        };
        let err = EventProcessor::new(Strategy::deletion(EntityKind::Project))
            .run(&mut ctx)
            .expect_err("decoding must fail");

        let processing = err
            .downcast_ref::<ProcessingError>()
            .expect("processing error at the root");
        assert_eq!(processing.event_id, 7);
        assert_eq!(source.rollbacks(), 1);
        assert!(source.events_search().is_empty());
    }

    #[test]
    fn attachment_is_filled_through_owner() {
        let mut attachment = raw(9, EventType::Deletion, EntityKind::Attachment, 6);
        attachment.identifiers = vec!["project/P1/readme.txt(1)".into()];
        let source = MemoryDataSource::new()
            .with_event(attachment)
            .with_space(SpaceRecord {
                tech_id: 3,
                code: "LAB".into(),
                registration_date: at(0),
            })
            .with_project(ProjectRecord {
                perm_id: "P1".into(),
                code: "PROJ".into(),
                space_code: "LAB".into(),
                registration_date: at(0),
                history: Vec::new(),
            });

        let report = run(Strategy::deletion(EntityKind::Attachment), &source, 10);
        assert_eq!(report.rows_written, 1);

        let row = source.row_for("project/P1/readme.txt(1)").expect("row");
        assert_eq!(row.entity_project_perm_id.as_deref(), Some("P1"));
        assert_eq!(row.entity_project.as_deref(), Some("/LAB/PROJ"));
        assert_eq!(row.entity_space.as_deref(), Some("LAB"));
        assert_eq!(row.entity_space_perm_id.as_deref(), Some("3"));
    }
}
