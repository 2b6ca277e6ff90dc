//! In-memory [`DataSource`] for tests and embedders.
//!
//! Seeded with raw events and live entities through builder methods. Written
//! rows are kept in a map keyed by `(event_id, identifier)`; a failing
//! transaction restores the map to its state before the transaction began.
//! Every load is recorded so callers can assert on round trips.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use super::{DataSource, ExperimentRecord, ProjectRecord, SampleRecord, SpaceRecord};
use crate::model::{EntityKind, EventType, NewEvent, RawEvent};

/// A recorded call into the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadCall {
    Events {
        event_type: EventType,
        entity_kind: Option<EntityKind>,
        since: Option<DateTime<Utc>>,
    },
    Spaces(Vec<String>),
    Projects(Vec<String>),
    Experiments(Vec<String>),
    Samples(Vec<String>),
}

type RowKey = (i64, String);

#[derive(Debug, Default)]
pub struct MemoryDataSource {
    events: Vec<RawEvent>,
    spaces: BTreeMap<String, SpaceRecord>,
    projects: BTreeMap<String, ProjectRecord>,
    experiments: BTreeMap<String, ExperimentRecord>,
    samples: BTreeMap<String, SampleRecord>,
    watermarks: HashMap<(EventType, EntityKind), DateTime<Utc>>,
    rows: RefCell<BTreeMap<RowKey, NewEvent>>,
    calls: RefCell<Vec<LoadCall>>,
    commits: Cell<usize>,
    rollbacks: Cell<usize>,
}

impl MemoryDataSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn with_event(mut self, event: RawEvent) -> Self {
        self.add_event(event);
        self
    }

    /// Append a raw event after construction, e.g. between two runs.
    pub fn add_event(&mut self, event: RawEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub fn with_space(mut self, space: SpaceRecord) -> Self {
        self.spaces.insert(space.code.clone(), space);
        self
    }

    #[must_use]
    pub fn with_project(mut self, project: ProjectRecord) -> Self {
        self.projects.insert(project.perm_id.clone(), project);
        self
    }

    #[must_use]
    pub fn with_experiment(mut self, experiment: ExperimentRecord) -> Self {
        self.experiments.insert(experiment.perm_id.clone(), experiment);
        self
    }

    #[must_use]
    pub fn with_sample(mut self, sample: SampleRecord) -> Self {
        self.samples.insert(sample.perm_id.clone(), sample);
        self
    }

    /// Pretend rows up to `at` were already persisted for the pair.
    #[must_use]
    pub fn with_last_timestamp(
        mut self,
        event_type: EventType,
        entity_kind: EntityKind,
        at: DateTime<Utc>,
    ) -> Self {
        self.watermarks.insert((event_type, entity_kind), at);
        self
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Persisted rows ordered by `(event_id, identifier)`.
    #[must_use]
    pub fn events_search(&self) -> Vec<NewEvent> {
        self.rows.borrow().values().cloned().collect()
    }

    /// The persisted row for `identifier`, if exactly one exists.
    #[must_use]
    pub fn row_for(&self, identifier: &str) -> Option<NewEvent> {
        let rows = self.rows.borrow();
        let mut matching = rows.values().filter(|row| row.identifier == identifier);
        let first = matching.next()?.clone();
        matching.next().is_none().then_some(first)
    }

    #[must_use]
    pub fn calls(&self) -> Vec<LoadCall> {
        self.calls.borrow().clone()
    }

    /// Entity loads only, without event loads.
    #[must_use]
    pub fn entity_calls(&self) -> Vec<LoadCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| !matches!(call, LoadCall::Events { .. }))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.get()
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.get()
    }

    fn record(&self, call: LoadCall) {
        self.calls.borrow_mut().push(call);
    }
}

fn pick<T: Clone>(records: &BTreeMap<String, T>, keys: &[String]) -> Vec<T> {
    keys.iter().filter_map(|key| records.get(key).cloned()).collect()
}

impl DataSource for MemoryDataSource {
    fn load_events(
        &self,
        event_type: EventType,
        entity_kind: Option<EntityKind>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RawEvent>> {
        self.record(LoadCall::Events {
            event_type,
            entity_kind,
            since,
        });

        let mut matching: Vec<RawEvent> = self
            .events
            .iter()
            .filter(|event| event.event_type == event_type)
            .filter(|event| entity_kind.is_none_or(|kind| event.entity_type == kind))
            .filter(|event| since.is_none_or(|since| event.registration_timestamp > since))
            .cloned()
            .collect();
        matching.sort_by_key(|event| (event.registration_timestamp, event.id));
        matching.truncate(limit);
        Ok(matching)
    }

    fn load_last_timestamp(
        &self,
        event_type: EventType,
        entity_kind: EntityKind,
    ) -> Result<Option<DateTime<Utc>>> {
        let persisted = self
            .rows
            .borrow()
            .values()
            .filter(|row| row.event_type == event_type && row.entity_type == entity_kind)
            .map(|row| row.registration_timestamp)
            .max();
        let seeded = self.watermarks.get(&(event_type, entity_kind)).copied();
        Ok(persisted.max(seeded))
    }

    fn load_spaces(&self, codes: &[String]) -> Result<Vec<SpaceRecord>> {
        self.record(LoadCall::Spaces(codes.to_vec()));
        Ok(pick(&self.spaces, codes))
    }

    fn load_projects(&self, perm_ids: &[String]) -> Result<Vec<ProjectRecord>> {
        self.record(LoadCall::Projects(perm_ids.to_vec()));
        Ok(pick(&self.projects, perm_ids))
    }

    fn load_experiments(&self, perm_ids: &[String]) -> Result<Vec<ExperimentRecord>> {
        self.record(LoadCall::Experiments(perm_ids.to_vec()));
        Ok(pick(&self.experiments, perm_ids))
    }

    fn load_samples(&self, perm_ids: &[String]) -> Result<Vec<SampleRecord>> {
        self.record(LoadCall::Samples(perm_ids.to_vec()));
        Ok(pick(&self.samples, perm_ids))
    }

    fn create_events_search(&self, event: &NewEvent) -> Result<()> {
        self.rows
            .borrow_mut()
            .insert((event.event_id, event.identifier.clone()), event.clone());
        Ok(())
    }

    fn execute_in_new_transaction(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let before = self.rows.borrow().clone();
        match work() {
            Ok(()) => {
                self.commits.set(self.commits.get() + 1);
                Ok(())
            }
            Err(err) => {
                *self.rows.borrow_mut() = before;
                self.rollbacks.set(self.rollbacks.get() + 1);
                Err(err)
            }
        }
    }
}
