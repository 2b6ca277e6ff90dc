//! Boundary to the entity store.
//!
//! The reconciliation logic reaches the event log, the live entities and the
//! `events_search` table only through [`DataSource`]. Two implementations ship
//! with the crate: [`MemoryDataSource`] and [`SqliteDataSource`].

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{EntityKind, EventType, NewEvent, RawEvent};

pub use memory::{LoadCall, MemoryDataSource};
pub use sqlite::{SqliteDataSource, StoreSummary};

// ---------------------------------------------------------------------------
// Live entity records
// ---------------------------------------------------------------------------

/// Entity on the other side of a relationship history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedObject {
    Space(String),
    Project(String),
    Experiment(String),
    Sample(String),
    /// Kind not recorded; `relation_type` is the relation's own name.
    Unknown {
        relation_type: String,
        perm_id: String,
    },
    /// Any relation that says nothing about ownership.
    Other,
}

/// One closed or open relationship of a live entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationHistory {
    pub related: RelatedObject,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceRecord {
    pub tech_id: i64,
    pub code: String,
    pub registration_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub perm_id: String,
    pub code: String,
    pub space_code: String,
    pub registration_date: DateTime<Utc>,
    pub history: Vec<RelationHistory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentRecord {
    pub perm_id: String,
    pub code: String,
    pub project_perm_id: String,
    pub registration_date: DateTime<Utc>,
    pub history: Vec<RelationHistory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub perm_id: String,
    pub code: String,
    pub space_code: Option<String>,
    pub project_perm_id: Option<String>,
    pub experiment_perm_id: Option<String>,
    pub registration_date: DateTime<Utc>,
    pub history: Vec<RelationHistory>,
}

// ---------------------------------------------------------------------------
// DataSource
// ---------------------------------------------------------------------------

/// Access to raw events, live entities and the enriched output table.
///
/// Methods take `&self` so the processor can call back into the source from
/// inside [`DataSource::execute_in_new_transaction`].
pub trait DataSource {
    /// Events of `event_type` (and of `entity_kind`, when given) registered
    /// strictly after `since`, ordered by registration time then id, at most
    /// `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_events(
        &self,
        event_type: EventType,
        entity_kind: Option<EntityKind>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RawEvent>>;

    /// Registration time of the latest persisted enriched row for the pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_last_timestamp(
        &self,
        event_type: EventType,
        entity_kind: EntityKind,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Live spaces with the given codes. Unknown codes are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_spaces(&self, codes: &[String]) -> Result<Vec<SpaceRecord>>;

    /// Live projects with the given permIds, including relationship history.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_projects(&self, perm_ids: &[String]) -> Result<Vec<ProjectRecord>>;

    /// Live experiments with the given permIds, including relationship history.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_experiments(&self, perm_ids: &[String]) -> Result<Vec<ExperimentRecord>>;

    /// Live samples with the given permIds, including relationship history.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_samples(&self, perm_ids: &[String]) -> Result<Vec<SampleRecord>>;

    /// Insert or replace the row keyed by `(event_id, identifier)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_events_search(&self, event: &NewEvent) -> Result<()>;

    /// Run `work` in its own transaction: commit when it returns `Ok`, roll
    /// back and return its error otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or an error starting/committing the
    /// transaction.
    fn execute_in_new_transaction(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}
