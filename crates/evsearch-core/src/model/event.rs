//! Raw event log records and the enriched rows derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kind::{EntityKind, EventType};

/// One record of the append-only event log.
///
/// A single raw event may cover several entities: `identifiers` lists them and
/// `content`, when present, holds their JSON history keyed by permId (or by
/// code for spaces).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: i64,
    pub event_type: EventType,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment_content: Option<i64>,
    pub registerer: String,
    pub registration_timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// True when the event carries no usable history payload.
    #[must_use]
    pub fn has_empty_content(&self) -> bool {
        self.content.as_deref().is_none_or(|c| c.trim().is_empty())
    }
}

/// One enriched `events_search` row.
///
/// Persisted rows are keyed by `(event_id, identifier)`; writing the same key
/// twice replaces the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: i64,
    pub event_type: EventType,
    pub entity_type: EntityKind,
    pub entity_space: Option<String>,
    pub entity_space_perm_id: Option<String>,
    /// Project identifier in `/<SPACE>/<PROJECT>` form.
    pub entity_project: Option<String>,
    pub entity_project_perm_id: Option<String>,
    pub entity_experiment_perm_id: Option<String>,
    pub entity_sample_perm_id: Option<String>,
    pub entity_registerer: Option<String>,
    pub entity_registration_timestamp: Option<DateTime<Utc>>,
    pub identifier: String,
    pub description: Option<String>,
    pub reason: Option<String>,
    pub content: Option<String>,
    pub attachment_content: Option<i64>,
    pub registerer: String,
    pub registration_timestamp: DateTime<Utc>,
}

impl NewEvent {
    /// Start an enriched row for `identifier`, copying the raw event's own
    /// columns. Ownership and entity columns are left empty.
    #[must_use]
    pub fn from_raw(raw: &RawEvent, identifier: &str) -> Self {
        Self {
            event_id: raw.id,
            event_type: raw.event_type,
            entity_type: raw.entity_type,
            entity_space: None,
            entity_space_perm_id: None,
            entity_project: None,
            entity_project_perm_id: None,
            entity_experiment_perm_id: None,
            entity_sample_perm_id: None,
            entity_registerer: None,
            entity_registration_timestamp: None,
            identifier: identifier.to_string(),
            description: raw.description.clone(),
            reason: raw.reason.clone(),
            content: None,
            attachment_content: raw.attachment_content,
            registerer: raw.registerer.clone(),
            registration_timestamp: raw.registration_timestamp,
        }
    }
}
