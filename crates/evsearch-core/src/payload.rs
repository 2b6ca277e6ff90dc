//! Decoding of the history payload attached to deletion events.
//!
//! The payload is a JSON object keyed by entity permId (or code, for spaces).
//! Each value is the entity's history: a list of typed entries.
//!
//! ```json
//! {"S1": [
//!   {"type": "ATTRIBUTE", "key": "CODE", "value": "S1"},
//!   {"type": "RELATIONSHIP", "entityType": "EXPERIMENT", "value": "EXP1",
//!    "validFrom": "2020-01-01 00:00:00.000"}
//! ]}
//! ```
//!
//! Entries are decoded once into [`HistoryEntry`]; processors never look at
//! the raw maps. Entry types other than `ATTRIBUTE` and `RELATIONSHIP` (e.g.
//! `PROPERTY`) decode to [`HistoryEntry::Other`] and are ignored.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::model::{EntityKind, ParentRef, RawEvent};

/// Relation type under which an `UNKNOWN` related entity is still accepted as
/// an owner.
pub const OWNED_RELATION: &str = "OWNED";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to decode a history payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unparseable timestamp '{raw}'")]
    Timestamp { raw: String },
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S%.f %#z"];
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a history timestamp.
///
/// Accepts `yyyy-MM-dd HH:mm:ss[.SSS] <offset>` (as written for
/// `REGISTRATION_TIMESTAMP`), RFC 3339, and offset-less
/// `yyyy-MM-dd HH:mm:ss[.SSS]` (as written for `validFrom`/`validUntil`),
/// which is read as UTC.
///
/// # Errors
///
/// Returns [`PayloadError::Timestamp`] when no format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PayloadError> {
    let trimmed = raw.trim();

    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, NAIVE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| PayloadError::Timestamp {
            raw: raw.to_string(),
        })
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|s| parse_timestamp(&s).map_err(serde::de::Error::custom))
        .transpose()
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Attribute names the processors care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKey {
    Code,
    Registrator,
    RegistrationTimestamp,
    Other,
}

impl FromStr for AttributeKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CODE" => Self::Code,
            "REGISTRATOR" => Self::Registrator,
            "REGISTRATION_TIMESTAMP" => Self::RegistrationTimestamp,
            _ => Self::Other,
        })
    }
}

impl<'de> Deserialize<'de> for AttributeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(Self::Other))
    }
}

/// Kind of the entity on the other side of a relationship entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedKind {
    Space,
    Project,
    Experiment,
    Sample,
    DataSet,
    /// The history did not record the kind.
    Unknown,
    Other,
}

impl RelatedKind {
    /// The concrete entity kind, if recorded.
    #[must_use]
    pub const fn entity_kind(self) -> Option<EntityKind> {
        match self {
            Self::Space => Some(EntityKind::Space),
            Self::Project => Some(EntityKind::Project),
            Self::Experiment => Some(EntityKind::Experiment),
            Self::Sample => Some(EntityKind::Sample),
            Self::DataSet => Some(EntityKind::DataSet),
            Self::Unknown | Self::Other => None,
        }
    }
}

impl fmt::Display for RelatedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity_kind() {
            Some(kind) => f.write_str(kind.as_str()),
            None if *self == Self::Unknown => f.write_str("UNKNOWN"),
            None => f.write_str("OTHER"),
        }
    }
}

impl<'de> Deserialize<'de> for RelatedKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "UNKNOWN" => Self::Unknown,
            other => match other.parse::<EntityKind>() {
                Ok(EntityKind::Space) => Self::Space,
                Ok(EntityKind::Project) => Self::Project,
                Ok(EntityKind::Experiment) => Self::Experiment,
                Ok(EntityKind::Sample) => Self::Sample,
                Ok(EntityKind::DataSet) => Self::DataSet,
                _ => Self::Other,
            },
        })
    }
}

/// `ATTRIBUTE` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Attribute {
    pub key: AttributeKey,
    #[serde(default)]
    pub value: Option<String>,
}

/// `RELATIONSHIP` entry. An entry without `valid_until` is the placement that
/// was current when the entity was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(default)]
    pub key: Option<String>,
    pub entity_type: RelatedKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Relationship {
    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Map this entry to a parent reference when its kind is in `accepts`.
    ///
    /// `UNKNOWN` entries map to [`ParentRef::Unknown`] only when `accepts`
    /// is non-empty and the relation is unnamed or [`OWNED_RELATION`].
    #[must_use]
    pub fn parent(&self, accepts: &[EntityKind]) -> Option<ParentRef> {
        let value = self.value.as_deref()?;
        match self.entity_type {
            RelatedKind::Unknown => {
                let owned = self.key.as_deref().is_none_or(|key| key == OWNED_RELATION);
                (owned && !accepts.is_empty()).then(|| ParentRef::Unknown(value.to_string()))
            }
            related => {
                let kind = related.entity_kind()?;
                if accepts.contains(&kind) {
                    ParentRef::of_kind(kind, value)
                } else {
                    None
                }
            }
        }
    }
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum HistoryEntry {
    #[serde(rename = "ATTRIBUTE")]
    Attribute(Attribute),
    #[serde(rename = "RELATIONSHIP")]
    Relationship(Relationship),
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// EntityPayload
// ---------------------------------------------------------------------------

/// Decoded history of one entity named by a deletion event.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPayload {
    /// PermId, or code for spaces, or the attachment identifier.
    pub key: String,
    pub entries: Vec<HistoryEntry>,
    registration_timestamp: Option<DateTime<Utc>>,
    raw: Option<Value>,
}

impl EntityPayload {
    /// An entity known only by its identifier.
    #[must_use]
    pub fn bare(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entries: Vec::new(),
            registration_timestamp: None,
            raw: None,
        }
    }

    fn attribute(&self, wanted: AttributeKey) -> Option<&str> {
        self.entries.iter().find_map(|entry| match entry {
            HistoryEntry::Attribute(Attribute { key, value }) if *key == wanted => {
                value.as_deref()
            }
            _ => None,
        })
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.attribute(AttributeKey::Code)
    }

    #[must_use]
    pub fn registrator(&self) -> Option<&str> {
        self.attribute(AttributeKey::Registrator)
    }

    #[must_use]
    pub const fn registration_timestamp(&self) -> Option<DateTime<Utc>> {
        self.registration_timestamp
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.entries.iter().filter_map(|entry| match entry {
            HistoryEntry::Relationship(relationship) => Some(relationship),
            _ => None,
        })
    }

    /// The entity's history re-serialized as pretty JSON.
    #[must_use]
    pub fn content(&self) -> Option<String> {
        self.raw
            .as_ref()
            .and_then(|raw| serde_json::to_string_pretty(raw).ok())
    }
}

/// Decode a non-empty payload into one [`EntityPayload`] per key, ordered by
/// key.
///
/// # Errors
///
/// Returns an error when the JSON is malformed, an entity's history is not a
/// list of entries, or a timestamp cannot be parsed.
pub fn decode_content(content: &str) -> Result<Vec<EntityPayload>, PayloadError> {
    let by_key: serde_json::Map<String, Value> = serde_json::from_str(content)?;

    let mut keys: Vec<_> = by_key.keys().cloned().collect();
    keys.sort();

    let mut entities = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(raw) = by_key.get(&key) else {
            continue;
        };
        let entries = Vec::<HistoryEntry>::deserialize(raw)?;

        let mut entity = EntityPayload {
            key,
            entries,
            registration_timestamp: None,
            raw: Some(raw.clone()),
        };
        entity.registration_timestamp = entity
            .attribute(AttributeKey::RegistrationTimestamp)
            .map(parse_timestamp)
            .transpose()?;

        entities.push(entity);
    }

    Ok(entities)
}

/// Decode the entities a raw event refers to.
///
/// Events without content yield one bare entity per identifier.
///
/// # Errors
///
/// See [`decode_content`].
pub fn decode_event(event: &RawEvent) -> Result<Vec<EntityPayload>, PayloadError> {
    match event.content.as_deref() {
        Some(content) if !event.has_empty_content() => decode_content(content),
        _ => Ok(event.identifiers.iter().map(EntityPayload::bare).collect()),
    }
}
