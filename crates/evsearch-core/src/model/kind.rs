//! Entity kinds and event types.
//!
//! Both enums serialize as the upper-case names stored in the event log and in
//! the `events_search` table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of entity an event can refer to.
///
/// The first five form the ownership hierarchy
/// `SPACE ⊇ PROJECT ⊇ EXPERIMENT ⊇ SAMPLE ⊇ DATASET`; the rest are leaf kinds
/// without an ownership chain (attachments are owned, but not placed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Space,
    Project,
    Experiment,
    Sample,
    DataSet,
    Material,
    Attachment,
    PropertyType,
    Vocabulary,
    AuthorizationGroup,
    Metaproject,
}

/// Error returned when parsing an unknown entity kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEntityKind {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity kind '{}'", self.raw)
    }
}

impl std::error::Error for UnknownEntityKind {}

impl EntityKind {
    /// All kinds in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Space,
        Self::Project,
        Self::Experiment,
        Self::Sample,
        Self::DataSet,
        Self::Material,
        Self::Attachment,
        Self::PropertyType,
        Self::Vocabulary,
        Self::AuthorizationGroup,
        Self::Metaproject,
    ];

    /// Kinds that carry placement snapshots, root first.
    pub const HIERARCHY: [Self; 5] = [
        Self::Space,
        Self::Project,
        Self::Experiment,
        Self::Sample,
        Self::DataSet,
    ];

    /// Return the canonical upper-case representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Space => "SPACE",
            Self::Project => "PROJECT",
            Self::Experiment => "EXPERIMENT",
            Self::Sample => "SAMPLE",
            Self::DataSet => "DATASET",
            Self::Material => "MATERIAL",
            Self::Attachment => "ATTACHMENT",
            Self::PropertyType => "PROPERTY_TYPE",
            Self::Vocabulary => "VOCABULARY",
            Self::AuthorizationGroup => "AUTHORIZATION_GROUP",
            Self::Metaproject => "METAPROJECT",
        }
    }

    /// Kinds an entity of this kind can be placed under, most specific first.
    ///
    /// This is also the probing order for owners whose kind was not recorded.
    #[must_use]
    pub const fn parent_kinds(self) -> &'static [Self] {
        match self {
            Self::Project => &[Self::Space],
            Self::Experiment => &[Self::Project],
            Self::Sample => &[Self::Experiment, Self::Project, Self::Space],
            Self::DataSet => &[Self::Experiment, Self::Sample],
            Self::Attachment => &[Self::Sample, Self::Experiment, Self::Project],
            _ => &[],
        }
    }

    /// Whether snapshots of this kind are tracked by the facade.
    #[must_use]
    pub const fn is_placed(self) -> bool {
        matches!(
            self,
            Self::Space | Self::Project | Self::Experiment | Self::Sample | Self::DataSet
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SPACE" => Ok(Self::Space),
            "PROJECT" => Ok(Self::Project),
            "EXPERIMENT" => Ok(Self::Experiment),
            "SAMPLE" => Ok(Self::Sample),
            "DATASET" | "DATA_SET" => Ok(Self::DataSet),
            "MATERIAL" => Ok(Self::Material),
            "ATTACHMENT" => Ok(Self::Attachment),
            "PROPERTY_TYPE" => Ok(Self::PropertyType),
            "VOCABULARY" => Ok(Self::Vocabulary),
            "AUTHORIZATION_GROUP" => Ok(Self::AuthorizationGroup),
            "METAPROJECT" => Ok(Self::Metaproject),
            _ => Err(UnknownEntityKind { raw: s.to_string() }),
        }
    }
}

impl Serialize for EntityKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle event types recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Deletion,
    Freezing,
    Movement,
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown event type '{}': expected one of DELETION, FREEZING, MOVEMENT",
            self.raw
        )
    }
}

impl std::error::Error for UnknownEventType {}

impl EventType {
    /// All event types in catalog order.
    pub const ALL: [Self; 3] = [Self::Deletion, Self::Freezing, Self::Movement];

    /// Return the canonical upper-case representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deletion => "DELETION",
            Self::Freezing => "FREEZING",
            Self::Movement => "MOVEMENT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DELETION" => Ok(Self::Deletion),
            "FREEZING" => Ok(Self::Freezing),
            "MOVEMENT" => Ok(Self::Movement),
            _ => Err(UnknownEventType { raw: s.to_string() }),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
