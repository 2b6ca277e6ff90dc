//! Ownership placement of one entity over a time interval.

use chrono::{DateTime, Utc};

use super::kind::EntityKind;

/// The owner an entity was placed under.
///
/// `Unknown` carries a permId whose kind the history did not record. The
/// facade resolves it to a concrete variant before a snapshot is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParentRef {
    Space(String),
    Project(String),
    Experiment(String),
    Sample(String),
    Unknown(String),
}

impl ParentRef {
    /// Build a reference to `key` in a store of the given kind.
    #[must_use]
    pub fn of_kind(kind: EntityKind, key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        match kind {
            EntityKind::Space => Some(Self::Space(key)),
            EntityKind::Project => Some(Self::Project(key)),
            EntityKind::Experiment => Some(Self::Experiment(key)),
            EntityKind::Sample => Some(Self::Sample(key)),
            _ => None,
        }
    }

    /// Kind of the referenced store, `None` for unresolved references.
    #[must_use]
    pub const fn kind(&self) -> Option<EntityKind> {
        match self {
            Self::Space(_) => Some(EntityKind::Space),
            Self::Project(_) => Some(EntityKind::Project),
            Self::Experiment(_) => Some(EntityKind::Experiment),
            Self::Sample(_) => Some(EntityKind::Sample),
            Self::Unknown(_) => None,
        }
    }

    /// The referenced code or permId.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Space(key)
            | Self::Project(key)
            | Self::Experiment(key)
            | Self::Sample(key)
            | Self::Unknown(key) => key,
        }
    }

    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// Entity `entity_perm_id` was placed under `parent` from `from` until `to`.
///
/// An open `to` marks the current placement. The end is inclusive on lookup so
/// that the placement ending at a deletion is still visible at that instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub entity_code: Option<String>,
    pub entity_perm_id: Option<String>,
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
    pub parent: Option<ParentRef>,
}

impl Snapshot {
    /// A parentless placement over `[from, to]`.
    #[must_use]
    pub const fn new(from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            entity_code: None,
            entity_perm_id: None,
            from,
            to,
            parent: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.entity_code = code;
        self
    }

    #[must_use]
    pub fn with_perm_id(mut self, perm_id: Option<String>) -> Self {
        self.entity_perm_id = perm_id;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<ParentRef>) -> Self {
        self.parent = parent;
        self
    }

    /// Whether `at` falls inside `[from, to]`.
    #[must_use]
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && self.to.is_none_or(|to| at <= to)
    }

    /// Space code when placed directly under a space.
    #[must_use]
    pub fn space_code(&self) -> Option<&str> {
        match &self.parent {
            Some(ParentRef::Space(code)) => Some(code),
            _ => None,
        }
    }

    #[must_use]
    pub fn project_perm_id(&self) -> Option<&str> {
        match &self.parent {
            Some(ParentRef::Project(perm_id)) => Some(perm_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn experiment_perm_id(&self) -> Option<&str> {
        match &self.parent {
            Some(ParentRef::Experiment(perm_id)) => Some(perm_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn sample_perm_id(&self) -> Option<&str> {
        match &self.parent {
            Some(ParentRef::Sample(perm_id)) => Some(perm_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn unknown_perm_id(&self) -> Option<&str> {
        match &self.parent {
            Some(ParentRef::Unknown(perm_id)) => Some(perm_id),
            _ => None,
        }
    }
}
