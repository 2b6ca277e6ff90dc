//! Per-processor configuration: which events to read, which watermark guards
//! them, and how each raw event becomes enriched rows.

use chrono::{DateTime, Utc};

use crate::model::{EntityKind, EventType};
use crate::watermark::LastTimestamps;

/// How the entities of one raw event are turned into enriched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// One row per identifier, raw columns only.
    Copy,
    /// Rebuild placement snapshots of `EntityKind` from the payload, store
    /// them, and fill each row from the deleted entity's owner chain.
    Placement(EntityKind),
    /// Fill each row through the owning project, experiment or sample.
    Attachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    pub event_type: EventType,
    /// `None` reads events of every kind.
    pub entity_kind: Option<EntityKind>,
    /// Kinds whose persisted rows bound where reading resumes.
    pub watermark_kinds: &'static [EntityKind],
    pub reconciliation: Reconciliation,
}

impl Strategy {
    /// Deletion processor for `kind`.
    #[must_use]
    pub const fn deletion(kind: EntityKind) -> Self {
        let reconciliation = match kind {
            EntityKind::Space
            | EntityKind::Project
            | EntityKind::Experiment
            | EntityKind::Sample
            | EntityKind::DataSet => Reconciliation::Placement(kind),
            EntityKind::Attachment => Reconciliation::Attachment,
            _ => Reconciliation::Copy,
        };
        Self {
            name: deletion_name(kind),
            event_type: EventType::Deletion,
            entity_kind: Some(kind),
            watermark_kinds: deletion_watermark_kinds(kind),
            reconciliation,
        }
    }

    /// Freezing or movement processor over all entity kinds.
    #[must_use]
    pub const fn non_deletion(event_type: EventType) -> Self {
        Self {
            name: match event_type {
                EventType::Deletion => "deletion",
                EventType::Freezing => "freezing",
                EventType::Movement => "movement",
            },
            event_type,
            entity_kind: None,
            watermark_kinds: &EntityKind::ALL,
            reconciliation: Reconciliation::Copy,
        }
    }

    /// Where reading starts: the earliest watermark of the guarded kinds
    /// (`None` if any has nothing persisted), or for kind-less processors the
    /// latest watermark of any kind.
    #[must_use]
    pub fn coarse_watermark(&self, stamps: &LastTimestamps) -> Option<DateTime<Utc>> {
        match self.entity_kind {
            Some(_) => stamps.earliest_or_none(self.event_type, self.watermark_kinds),
            None => stamps.latest_or_none(self.event_type, self.watermark_kinds),
        }
    }

    /// Rows are only emitted for events strictly after this.
    #[must_use]
    pub fn fine_watermark(&self, stamps: &LastTimestamps) -> Option<DateTime<Utc>> {
        match self.entity_kind {
            Some(kind) => stamps.get(self.event_type, kind),
            None => self.coarse_watermark(stamps),
        }
    }
}

/// Kinds guarding the deletion watermark of `kind`: the kind itself plus the
/// descendants whose reconciliation needs its snapshots.
#[must_use]
pub const fn deletion_watermark_kinds(kind: EntityKind) -> &'static [EntityKind] {
    use EntityKind::{
        Attachment, AuthorizationGroup, DataSet, Experiment, Material, Metaproject, Project,
        PropertyType, Sample, Space, Vocabulary,
    };
    match kind {
        Space => &[Space, Project, Experiment, Sample, DataSet],
        Project => &[Project, Experiment, Sample, DataSet, Attachment],
        Experiment => &[Experiment, Sample, DataSet, Attachment],
        Sample => &[Sample, DataSet, Attachment],
        DataSet => &[DataSet],
        Material => &[Material],
        Attachment => &[Attachment],
        PropertyType => &[PropertyType],
        Vocabulary => &[Vocabulary],
        AuthorizationGroup => &[AuthorizationGroup],
        Metaproject => &[Metaproject],
    }
}

const fn deletion_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Space => "space-deletion",
        EntityKind::Project => "project-deletion",
        EntityKind::Experiment => "experiment-deletion",
        EntityKind::Sample => "sample-deletion",
        EntityKind::DataSet => "data-set-deletion",
        EntityKind::Material => "material-deletion",
        EntityKind::Attachment => "attachment-deletion",
        EntityKind::PropertyType => "property-type-deletion",
        EntityKind::Vocabulary => "vocabulary-deletion",
        EntityKind::AuthorizationGroup => "authorization-group-deletion",
        EntityKind::Metaproject => "metaproject-deletion",
    }
}

/// Processors in run order: hierarchy deletions root first, then leaf
/// deletions, then freezing and movement.
#[must_use]
pub fn default_pipeline() -> Vec<Strategy> {
    let deletions = [
        EntityKind::Space,
        EntityKind::Project,
        EntityKind::Experiment,
        EntityKind::Sample,
        EntityKind::DataSet,
        EntityKind::Material,
        EntityKind::Attachment,
        EntityKind::PropertyType,
        EntityKind::Vocabulary,
        EntityKind::AuthorizationGroup,
        EntityKind::Metaproject,
    ];
    deletions
        .into_iter()
        .map(Strategy::deletion)
        .chain([
            Strategy::non_deletion(EventType::Freezing),
            Strategy::non_deletion(EventType::Movement),
        ])
        .collect()
}
