//! Cross-kind snapshot resolution.
//!
//! [`SnapshotsFacade`] keeps one [`Snapshots`] store per placed kind, loads
//! live entities from the data source on demand, resolves owners whose kind
//! was not recorded, and fills the ownership columns of enriched events by
//! walking up the hierarchy at the event's registration time.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::store::Snapshots;
use crate::model::{EntityKind, NewEvent, ParentRef, Snapshot};
use crate::payload::OWNED_RELATION;
use crate::source::{DataSource, RelatedObject, RelationHistory};

/// Snapshot stores for one maintenance run.
#[derive(Debug, Default)]
pub struct SnapshotsFacade {
    spaces: Snapshots,
    projects: Snapshots,
    experiments: Snapshots,
    samples: Snapshots,
    data_sets: Snapshots,
}

impl SnapshotsFacade {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store of `kind`, `None` for kinds without placement.
    #[must_use]
    pub const fn store(&self, kind: EntityKind) -> Option<&Snapshots> {
        match kind {
            EntityKind::Space => Some(&self.spaces),
            EntityKind::Project => Some(&self.projects),
            EntityKind::Experiment => Some(&self.experiments),
            EntityKind::Sample => Some(&self.samples),
            EntityKind::DataSet => Some(&self.data_sets),
            _ => None,
        }
    }

    const fn store_mut(&mut self, kind: EntityKind) -> Option<&mut Snapshots> {
        match kind {
            EntityKind::Space => Some(&mut self.spaces),
            EntityKind::Project => Some(&mut self.projects),
            EntityKind::Experiment => Some(&mut self.experiments),
            EntityKind::Sample => Some(&mut self.samples),
            EntityKind::DataSet => Some(&mut self.data_sets),
            _ => None,
        }
    }

    /// Snapshot of `key` valid at `at` in the store of `kind`.
    #[must_use]
    pub fn get(&self, kind: EntityKind, key: &str, at: DateTime<Utc>) -> Option<&Snapshot> {
        self.store(kind)?.get(key, at)
    }

    // -----------------------------------------------------------------------
    // Loading live entities
    // -----------------------------------------------------------------------

    /// Load the live entities of `kind` named by `keys` that were not
    /// requested before in this run.
    ///
    /// # Errors
    ///
    /// Returns an error if the data source fails.
    pub fn load_existing<'a, I>(
        &mut self,
        source: &dyn DataSource,
        kind: EntityKind,
        keys: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match kind {
            EntityKind::Space => self.load_existing_spaces(source, keys),
            EntityKind::Project => self.load_existing_projects(source, keys),
            EntityKind::Experiment => self.load_existing_experiments(source, keys),
            EntityKind::Sample => self.load_existing_samples(source, keys),
            _ => Ok(()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the data source fails.
    pub fn load_existing_spaces<'a, I>(&mut self, source: &dyn DataSource, codes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let to_load = self.spaces.claim_unloaded(codes);
        if to_load.is_empty() {
            return Ok(());
        }

        for space in source.load_spaces(&to_load)? {
            let snapshot = Snapshot::new(space.registration_date, None)
                .with_code(Some(space.code.clone()))
                .with_perm_id(Some(space.tech_id.to_string()));
            self.spaces.put(&space.code, snapshot);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the data source fails.
    pub fn load_existing_projects<'a, I>(
        &mut self,
        source: &dyn DataSource,
        perm_ids: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let to_load = self.projects.claim_unloaded(perm_ids);
        if to_load.is_empty() {
            return Ok(());
        }

        let mut snapshots = Vec::new();
        for project in source.load_projects(&to_load)? {
            snapshots.extend(live_snapshots(
                EntityKind::Project,
                &project.code,
                &project.perm_id,
                project.registration_date,
                &project.history,
                Some(ParentRef::Space(project.space_code.clone())),
            ));
        }
        self.put(source, EntityKind::Project, snapshots)
    }

    /// # Errors
    ///
    /// Returns an error if the data source fails.
    pub fn load_existing_experiments<'a, I>(
        &mut self,
        source: &dyn DataSource,
        perm_ids: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let to_load = self.experiments.claim_unloaded(perm_ids);
        if to_load.is_empty() {
            return Ok(());
        }

        let mut snapshots = Vec::new();
        for experiment in source.load_experiments(&to_load)? {
            snapshots.extend(live_snapshots(
                EntityKind::Experiment,
                &experiment.code,
                &experiment.perm_id,
                experiment.registration_date,
                &experiment.history,
                Some(ParentRef::Project(experiment.project_perm_id.clone())),
            ));
        }
        self.put(source, EntityKind::Experiment, snapshots)
    }

    /// # Errors
    ///
    /// Returns an error if the data source fails.
    pub fn load_existing_samples<'a, I>(
        &mut self,
        source: &dyn DataSource,
        perm_ids: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let to_load = self.samples.claim_unloaded(perm_ids);
        if to_load.is_empty() {
            return Ok(());
        }

        let mut snapshots = Vec::new();
        for sample in source.load_samples(&to_load)? {
            let current = sample
                .experiment_perm_id
                .clone()
                .map(ParentRef::Experiment)
                .or_else(|| sample.project_perm_id.clone().map(ParentRef::Project))
                .or_else(|| sample.space_code.clone().map(ParentRef::Space));
            snapshots.extend(live_snapshots(
                EntityKind::Sample,
                &sample.code,
                &sample.perm_id,
                sample.registration_date,
                &sample.history,
                current,
            ));
        }
        self.put(source, EntityKind::Sample, snapshots)
    }

    // -----------------------------------------------------------------------
    // Storing
    // -----------------------------------------------------------------------

    /// Store `(key, snapshot)` pairs of `kind`.
    ///
    /// Every referenced owner is loaded first, root kinds before specific
    /// ones. Owners of unrecorded kind are then probed in the stores of
    /// [`EntityKind::parent_kinds`] at the snapshot's `from`; the first hit
    /// wins and snapshots without a hit are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if loading owners from the data source fails.
    pub fn put(
        &mut self,
        source: &dyn DataSource,
        kind: EntityKind,
        snapshots: Vec<(String, Snapshot)>,
    ) -> Result<()> {
        for parent_kind in kind.parent_kinds().iter().rev().copied() {
            let keys = snapshots
                .iter()
                .filter_map(|(_, snapshot)| snapshot.parent.as_ref())
                .filter(|parent| parent.is_unknown() || parent.kind() == Some(parent_kind))
                .map(ParentRef::key);
            self.load_existing(source, parent_kind, keys)?;
        }

        for (key, snapshot) in snapshots {
            let Some(resolved) = self.resolve_unknown(kind, &key, snapshot) else {
                continue;
            };
            if let Some(store) = self.store_mut(kind) {
                store.put(&key, resolved);
            }
        }
        Ok(())
    }

    fn resolve_unknown(&self, kind: EntityKind, key: &str, mut snapshot: Snapshot) -> Option<Snapshot> {
        let Some(ParentRef::Unknown(perm_id)) = snapshot.parent.as_ref() else {
            return Some(snapshot);
        };
        let perm_id = perm_id.clone();

        let matches: Vec<EntityKind> = kind
            .parent_kinds()
            .iter()
            .copied()
            .filter(|candidate| self.get(*candidate, &perm_id, snapshot.from).is_some())
            .collect();

        let Some(winner) = matches.first().copied() else {
            debug!(
                kind = %kind,
                key,
                owner = %perm_id,
                "dropping snapshot with unresolvable owner"
            );
            return None;
        };

        if matches.len() > 1 {
            warn!(
                kind = %kind,
                key,
                owner = %perm_id,
                candidates = ?matches,
                chosen = %winner,
                "owner of unrecorded kind matches several stores"
            );
        }

        snapshot.parent = ParentRef::of_kind(winner, perm_id);
        Some(snapshot)
    }

    // -----------------------------------------------------------------------
    // Filling enriched events
    // -----------------------------------------------------------------------

    /// Set the space columns from the space `code` at the event's time.
    pub fn fill_by_space_code(&self, code: &str, event: &mut NewEvent) {
        if let Some(space) = self.spaces.get(code, event.registration_timestamp) {
            event.entity_space.clone_from(&space.entity_code);
            event.entity_space_perm_id.clone_from(&space.entity_perm_id);
        }
    }

    /// Set the project columns, then the space columns of its space.
    pub fn fill_by_project_perm_id(&self, perm_id: &str, event: &mut NewEvent) {
        let Some(project) = self.projects.get(perm_id, event.registration_timestamp) else {
            return;
        };
        event.entity_project_perm_id = Some(perm_id.to_string());

        if let Some(space_code) = project.space_code() {
            self.fill_by_space_code(space_code, event);
        }

        if let (Some(space), Some(code)) = (&event.entity_space, &project.entity_code) {
            event.entity_project = Some(format!("/{space}/{code}"));
        }
    }

    /// Set the experiment column, then walk up through its project.
    pub fn fill_by_experiment_perm_id(&self, perm_id: &str, event: &mut NewEvent) {
        let Some(experiment) = self.experiments.get(perm_id, event.registration_timestamp) else {
            return;
        };
        event.entity_experiment_perm_id = Some(perm_id.to_string());
        self.fill_by_owner(experiment, event);
    }

    /// Set the sample column, then walk up through its experiment, project or
    /// space.
    pub fn fill_by_sample_perm_id(&self, perm_id: &str, event: &mut NewEvent) {
        let Some(sample) = self.samples.get(perm_id, event.registration_timestamp) else {
            return;
        };
        event.entity_sample_perm_id = Some(perm_id.to_string());
        self.fill_by_owner(sample, event);
    }

    /// Walk up through the data set's experiment or sample.
    pub fn fill_by_data_set_perm_id(&self, perm_id: &str, event: &mut NewEvent) {
        if let Some(data_set) = self.data_sets.get(perm_id, event.registration_timestamp) {
            self.fill_by_owner(data_set, event);
        }
    }

    /// Fill starting at entity `key` of `kind`, including its own columns.
    pub fn fill(&self, kind: EntityKind, key: &str, event: &mut NewEvent) {
        match kind {
            EntityKind::Space => self.fill_by_space_code(key, event),
            EntityKind::Project => self.fill_by_project_perm_id(key, event),
            EntityKind::Experiment => self.fill_by_experiment_perm_id(key, event),
            EntityKind::Sample => self.fill_by_sample_perm_id(key, event),
            EntityKind::DataSet => self.fill_by_data_set_perm_id(key, event),
            _ => {}
        }
    }

    /// Fill the columns describing where the deleted entity `key` lived.
    ///
    /// Spaces and projects describe themselves; experiments, samples and data
    /// sets are described by their owner at the event's time.
    pub fn fill_deleted(&self, kind: EntityKind, key: &str, event: &mut NewEvent) {
        match kind {
            EntityKind::Space | EntityKind::Project => self.fill(kind, key, event),
            _ => {
                if let Some(snapshot) = self.get(kind, key, event.registration_timestamp) {
                    self.fill_by_owner(snapshot, event);
                }
            }
        }
    }

    fn fill_by_owner(&self, snapshot: &Snapshot, event: &mut NewEvent) {
        match &snapshot.parent {
            Some(ParentRef::Space(code)) => self.fill_by_space_code(code, event),
            Some(ParentRef::Project(perm_id)) => self.fill_by_project_perm_id(perm_id, event),
            Some(ParentRef::Experiment(perm_id)) => self.fill_by_experiment_perm_id(perm_id, event),
            Some(ParentRef::Sample(perm_id)) => self.fill_by_sample_perm_id(perm_id, event),
            Some(ParentRef::Unknown(_)) | None => {}
        }
    }
}

/// Snapshots of one live entity: one per closed relationship that placed it,
/// plus the open current placement starting where the last closed one ended.
fn live_snapshots(
    kind: EntityKind,
    code: &str,
    perm_id: &str,
    registration_date: DateTime<Utc>,
    history: &[RelationHistory],
    current: Option<ParentRef>,
) -> Vec<(String, Snapshot)> {
    let accepts = kind.parent_kinds();
    let mut snapshots = Vec::new();
    let mut last: Option<&RelationHistory> = None;

    for entry in history {
        let Some(valid_to) = entry.valid_to else {
            continue;
        };
        let Some(parent) = history_parent(&entry.related, accepts) else {
            continue;
        };

        snapshots.push((
            perm_id.to_string(),
            Snapshot::new(entry.valid_from, Some(valid_to))
                .with_code(Some(code.to_string()))
                .with_perm_id(Some(perm_id.to_string()))
                .with_parent(Some(parent)),
        ));

        if last.is_none_or(|previous| entry.valid_from > previous.valid_from) {
            last = Some(entry);
        }
    }

    let from = last
        .and_then(|entry| entry.valid_to)
        .unwrap_or(registration_date);
    snapshots.push((
        perm_id.to_string(),
        Snapshot::new(from, None)
            .with_code(Some(code.to_string()))
            .with_perm_id(Some(perm_id.to_string()))
            .with_parent(current),
    ));
    snapshots
}

fn history_parent(related: &RelatedObject, accepts: &[EntityKind]) -> Option<ParentRef> {
    let (kind, key) = match related {
        RelatedObject::Space(code) => (EntityKind::Space, code),
        RelatedObject::Project(perm_id) => (EntityKind::Project, perm_id),
        RelatedObject::Experiment(perm_id) => (EntityKind::Experiment, perm_id),
        RelatedObject::Sample(perm_id) => (EntityKind::Sample, perm_id),
        RelatedObject::Unknown {
            relation_type,
            perm_id,
        } => {
            return (relation_type == OWNED_RELATION && !accepts.is_empty())
                .then(|| ParentRef::Unknown(perm_id.clone()));
        }
        RelatedObject::Other => return None,
    };
    if accepts.contains(&kind) {
        ParentRef::of_kind(kind, key.clone())
    } else {
        None
    }
}
