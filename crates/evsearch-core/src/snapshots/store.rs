//! Temporal index of snapshots for one entity kind.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::Snapshot;

/// Snapshots of one entity kind, keyed by entity key and ordered by `from`.
///
/// Also remembers which keys were already requested from the data source so a
/// key is loaded at most once per run, even when nothing was found for it.
#[derive(Debug, Default)]
pub struct Snapshots {
    by_key: HashMap<String, BTreeMap<DateTime<Utc>, Snapshot>>,
    loaded: HashSet<String>,
}

impl Snapshots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` under `key`.
    ///
    /// A snapshot starting at the same instant as an already stored one is
    /// ignored; stored snapshots are never replaced.
    pub fn put(&mut self, key: &str, snapshot: Snapshot) {
        self.by_key
            .entry(key.to_string())
            .or_default()
            .entry(snapshot.from)
            .or_insert(snapshot);
    }

    /// The snapshot of `key` whose interval contains `at`.
    ///
    /// Floor lookup on `from`, then the candidate must still be valid at `at`.
    #[must_use]
    pub fn get(&self, key: &str, at: DateTime<Utc>) -> Option<&Snapshot> {
        let (_, candidate) = self.by_key.get(key)?.range(..=at).next_back()?;
        candidate.covers(at).then_some(candidate)
    }

    /// Latest `to` among stored snapshots of `key` that ended at or before
    /// `at`.
    #[must_use]
    pub fn last_end_before(&self, key: &str, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.by_key
            .get(key)?
            .values()
            .filter_map(|snapshot| snapshot.to)
            .filter(|to| *to <= at)
            .max()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Number of stored snapshots across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Mark the not yet loaded `candidates` as loaded and return them sorted
    /// and deduplicated.
    pub fn claim_unloaded<'a, I>(&mut self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut claimed: Vec<String> = candidates
            .into_iter()
            .filter(|key| self.loaded.insert((*key).to_string()))
            .map(str::to_string)
            .collect();
        claimed.sort();
        claimed
    }

    #[must_use]
    pub fn is_loaded(&self, key: &str) -> bool {
        self.loaded.contains(key)
    }
}
