//! Last-seen timestamps of already persisted enriched rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::{EntityKind, EventType};
use crate::source::DataSource;

/// One optional timestamp per `(event type, entity kind)`, read once at the
/// start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastTimestamps {
    timestamps: HashMap<(EventType, EntityKind), DateTime<Utc>>,
}

impl LastTimestamps {
    /// Read the timestamps of every event type and entity kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the data source cannot be read.
    pub fn load(source: &dyn DataSource) -> Result<Self> {
        let mut timestamps = HashMap::new();
        for event_type in EventType::ALL {
            for kind in EntityKind::ALL {
                let last = source
                    .load_last_timestamp(event_type, kind)
                    .with_context(|| format!("load last timestamp for {event_type} {kind}"))?;
                if let Some(last) = last {
                    timestamps.insert((event_type, kind), last);
                }
            }
        }
        Ok(Self { timestamps })
    }

    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = ((EventType, EntityKind), DateTime<Utc>)>,
    {
        Self {
            timestamps: entries.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn get(&self, event_type: EventType, kind: EntityKind) -> Option<DateTime<Utc>> {
        self.timestamps.get(&(event_type, kind)).copied()
    }

    /// Persisted watermarks ordered by event type, then entity kind.
    #[must_use]
    pub fn entries(&self) -> Vec<(EventType, EntityKind, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .timestamps
            .iter()
            .map(|(&(event_type, kind), &at)| (event_type, kind, at))
            .collect();
        entries.sort_unstable_by_key(|&(event_type, kind, _)| (event_type, kind));
        entries
    }

    /// Minimum over `kinds`, or `None` as soon as one kind has nothing
    /// persisted yet.
    #[must_use]
    pub fn earliest_or_none(
        &self,
        event_type: EventType,
        kinds: &[EntityKind],
    ) -> Option<DateTime<Utc>> {
        kinds
            .iter()
            .map(|kind| self.get(event_type, *kind))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    /// Maximum over the kinds that have something persisted.
    #[must_use]
    pub fn latest_or_none(
        &self,
        event_type: EventType,
        kinds: &[EntityKind],
    ) -> Option<DateTime<Utc>> {
        kinds
            .iter()
            .filter_map(|kind| self.get(event_type, *kind))
            .max()
    }
}
