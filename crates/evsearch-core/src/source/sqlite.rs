//! [`DataSource`] backed by the SQLite event store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::HashMap;
use std::path::Path;

use super::{
    DataSource, ExperimentRecord, ProjectRecord, RelatedObject, RelationHistory, SampleRecord,
    SpaceRecord,
};
use crate::db;
use crate::model::{EntityKind, EventType, NewEvent, RawEvent};

/// Row counts of an event store.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreSummary {
    pub events: i64,
    pub events_search: i64,
    pub spaces: i64,
    pub projects: i64,
    pub experiments: i64,
    pub samples: i64,
}

pub struct SqliteDataSource {
    conn: Connection,
}

impl SqliteDataSource {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        db::open_store(path).map(Self::from_connection)
    }

    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        db::open_in_memory().map(Self::from_connection)
    }

    /// Wrap an already configured and migrated connection.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    /// Append a raw event to the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. duplicate id).
    pub fn insert_event(&self, event: &RawEvent) -> Result<()> {
        let identifiers =
            serde_json::to_string(&event.identifiers).context("serialize identifiers")?;
        self.conn
            .execute(
                "INSERT INTO events (
                    id, event_type, entity_type, identifiers, description, reason,
                    content, attachment_content, registerer, registration_timestamp_us
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.id,
                    event.event_type.as_str(),
                    event.entity_type.as_str(),
                    identifiers,
                    event.description,
                    event.reason,
                    event.content,
                    event.attachment_content,
                    event.registerer,
                    event.registration_timestamp.timestamp_micros(),
                ],
            )
            .with_context(|| format!("insert event {}", event.id))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_space(&self, space: &SpaceRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO spaces (id, code, registration_timestamp_us) VALUES (?1, ?2, ?3)",
                params![
                    space.tech_id,
                    space.code,
                    space.registration_date.timestamp_micros()
                ],
            )
            .with_context(|| format!("insert space {}", space.code))?;
        Ok(())
    }

    /// Insert a project together with its relationship history.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO projects (perm_id, code, space_code, registration_timestamp_us)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.perm_id,
                    project.code,
                    project.space_code,
                    project.registration_date.timestamp_micros()
                ],
            )
            .with_context(|| format!("insert project {}", project.perm_id))?;
        self.insert_history(EntityKind::Project, &project.perm_id, &project.history)
    }

    /// Insert an experiment together with its relationship history.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn insert_experiment(&self, experiment: &ExperimentRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO experiments (perm_id, code, project_perm_id, registration_timestamp_us)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    experiment.perm_id,
                    experiment.code,
                    experiment.project_perm_id,
                    experiment.registration_date.timestamp_micros()
                ],
            )
            .with_context(|| format!("insert experiment {}", experiment.perm_id))?;
        self.insert_history(
            EntityKind::Experiment,
            &experiment.perm_id,
            &experiment.history,
        )
    }

    /// Insert a sample together with its relationship history.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn insert_sample(&self, sample: &SampleRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO samples (
                    perm_id, code, space_code, project_perm_id, experiment_perm_id,
                    registration_timestamp_us
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sample.perm_id,
                    sample.code,
                    sample.space_code,
                    sample.project_perm_id,
                    sample.experiment_perm_id,
                    sample.registration_date.timestamp_micros()
                ],
            )
            .with_context(|| format!("insert sample {}", sample.perm_id))?;
        self.insert_history(EntityKind::Sample, &sample.perm_id, &sample.history)
    }

    fn insert_history(
        &self,
        kind: EntityKind,
        perm_id: &str,
        history: &[RelationHistory],
    ) -> Result<()> {
        for entry in history {
            let (relation_type, related_kind, related_id) = match &entry.related {
                RelatedObject::Space(code) => ("OWNED", Some("SPACE"), code.as_str()),
                RelatedObject::Project(id) => ("OWNED", Some("PROJECT"), id.as_str()),
                RelatedObject::Experiment(id) => ("OWNED", Some("EXPERIMENT"), id.as_str()),
                RelatedObject::Sample(id) => ("OWNED", Some("SAMPLE"), id.as_str()),
                RelatedObject::Unknown {
                    relation_type,
                    perm_id: related,
                } => (relation_type.as_str(), None, related.as_str()),
                RelatedObject::Other => ("OTHER", Some("OTHER"), ""),
            };
            self.conn
                .execute(
                    "INSERT INTO relationship_history (
                        entity_kind, entity_perm_id, relation_type, related_kind, related_id,
                        valid_from_us, valid_until_us
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        kind.as_str(),
                        perm_id,
                        relation_type,
                        related_kind,
                        related_id,
                        entry.valid_from.timestamp_micros(),
                        entry.valid_to.map(|t| t.timestamp_micros()),
                    ],
                )
                .with_context(|| format!("insert history of {kind} {perm_id}"))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// All enriched rows ordered by `(event_id, identifier)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn list_events_search(&self) -> Result<Vec<NewEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, identifier, event_type, entity_type, entity_space,
                    entity_space_perm_id, entity_project, entity_project_perm_id,
                    entity_experiment_perm_id, entity_sample_perm_id, entity_registerer,
                    entity_registration_timestamp_us, description, reason, content,
                    attachment_content, registerer, registration_timestamp_us
             FROM events_search
             ORDER BY event_id, identifier",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NewEvent {
                event_id: row.get(0)?,
                identifier: row.get(1)?,
                event_type: parse_column(row, 2)?,
                entity_type: parse_column(row, 3)?,
                entity_space: row.get(4)?,
                entity_space_perm_id: row.get(5)?,
                entity_project: row.get(6)?,
                entity_project_perm_id: row.get(7)?,
                entity_experiment_perm_id: row.get(8)?,
                entity_sample_perm_id: row.get(9)?,
                entity_registerer: row.get(10)?,
                entity_registration_timestamp: row
                    .get::<_, Option<i64>>(11)?
                    .map(|us| micros_to_utc(11, us))
                    .transpose()?,
                description: row.get(12)?,
                reason: row.get(13)?,
                content: row.get(14)?,
                attachment_content: row.get(15)?,
                registerer: row.get(16)?,
                registration_timestamp: micros_to_utc(17, row.get(17)?)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read events_search")
    }

    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn summary(&self) -> Result<StoreSummary> {
        let count = |table: &str| -> Result<i64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .with_context(|| format!("count {table}"))
        };
        Ok(StoreSummary {
            events: count("events")?,
            events_search: count("events_search")?,
            spaces: count("spaces")?,
            projects: count("projects")?,
            experiments: count("experiments")?,
            samples: count("samples")?,
        })
    }

    // -----------------------------------------------------------------------
    // Loading helpers
    // -----------------------------------------------------------------------

    fn load_history(
        &self,
        kind: EntityKind,
        perm_ids: &[String],
    ) -> Result<HashMap<String, Vec<RelationHistory>>> {
        let sql = format!(
            "SELECT entity_perm_id, relation_type, related_kind, related_id,
                    valid_from_us, valid_until_us
             FROM relationship_history
             WHERE entity_kind = ? AND entity_perm_id IN ({})
             ORDER BY valid_from_us, id",
            placeholders(perm_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let bound = std::iter::once(kind.as_str()).chain(perm_ids.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(bound), |row| {
            let relation_type: String = row.get(1)?;
            let related_kind: Option<String> = row.get(2)?;
            let related_id: String = row.get(3)?;
            let related = match related_kind.as_deref() {
                None => RelatedObject::Unknown {
                    relation_type,
                    perm_id: related_id,
                },
                Some("SPACE") => RelatedObject::Space(related_id),
                Some("PROJECT") => RelatedObject::Project(related_id),
                Some("EXPERIMENT") => RelatedObject::Experiment(related_id),
                Some("SAMPLE") => RelatedObject::Sample(related_id),
                Some(_) => RelatedObject::Other,
            };
            let entry = RelationHistory {
                related,
                valid_from: micros_to_utc(4, row.get(4)?)?,
                valid_to: row
                    .get::<_, Option<i64>>(5)?
                    .map(|us| micros_to_utc(5, us))
                    .transpose()?,
            };
            Ok((row.get::<_, String>(0)?, entry))
        })?;

        let mut history: HashMap<String, Vec<RelationHistory>> = HashMap::new();
        for row in rows {
            let (perm_id, entry) = row?;
            history.entry(perm_id).or_default().push(entry);
        }
        Ok(history)
    }
}

impl DataSource for SqliteDataSource {
    fn load_events(
        &self,
        event_type: EventType,
        entity_kind: Option<EntityKind>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RawEvent>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, event_type, entity_type, identifiers, description, reason, content,
                    attachment_content, registerer, registration_timestamp_us
             FROM events
             WHERE event_type = ?1
               AND (?2 IS NULL OR entity_type = ?2)
               AND (?3 IS NULL OR registration_timestamp_us > ?3)
             ORDER BY registration_timestamp_us, id
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                event_type.as_str(),
                entity_kind.map(EntityKind::as_str),
                since.map(|t| t.timestamp_micros()),
                i64::try_from(limit).unwrap_or(i64::MAX),
            ],
            |row| {
                let identifiers: String = row.get(3)?;
                let identifiers: Vec<String> =
                    serde_json::from_str(&identifiers).map_err(|error| {
                        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(error))
                    })?;
                Ok(RawEvent {
                    id: row.get(0)?,
                    event_type: parse_column(row, 1)?,
                    entity_type: parse_column(row, 2)?,
                    identifiers,
                    description: row.get(4)?,
                    reason: row.get(5)?,
                    content: row.get(6)?,
                    attachment_content: row.get(7)?,
                    registerer: row.get(8)?,
                    registration_timestamp: micros_to_utc(9, row.get(9)?)?,
                })
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("load {event_type} events"))
    }

    fn load_last_timestamp(
        &self,
        event_type: EventType,
        entity_kind: EntityKind,
    ) -> Result<Option<DateTime<Utc>>> {
        let last: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(registration_timestamp_us) FROM events_search
                 WHERE event_type = ?1 AND entity_type = ?2",
                params![event_type.as_str(), entity_kind.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        last.map(|us| micros_to_utc(0, us))
            .transpose()
            .context("decode last timestamp")
    }

    fn load_spaces(&self, codes: &[String]) -> Result<Vec<SpaceRecord>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, code, registration_timestamp_us FROM spaces WHERE code IN ({})",
            placeholders(codes.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(codes.iter()), |row| {
            Ok(SpaceRecord {
                tech_id: row.get(0)?,
                code: row.get(1)?,
                registration_date: micros_to_utc(2, row.get(2)?)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("load spaces")
    }

    fn load_projects(&self, perm_ids: &[String]) -> Result<Vec<ProjectRecord>> {
        if perm_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut history = self.load_history(EntityKind::Project, perm_ids)?;
        let sql = format!(
            "SELECT perm_id, code, space_code, registration_timestamp_us
             FROM projects WHERE perm_id IN ({})",
            placeholders(perm_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(perm_ids.iter()), |row| {
            Ok(ProjectRecord {
                perm_id: row.get(0)?,
                code: row.get(1)?,
                space_code: row.get(2)?,
                registration_date: micros_to_utc(3, row.get(3)?)?,
                history: Vec::new(),
            })
        })?;
        let mut projects = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("load projects")?;
        for project in &mut projects {
            project.history = history.remove(&project.perm_id).unwrap_or_default();
        }
        Ok(projects)
    }

    fn load_experiments(&self, perm_ids: &[String]) -> Result<Vec<ExperimentRecord>> {
        if perm_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut history = self.load_history(EntityKind::Experiment, perm_ids)?;
        let sql = format!(
            "SELECT perm_id, code, project_perm_id, registration_timestamp_us
             FROM experiments WHERE perm_id IN ({})",
            placeholders(perm_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(perm_ids.iter()), |row| {
            Ok(ExperimentRecord {
                perm_id: row.get(0)?,
                code: row.get(1)?,
                project_perm_id: row.get(2)?,
                registration_date: micros_to_utc(3, row.get(3)?)?,
                history: Vec::new(),
            })
        })?;
        let mut experiments = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("load experiments")?;
        for experiment in &mut experiments {
            experiment.history = history.remove(&experiment.perm_id).unwrap_or_default();
        }
        Ok(experiments)
    }

    fn load_samples(&self, perm_ids: &[String]) -> Result<Vec<SampleRecord>> {
        if perm_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut history = self.load_history(EntityKind::Sample, perm_ids)?;
        let sql = format!(
            "SELECT perm_id, code, space_code, project_perm_id, experiment_perm_id,
                    registration_timestamp_us
             FROM samples WHERE perm_id IN ({})",
            placeholders(perm_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(perm_ids.iter()), |row| {
            Ok(SampleRecord {
                perm_id: row.get(0)?,
                code: row.get(1)?,
                space_code: row.get(2)?,
                project_perm_id: row.get(3)?,
                experiment_perm_id: row.get(4)?,
                registration_date: micros_to_utc(5, row.get(5)?)?,
                history: Vec::new(),
            })
        })?;
        let mut samples = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("load samples")?;
        for sample in &mut samples {
            sample.history = history.remove(&sample.perm_id).unwrap_or_default();
        }
        Ok(samples)
    }

    fn create_events_search(&self, event: &NewEvent) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO events_search (
                    event_id, identifier, event_type, entity_type, entity_space,
                    entity_space_perm_id, entity_project, entity_project_perm_id,
                    entity_experiment_perm_id, entity_sample_perm_id, entity_registerer,
                    entity_registration_timestamp_us, description, reason, content,
                    attachment_content, registerer, registration_timestamp_us
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?
            .execute(params![
                event.event_id,
                event.identifier,
                event.event_type.as_str(),
                event.entity_type.as_str(),
                event.entity_space,
                event.entity_space_perm_id,
                event.entity_project,
                event.entity_project_perm_id,
                event.entity_experiment_perm_id,
                event.entity_sample_perm_id,
                event.entity_registerer,
                event
                    .entity_registration_timestamp
                    .map(|t| t.timestamp_micros()),
                event.description,
                event.reason,
                event.content,
                event.attachment_content,
                event.registerer,
                event.registration_timestamp.timestamp_micros(),
            ])
            .with_context(|| {
                format!(
                    "write events_search row ({}, {})",
                    event.event_id, event.identifier
                )
            })?;
        Ok(())
    }

    fn execute_in_new_transaction(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .context("begin batch transaction")?;

        match work() {
            Ok(()) => {
                self.conn
                    .execute_batch("COMMIT")
                    .context("commit batch transaction")?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback, "rollback of batch transaction failed");
                }
                Err(err)
            }
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn micros_to_utc(index: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Integer,
            format!("timestamp {micros}us out of range").into(),
        )
    })
}

fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(index)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, hour, 0, 0).unwrap()
    }

    fn event(id: i64, event_type: EventType, kind: EntityKind, hour: u32) -> RawEvent {
        RawEvent {
            id,
            event_type,
            entity_type: kind,
            identifiers: vec![format!("ID{id}"), format!("ID{id}-B")],
            description: Some(format!("event {id}")),
            reason: None,
            content: None,
            attachment_content: None,
            registerer: "admin".into(),
            registration_timestamp: at(hour),
        }
    }

    #[test]
    fn events_are_filtered_ordered_and_limited() {
        let store = SqliteDataSource::open_in_memory().expect("open");
        store
            .insert_event(&event(3, EventType::Deletion, EntityKind::Sample, 5))
            .expect("insert");
        store
            .insert_event(&event(1, EventType::Deletion, EntityKind::Sample, 5))
            .expect("insert");
        store
            .insert_event(&event(2, EventType::Deletion, EntityKind::Project, 4))
            .expect("insert");
        store
            .insert_event(&event(4, EventType::Freezing, EntityKind::Sample, 6))
            .expect("insert");

        let samples = store
            .load_events(EventType::Deletion, Some(EntityKind::Sample), None, 10)
            .expect("load");
        assert_eq!(samples.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(samples[0].identifiers, vec!["ID1", "ID1-B"]);

        let all = store
            .load_events(EventType::Deletion, None, None, 2)
            .expect("load");
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 1]);

        let after = store
            .load_events(EventType::Deletion, None, Some(at(4)), 10)
            .expect("load");
        assert_eq!(after.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn entities_come_back_with_history() {
        let store = SqliteDataSource::open_in_memory().expect("open");
        store
            .insert_space(&SpaceRecord {
                tech_id: 7,
                code: "LAB".into(),
                registration_date: at(1),
            })
            .expect("space");
        store
            .insert_sample(&SampleRecord {
                perm_id: "S1".into(),
                code: "SAMPLE-1".into(),
                space_code: Some("LAB".into()),
                project_perm_id: None,
                experiment_perm_id: Some("E2".into()),
                registration_date: at(1),
                history: vec![
                    RelationHistory {
                        related: RelatedObject::Unknown {
                            relation_type: "OWNED".into(),
                            perm_id: "E1".into(),
                        },
                        valid_from: at(1),
                        valid_to: Some(at(3)),
                    },
                    RelationHistory {
                        related: RelatedObject::Experiment("E2".into()),
                        valid_from: at(3),
                        valid_to: None,
                    },
                ],
            })
            .expect("sample");

        let spaces = store
            .load_spaces(&["LAB".into(), "MISSING".into()])
            .expect("spaces");
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].tech_id, 7);

        let samples = store.load_samples(&["S1".into()]).expect("samples");
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.experiment_perm_id.as_deref(), Some("E2"));
        assert_eq!(sample.history.len(), 2);
        assert_eq!(
            sample.history[0].related,
            RelatedObject::Unknown {
                relation_type: "OWNED".into(),
                perm_id: "E1".into()
            }
        );
        assert_eq!(sample.history[0].valid_to, Some(at(3)));
        assert_eq!(sample.history[1].related, RelatedObject::Experiment("E2".into()));
        assert!(sample.history[1].valid_to.is_none());

        assert!(store.load_projects(&[]).expect("empty").is_empty());
    }

    #[test]
    fn rows_are_upserted_and_drive_watermarks() {
        let store = SqliteDataSource::open_in_memory().expect("open");
        let raw = event(9, EventType::Movement, EntityKind::DataSet, 8);
        let mut row = NewEvent::from_raw(&raw, "ID9");

        store.create_events_search(&row).expect("insert");
        row.entity_space = Some("LAB".into());
        store.create_events_search(&row).expect("replace");

        let rows = store.list_events_search().expect("list");
        assert_eq!(rows, vec![row]);
        assert_eq!(
            store
                .load_last_timestamp(EventType::Movement, EntityKind::DataSet)
                .expect("last"),
            Some(at(8))
        );
        assert_eq!(
            store
                .load_last_timestamp(EventType::Deletion, EntityKind::DataSet)
                .expect("last"),
            None
        );
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = SqliteDataSource::open_in_memory().expect("open");
        let raw = event(1, EventType::Deletion, EntityKind::Material, 2);

        let result = store.execute_in_new_transaction(&mut || -> Result<()> {
            store.create_events_search(&NewEvent::from_raw(&raw, "ID1"))?;
            anyhow::bail!("boom")
        });
        assert!(result.is_err());
        assert!(store.list_events_search().expect("list").is_empty());

        store
            .execute_in_new_transaction(&mut || -> Result<()> {
                store.create_events_search(&NewEvent::from_raw(&raw, "ID1"))
            })
            .expect("commit");
        assert_eq!(store.list_events_search().expect("list").len(), 1);
    }

    #[test]
    fn store_on_disk_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("events.sqlite3");
        {
            let store = SqliteDataSource::open(&path).expect("open");
            store
                .insert_event(&event(1, EventType::Deletion, EntityKind::Space, 1))
                .expect("insert");
        }
        let store = SqliteDataSource::open(&path).expect("reopen");
        let summary = store.summary().expect("summary");
        assert_eq!(summary.events, 1);
        assert_eq!(summary.events_search, 0);
    }
}
