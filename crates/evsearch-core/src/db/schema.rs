//! Event store schema.
//!
//! - `spaces`, `projects`, `experiments`, `samples` hold the live entities
//! - `relationship_history` keeps every closed or open ownership relation of
//!   a live project, experiment or sample
//! - `events` is the append-only raw event log
//! - `events_search` holds the enriched rows, one per `(event_id, identifier)`
//!
//! All timestamps are stored as UTC microseconds (`*_us` columns).

/// Migration v1: live entities, event log and enriched output.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS spaces (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    registration_timestamp_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    perm_id TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    space_code TEXT NOT NULL,
    registration_timestamp_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS experiments (
    perm_id TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    project_perm_id TEXT NOT NULL,
    registration_timestamp_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    perm_id TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    space_code TEXT,
    project_perm_id TEXT,
    experiment_perm_id TEXT,
    registration_timestamp_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS relationship_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_kind TEXT NOT NULL CHECK (entity_kind IN ('PROJECT', 'EXPERIMENT', 'SAMPLE')),
    entity_perm_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    related_kind TEXT,
    related_id TEXT NOT NULL,
    valid_from_us INTEGER NOT NULL,
    valid_until_us INTEGER,
    CHECK (valid_until_us IS NULL OR valid_until_us >= valid_from_us)
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY,
    event_type TEXT NOT NULL CHECK (event_type IN ('DELETION', 'FREEZING', 'MOVEMENT')),
    entity_type TEXT NOT NULL,
    identifiers TEXT NOT NULL DEFAULT '[]',
    description TEXT,
    reason TEXT,
    content TEXT,
    attachment_content INTEGER,
    registerer TEXT NOT NULL,
    registration_timestamp_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events_search (
    event_id INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    event_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_space TEXT,
    entity_space_perm_id TEXT,
    entity_project TEXT,
    entity_project_perm_id TEXT,
    entity_experiment_perm_id TEXT,
    entity_sample_perm_id TEXT,
    entity_registerer TEXT,
    entity_registration_timestamp_us INTEGER,
    description TEXT,
    reason TEXT,
    content TEXT,
    attachment_content INTEGER,
    registerer TEXT NOT NULL,
    registration_timestamp_us INTEGER NOT NULL,
    PRIMARY KEY (event_id, identifier)
);

CREATE INDEX IF NOT EXISTS idx_relationship_history_entity
    ON relationship_history(entity_kind, entity_perm_id, valid_from_us);

CREATE INDEX IF NOT EXISTS idx_events_type_kind_time
    ON events(event_type, entity_type, registration_timestamp_us, id);

CREATE INDEX IF NOT EXISTS idx_events_search_type_kind_time
    ON events_search(event_type, entity_type, registration_timestamp_us);
";

/// Tables every migrated store has.
pub const REQUIRED_TABLES: &[&str] = &[
    "store_meta",
    "spaces",
    "projects",
    "experiments",
    "samples",
    "relationship_history",
    "events",
    "events_search",
];

/// Indexes expected by the watermark and batch queries.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_relationship_history_entity",
    "idx_events_type_kind_time",
    "idx_events_search_type_kind_time",
];
