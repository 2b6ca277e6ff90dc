//! SQLite event store.
//!
//! Connections are opened with `journal_mode = WAL`, `synchronous = NORMAL`,
//! `foreign_keys = ON` and a 5s busy timeout.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

use crate::error::SchemaTooNew;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the store, apply runtime pragmas and migrate the schema
/// to the latest version.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails,
/// or if the file was written by a newer schema.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let conn =
        Connection::open(path).with_context(|| format!("open store {}", path.display()))?;
    prepare(conn)
}

/// In-memory store with the full schema applied.
///
/// # Errors
///
/// Returns an error if configuring or migrating the database fails.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory store")?;
    prepare(conn)
}

/// Open an existing store, or `None` when the file is missing or unreadable.
///
/// # Errors
///
/// Returns an error only when the store exists but its schema is newer than
/// this binary.
pub fn try_open_store(path: &Path) -> Result<Option<Connection>> {
    if !path.exists() {
        return Ok(None);
    }

    match Connection::open(path) {
        Ok(conn) => {
            let version = migrations::current_schema_version(&conn);
            match version {
                Ok(v) if v > migrations::LATEST_SCHEMA_VERSION => Err(anyhow::Error::new(
                    SchemaTooNew {
                        found: v,
                        latest: migrations::LATEST_SCHEMA_VERSION,
                    },
                )
                .context(format!("open store {}", path.display()))),
                Ok(_) => prepare(conn).map(Some),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "store unreadable");
                    Ok(None)
                }
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open store");
            Ok(None)
        }
    }
}

fn prepare(mut conn: Connection) -> Result<Connection> {
    configure_connection(&conn).context("configure sqlite pragmas")?;

    let current = migrations::current_schema_version(&conn).context("read schema version")?;
    if current > migrations::LATEST_SCHEMA_VERSION {
        return Err(SchemaTooNew {
            found: current,
            latest: migrations::LATEST_SCHEMA_VERSION,
        }
        .into());
    }

    let applied = migrations::migrate(&mut conn).context("apply store migrations")?;
    if applied != current {
        tracing::debug!(from = current, to = applied, "migrated event store");
    }
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}
