pub mod import;
pub mod run;
pub mod status;

use anyhow::Result;
use evsearch_core::config::Config;
use evsearch_core::db;
use evsearch_core::error::ErrorCode;
use evsearch_core::source::SqliteDataSource;
use std::path::{Path, PathBuf};

use crate::output::{CliError, OutputMode, render_error};

/// `--db` wins over the configured path.
pub fn store_path(flag: Option<&Path>, config: &Config) -> PathBuf {
    flag.map_or_else(|| config.database.path.clone(), Path::to_path_buf)
}

/// Open an existing store, reporting a missing one the same way everywhere.
pub fn open_existing(path: &Path, output: OutputMode) -> Result<SqliteDataSource> {
    match db::try_open_store(path)? {
        Some(conn) => Ok(SqliteDataSource::from_connection(conn)),
        None => {
            render_error(
                output,
                &CliError::from_code(
                    ErrorCode::StoreNotInitialized,
                    format!("no event store at {}", path.display()),
                ),
            )?;
            anyhow::bail!("event store not found");
        }
    }
}
