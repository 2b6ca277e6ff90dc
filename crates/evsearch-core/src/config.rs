use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Rows loaded per batch when nothing else is configured.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "evsearch.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl TaskConfig {
    /// Build from a scheduler properties bag; only `batch-size` /
    /// `batch_size` is read, everything else is ignored. An invalid batch
    /// size is logged and the default kept.
    #[must_use]
    pub fn from_properties(properties: &HashMap<String, String>) -> Self {
        let raw = properties
            .get("batch-size")
            .or_else(|| properties.get("batch_size"));
        let Some(raw) = raw else {
            return Self::default();
        };
        match parse_batch_size(raw) {
            Ok(batch_size) => Self { batch_size },
            Err(err) => {
                warn!(value = %raw, error = %err, "ignoring batch size property");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Load `evsearch.toml` from `path`, falling back to defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<Config>(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Per-user config file, `~/.config/evsearch/config.toml` on Linux.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("evsearch/config.toml"))
}

/// Resolve the effective config: explicit file, else `./evsearch.toml`, else
/// the user config; then `EVSEARCH_BATCH_SIZE` and `EVSEARCH_DB` from `env`.
///
/// # Errors
///
/// Returns an error if a config file cannot be parsed or an override is
/// invalid.
pub fn resolve_config<F>(explicit: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() {
                load_config(&local)?
            } else if let Some(user) = user_config_path() {
                load_config(&user)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(raw) = env("EVSEARCH_BATCH_SIZE") {
        config.task.batch_size =
            parse_batch_size(&raw).context("invalid EVSEARCH_BATCH_SIZE")?;
    }
    if let Some(path) = env("EVSEARCH_DB") {
        config.database.path = PathBuf::from(path);
    }

    Ok(config)
}

fn parse_batch_size(raw: &str) -> Result<usize> {
    let size: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("batch size '{raw}' is not a number"))?;
    anyhow::ensure!(size > 0, "batch size must be positive");
    Ok(size)
}

const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_database_path() -> PathBuf {
    PathBuf::from("evsearch.sqlite3")
}
