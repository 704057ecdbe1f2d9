use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::sql::DatabaseLocation;

const DEFAULT_QUEUE_IDLE_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub database: DatabaseLocation,
    /// How long an idle queue lane keeps its worker.
    pub queue_idle: Duration,
    pub notifications: bool,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("home directory not found"))?;
        let database = std::env::var("JOBSYNC_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_database_path);
        Ok(Self {
            database: DatabaseLocation::File(database),
            queue_idle: Duration::from_millis(read_u64_env(
                "JOBSYNC_QUEUE_IDLE_MS",
                DEFAULT_QUEUE_IDLE_MS,
            )),
            notifications: read_bool_env("JOBSYNC_NOTIFY", true),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            database: DatabaseLocation::Memory,
            queue_idle: Duration::from_millis(DEFAULT_QUEUE_IDLE_MS),
            notifications: false,
        }
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jobsync")
        .join("jobsync.db")
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
