//! Subcommand implementations for the acqflow binary.

pub mod jobs;
pub mod reaper;
pub mod scheduler;

use acqflow_db::SqliteJobStore;
use anyhow::{Context, Result};

/// Store URL from the flag or environment, else the per-user default.
pub fn resolve_database_url(database: Option<String>) -> String {
    database.unwrap_or_else(acqflow_scheduler::config::default_database_url)
}

pub async fn open_store(url: &str) -> Result<SqliteJobStore> {
    SqliteJobStore::open(url)
        .await
        .with_context(|| format!("Failed to open job store at {}", url))
}
