//! Physiological recording lookup

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Finds side-channel recordings for one acquisition.
#[async_trait]
pub trait PhysioLocator: Send + Sync {
    /// Recordings taken with pulse sequence `psd` that ended near
    /// `acquisition_end`.
    async fn locate(&self, acquisition_end: DateTime<Utc>, psd: &str) -> Result<Vec<PathBuf>>;
}

/// Scans one flat directory.
///
/// A file matches when its name contains `_<psd>_` and its modification
/// time is within `window` of the acquisition end.
pub struct DirectoryPhysioLocator {
    dir: PathBuf,
    window: Duration,
}

impl DirectoryPhysioLocator {
    pub fn new(dir: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            dir: dir.into(),
            window,
        }
    }
}

#[async_trait]
impl PhysioLocator for DirectoryPhysioLocator {
    async fn locate(&self, acquisition_end: DateTime<Utc>, psd: &str) -> Result<Vec<PathBuf>> {
        let needle = format!("_{psd}_");
        let window = chrono::Duration::from_std(self.window)
            .map_err(|e| PipelineError::Physio(format!("invalid window: {e}")))?;

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            PipelineError::Physio(format!("cannot read {}: {}", self.dir.display(), e))
        })?;

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().contains(&needle) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let mtime: DateTime<Utc> = meta.modified()?.into();
            let delta = (mtime - acquisition_end).abs();
            if delta <= window {
                found.push(entry.path());
            } else {
                debug!(file = %name.to_string_lossy(), "Physio file outside window");
            }
        }
        found.sort();
        Ok(found)
    }
}
