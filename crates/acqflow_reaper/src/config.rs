//! Configuration for the reaper

use crate::error::{ReaperError, Result};
use acqflow_protocol::defaults::{
    DEFAULT_ACQUISITION_PATTERN, DEFAULT_COMPANION_PREFIX_LEN, DEFAULT_HEADER_COMMAND,
    DEFAULT_REAPER_POLL_SECS, REAP_STAGE_DIR, SORT_STAGE_DIR,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reaper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Staging root; `reap/` and `sort/` live under it
    pub stage_path: PathBuf,

    /// Source directory the instrument writes into
    pub data_path: PathBuf,

    /// Acquisition file name pattern
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Only capture acquisitions whose patient id matches (glob, `*` wildcard)
    #[serde(default)]
    pub patient_filter: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Instance id; defaults to the last component of `data_path`
    #[serde(default)]
    pub reaper_id: Option<String>,

    /// Defaults to `<stage_path>/.<reaper_id>.datetime`
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    /// External header parser, run as `<command> <file>`
    #[serde(default = "default_header_command")]
    pub header_command: String,

    /// Identity prefix length read from companion files
    #[serde(default = "default_companion_prefix_len")]
    pub companion_prefix_len: usize,
}

fn default_pattern() -> String {
    DEFAULT_ACQUISITION_PATTERN.to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_REAPER_POLL_SECS
}

fn default_header_command() -> String {
    DEFAULT_HEADER_COMMAND.to_string()
}

fn default_companion_prefix_len() -> usize {
    DEFAULT_COMPANION_PREFIX_LEN
}

impl ReaperConfig {
    pub fn new(stage_path: impl Into<PathBuf>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            stage_path: stage_path.into(),
            data_path: data_path.into(),
            pattern: default_pattern(),
            patient_filter: None,
            poll_interval_secs: default_poll_interval(),
            reaper_id: None,
            checkpoint_path: None,
            header_command: default_header_command(),
            companion_prefix_len: default_companion_prefix_len(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReaperConfig =
            toml::from_str(&content).map_err(|e| ReaperError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Instance id used to name capture directories and the checkpoint file.
    pub fn resolved_reaper_id(&self) -> Result<String> {
        if let Some(id) = self.reaper_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        // file_name() ignores a trailing slash
        self.data_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ReaperError::Config(format!(
                    "cannot derive reaper id from data path {}",
                    self.data_path.display()
                ))
            })
    }

    pub fn resolved_checkpoint_path(&self) -> Result<PathBuf> {
        match &self.checkpoint_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self
                .stage_path
                .join(format!(".{}.datetime", self.resolved_reaper_id()?))),
        }
    }

    pub fn reap_stage(&self) -> PathBuf {
        self.stage_path.join(REAP_STAGE_DIR)
    }

    pub fn sort_stage(&self) -> PathBuf {
        self.stage_path.join(SORT_STAGE_DIR)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
