//! Configuration for the scheduler

use crate::error::{PipelineError, Result};
use acqflow_protocol::defaults::{
    DEFAULT_DATABASE_URL, DEFAULT_DICOM_CONVERTER_COMMAND, DEFAULT_MAX_JOBS,
    DEFAULT_PFILE_CONVERTER_COMMAND, DEFAULT_PHYSIO_WINDOW_SECS, DEFAULT_PYRAMID_COMMAND,
    DEFAULT_SCHEDULER_POLL_SECS,
};
use acqflow_protocol::TaskKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Job store URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Root that dataset `relpath`s are relative to
    pub data_root: PathBuf,

    /// Directory holding physiological recordings
    pub physio_path: PathBuf,

    /// Only run jobs of this kind
    #[serde(default)]
    pub task: Option<TaskKind>,

    /// Maximum concurrently running pipelines
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_dicom_converter")]
    pub dicom_converter_command: String,

    #[serde(default = "default_pfile_converter")]
    pub pfile_converter_command: String,

    #[serde(default = "default_pyramid_command")]
    pub pyramid_command: String,

    /// Physio files are matched within this distance of the acquisition end
    #[serde(default = "default_physio_window")]
    pub physio_window_secs: u64,
}

/// `~/.acqflow/acqflow.sqlite3`, or a relative file when there is no home directory.
pub fn default_database_url() -> String {
    dirs::home_dir()
        .map(|h| h.join(".acqflow").join("acqflow.sqlite3"))
        .map(|p| format!("sqlite:{}", p.to_string_lossy()))
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

fn default_max_jobs() -> usize {
    DEFAULT_MAX_JOBS
}

fn default_poll_interval() -> u64 {
    DEFAULT_SCHEDULER_POLL_SECS
}

fn default_dicom_converter() -> String {
    DEFAULT_DICOM_CONVERTER_COMMAND.to_string()
}

fn default_pfile_converter() -> String {
    DEFAULT_PFILE_CONVERTER_COMMAND.to_string()
}

fn default_pyramid_command() -> String {
    DEFAULT_PYRAMID_COMMAND.to_string()
}

fn default_physio_window() -> u64 {
    DEFAULT_PHYSIO_WINDOW_SECS
}

impl SchedulerConfig {
    pub fn new(data_root: impl Into<PathBuf>, physio_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: default_database_url(),
            data_root: data_root.into(),
            physio_path: physio_path.into(),
            task: None,
            max_jobs: default_max_jobs(),
            poll_interval_secs: default_poll_interval(),
            dicom_converter_command: default_dicom_converter(),
            pfile_converter_command: default_pfile_converter(),
            pyramid_command: default_pyramid_command(),
            physio_window_secs: default_physio_window(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig =
            toml::from_str(&content).map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(config)
    }

    /// At least one pipeline always runs.
    pub fn effective_max_jobs(&self) -> usize {
        self.max_jobs.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn physio_window(&self) -> Duration {
        Duration::from_secs(self.physio_window_secs)
    }
}
