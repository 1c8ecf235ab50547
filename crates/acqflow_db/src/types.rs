//! Rows of the job store as domain types.

use acqflow_protocol::{DataFormat, DatasetKind, JobStatus, TaskKind};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// A unit of scheduled work against a data container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: i64,
    pub task: TaskKind,
    pub status: JobStatus,
    pub container_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Job {}: {} container={} [{}]>",
            self.id, self.task, self.container_id, self.status
        )
    }
}

/// Logical acquisition unit (one imaging series).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataContainer {
    pub id: i64,
    pub name: String,
    /// Acquisition start.
    pub timestamp: DateTime<Utc>,
    pub duration_secs: i64,
    pub primary_dataset_id: Option<i64>,
}

impl DataContainer {
    /// End of the acquisition window.
    pub fn acquisition_end(&self) -> DateTime<Utc> {
        self.timestamp + Duration::seconds(self.duration_secs)
    }
}

/// A typed collection of files attached to a data container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub id: i64,
    pub container_id: i64,
    pub kind: DatasetKind,
    pub format: DataFormat,
    pub label: String,
    /// Storage directory, relative to the data root.
    pub relpath: String,
    pub file_cnt_tgt: i64,
    pub file_cnt_act: i64,
    /// Pulse sequence name of the acquisition (acquisition-type metadata).
    pub psd: Option<String>,
    /// Whether physiological recordings were captured alongside.
    pub physio_flag: bool,
}

impl Dataset {
    pub fn is_complete(&self) -> bool {
        self.file_cnt_act == self.file_cnt_tgt
    }
}

/// Parameters for [`crate::JobStore::create_dataset`].
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub container_id: i64,
    pub kind: DatasetKind,
    pub format: DataFormat,
    pub label: String,
    pub relpath: String,
    pub file_cnt_tgt: i64,
    pub psd: Option<String>,
    pub physio_flag: bool,
}

impl NewDataset {
    pub fn new(
        container_id: i64,
        kind: DatasetKind,
        format: DataFormat,
        label: impl Into<String>,
        relpath: impl Into<String>,
    ) -> Self {
        Self {
            container_id,
            kind,
            format,
            label: label.into(),
            relpath: relpath.into(),
            file_cnt_tgt: 0,
            psd: None,
            physio_flag: false,
        }
    }

    pub fn with_target(mut self, file_cnt_tgt: i64) -> Self {
        self.file_cnt_tgt = file_cnt_tgt;
        self
    }

    pub fn with_psd(mut self, psd: impl Into<String>) -> Self {
        self.psd = Some(psd.into());
        self
    }

    pub fn with_physio(mut self, physio_flag: bool) -> Self {
        self.physio_flag = physio_flag;
        self
    }
}
