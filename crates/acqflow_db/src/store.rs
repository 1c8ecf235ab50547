//! Job store trait.

use crate::error::Result;
use crate::types::{DataContainer, Dataset, Job, NewDataset};
use acqflow_protocol::{JobStatus, TaskKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Transactional table of jobs, data containers and datasets.
///
/// Each method commits before returning.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Lowest-id `new` job (optionally of one task kind) that has no
    /// lower-id `new` or `active` job on the same container.
    ///
    /// The ordering predicate ignores the task filter: a pending job of any
    /// kind blocks later jobs on its container.
    async fn next_eligible_job(&self, task: Option<TaskKind>) -> Result<Option<Job>>;

    /// Transition a job `new → active`.
    ///
    /// Returns `false` if the job was no longer `new`.
    async fn claim_job(&self, job_id: i64) -> Result<bool>;

    /// Transition a job `active → done|failed`.
    async fn finish_job(&self, job_id: i64, status: JobStatus) -> Result<()>;

    /// Reset every `active` job (optionally of one task kind) to `new`.
    ///
    /// Returns the jobs as they were before the reset.
    async fn reset_active_jobs(&self, task: Option<TaskKind>) -> Result<Vec<Job>>;

    async fn get_job(&self, job_id: i64) -> Result<Option<Job>>;

    /// Most recent jobs first.
    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>>;

    /// Add a `new` job for a container.
    async fn enqueue_job(&self, container_id: i64, task: TaskKind) -> Result<Job>;

    async fn create_container(
        &self,
        name: &str,
        timestamp: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<DataContainer>;

    async fn get_container(&self, container_id: i64) -> Result<Option<DataContainer>>;

    /// Insert a dataset. A `primary` dataset also becomes its container's
    /// primary dataset, in the same transaction.
    async fn create_dataset(&self, dataset: NewDataset) -> Result<Dataset>;

    async fn get_dataset(&self, dataset_id: i64) -> Result<Option<Dataset>>;

    async fn primary_dataset(&self, container_id: i64) -> Result<Option<Dataset>>;

    async fn list_datasets(&self, container_id: i64) -> Result<Vec<Dataset>>;

    /// Increment a dataset's actual file count by one; returns the new count.
    async fn record_file_copied(&self, dataset_id: i64) -> Result<i64>;
}
