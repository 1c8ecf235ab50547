//! The scheduler poll loop.
//!
//! Single active scheduler per job store. Each poll asks the store for the
//! next eligible job, claims it (committed before any work starts) and
//! spawns its pipeline as a tokio task. At most `max_jobs` pipelines run
//! at once.

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::metrics::SCHEDULER_METRICS;
use crate::pipeline::{run_job, FormatPipeline, PipelineEnv};
use acqflow_db::JobStore;
use acqflow_protocol::{CancellationToken, JobStatus, TaskKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Scheduling knobs, separate from tool wiring so tests can use
/// sub-second intervals.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub task: Option<TaskKind>,
    pub max_jobs: usize,
    pub poll_interval: Duration,
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            task: config.task,
            max_jobs: config.effective_max_jobs(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A pipeline was spawned for this job.
    Dispatched(i64),
    /// The job could not be run and was marked `failed`.
    Rejected(i64),
    /// Nothing eligible (or the job was claimed elsewhere).
    Idle,
    /// The concurrency cap is reached.
    AtCapacity,
}

pub struct Scheduler {
    env: Arc<PipelineEnv>,
    options: SchedulerOptions,
    running: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(env: Arc<PipelineEnv>, mut options: SchedulerOptions) -> Self {
        options.max_jobs = options.max_jobs.max(1);
        Self {
            env,
            options,
            running: Vec::new(),
        }
    }

    fn store(&self) -> &Arc<dyn JobStore> {
        &self.env.store
    }

    /// Number of pipelines still running.
    pub fn running(&mut self) -> usize {
        self.running.retain(|handle| !handle.is_finished());
        self.running.len()
    }

    /// Reset jobs a previous run left `active` back to `new`.
    pub async fn recover(&self) -> Result<usize> {
        let jobs = self.store().reset_active_jobs(self.options.task).await?;
        for job in &jobs {
            info!(job_id = job.id, "{}: Resetting {}", job.id, job);
        }
        SCHEDULER_METRICS.add_reset(jobs.len() as u64);
        Ok(jobs.len())
    }

    /// Run start-up recovery, then poll until `token` is cancelled. Running
    /// pipelines are awaited before returning.
    pub async fn run(&mut self, token: &CancellationToken) -> Result<()> {
        self.recover().await?;
        info!(
            max_jobs = self.options.max_jobs,
            task = ?self.options.task,
            interval_secs = self.options.poll_interval.as_secs(),
            "Scheduler started"
        );

        while !token.is_cancelled() {
            let wait = match self.poll_once().await {
                Ok(PollOutcome::Dispatched(_)) | Ok(PollOutcome::Rejected(_)) => false,
                Ok(PollOutcome::Idle) => {
                    debug!("Waiting for work...");
                    true
                }
                Ok(PollOutcome::AtCapacity) => {
                    debug!("Waiting for jobs to finish...");
                    true
                }
                Err(e) => {
                    error!("Job store poll failed: {}", e);
                    true
                }
            };
            if wait {
                sleep_unless_cancelled(token, self.options.poll_interval).await;
            }
        }

        self.drain().await;
        Ok(())
    }

    /// One scheduling decision.
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        if self.running() >= self.options.max_jobs {
            return Ok(PollOutcome::AtCapacity);
        }

        let store = self.store().clone();
        let Some(job) = store.next_eligible_job(self.options.task).await? else {
            return Ok(PollOutcome::Idle);
        };

        let pipeline = match store.primary_dataset(job.container_id).await? {
            Some(primary) => FormatPipeline::for_format(primary.format, self.env.clone())
                .ok_or_else(|| format!("no pipeline for format '{}'", primary.format)),
            None => Err(format!("container {} has no primary dataset", job.container_id)),
        };

        // Commit the claim before any work starts
        if !store.claim_job(job.id).await? {
            warn!(job_id = job.id, "{}: claimed elsewhere, skipping", job.id);
            return Ok(PollOutcome::Idle);
        }

        match pipeline {
            Ok(pipeline) => {
                SCHEDULER_METRICS.inc_dispatched();
                let handle = tokio::spawn(run_job(store, pipeline, job.clone()));
                self.running.push(handle);
                Ok(PollOutcome::Dispatched(job.id))
            }
            Err(reason) => {
                error!(job_id = job.id, "{}: {}", job.id, reason);
                store.finish_job(job.id, JobStatus::Failed).await?;
                SCHEDULER_METRICS.inc_failed();
                info!(job_id = job.id, "{}: Failed    {}", job.id, job);
                Ok(PollOutcome::Rejected(job.id))
            }
        }
    }

    /// Await every running pipeline.
    pub async fn drain(&mut self) {
        if !self.running.is_empty() {
            info!(running = self.running.len(), "Waiting for running jobs");
        }
        for handle in self.running.drain(..) {
            if let Err(e) = handle.await {
                error!("Pipeline task panicked: {}", e);
            }
        }
    }
}

/// Sleep for `duration` in short slices, ending early once cancelled.
async fn sleep_unless_cancelled(token: &CancellationToken, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    while !token.is_cancelled() {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(SLEEP_SLICE.min(deadline - now)).await;
    }
}
