//! Job scheduler and format pipelines.
//!
//! The [`Scheduler`] polls a [`acqflow_db::JobStore`] for the next eligible
//! job, enforcing per-container submission order and a concurrency cap,
//! and runs each job through the [`FormatPipeline`] matching its
//! container's primary dataset.

pub mod config;
pub mod convert;
pub mod error;
pub mod metrics;
pub mod physio;
pub mod pipeline;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use convert::{CommandPyramidRenderer, CommandVolumeConverter, PyramidRenderer, VolumeConverter};
pub use error::{PipelineError, Result};
pub use metrics::SCHEDULER_METRICS;
pub use physio::{DirectoryPhysioLocator, PhysioLocator};
pub use pipeline::{run_job, DicomPipeline, FormatPipeline, PFilePipeline, Pipeline, PipelineEnv};
pub use scheduler::{PollOutcome, Scheduler, SchedulerOptions};
