//! Shared vocabulary for the acqflow daemons.
//!
//! Job, dataset and format enums are stored as lowercase text in the job
//! store and used verbatim in log lines, so their string forms are stable.

pub mod cancel;
pub mod defaults;
pub mod types;

pub use cancel::CancellationToken;
pub use types::{DataFormat, DatasetKind, JobStatus, ParseEnumError, TaskKind};
