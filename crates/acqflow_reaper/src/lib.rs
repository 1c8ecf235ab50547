//! Acquisition file reaper.
//!
//! Watches an instrument's output directory, waits until each acquisition
//! file stops growing, then copies it (with its companion files) into a
//! private staging directory and publishes that directory into the sort
//! stage with a single rename. A modification-time checkpoint keeps
//! restarts from rescanning what was already captured.

pub mod candidate;
pub mod capture;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod header;
pub mod metrics;
pub mod reaper;
pub mod tracker;

pub use candidate::{hrsize, scan_candidates, ReapCandidate};
pub use capture::Stager;
pub use checkpoint::CheckpointStore;
pub use config::ReaperConfig;
pub use error::{ReaperError, Result};
pub use header::{AcquisitionHeader, CommandHeaderParser, HeaderParser, PatientFilter};
pub use metrics::REAPER_METRICS;
pub use reaper::{CaptureOutcome, PollSummary, Reaper};
pub use tracker::{Classification, StabilityTracker};
