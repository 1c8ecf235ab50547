//! Error types for the scheduler and pipelines

use acqflow_db::DbError;
use std::io;
use thiserror::Error;

/// Pipeline error type
///
/// Any error returned by a pipeline stage marks its job `failed`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// External converter or renderer failed or produced nothing
    #[error("Convert error: {0}")]
    Convert(String),

    /// Side-channel lookup failed
    #[error("Physio error: {0}")]
    Physio(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<walkdir::Error> for PipelineError {
    fn from(e: walkdir::Error) -> Self {
        Self::Io(e.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;
