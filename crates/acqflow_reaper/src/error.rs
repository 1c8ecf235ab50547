//! Error types for the reaper

use std::io;
use thiserror::Error;

/// Reaper error type
#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The external header parser failed or produced unreadable output
    #[error("Header error: {0}")]
    Header(String),

    #[error("Config error: {0}")]
    Config(String),

    /// Shutdown was requested while a capture was in progress
    #[error("Cancelled")]
    Cancelled,

    #[error("Pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ReaperError>;
