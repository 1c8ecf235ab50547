//! Acquisition header parsing.
//!
//! Vendor formats are decoded by an external tool; the reaper only needs
//! the identity fields it logs and filters on.

use crate::error::{ReaperError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::process::Command;

/// Identity embedded in an acquisition file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AcquisitionHeader {
    pub patient_id: String,
    pub exam_no: i64,
    pub series_no: i64,
    pub acq_no: i64,
    /// Compared against the identity prefix of companion files
    pub series_uid: String,
}

impl fmt::Display for AcquisitionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}) {}_{}_{}",
            self.patient_id, self.exam_no, self.series_no, self.acq_no
        )
    }
}

pub trait HeaderParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<AcquisitionHeader>;
}

/// Runs `<command> <file>` and reads a JSON header from stdout.
pub struct CommandHeaderParser {
    command: String,
}

impl CommandHeaderParser {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl HeaderParser for CommandHeaderParser {
    fn parse(&self, path: &Path) -> Result<AcquisitionHeader> {
        let output = Command::new(&self.command)
            .arg(path)
            .output()
            .map_err(|e| ReaperError::Header(format!("failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(ReaperError::Header(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ReaperError::Header(format!("{}: invalid header JSON: {}", path.display(), e))
        })
    }
}

/// Glob-style patient id filter (`*` matches any run of characters).
#[derive(Debug, Clone)]
pub struct PatientFilter {
    pattern: glob::Pattern,
}

impl PatientFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: glob::Pattern::new(pattern)?,
        })
    }

    pub fn matches(&self, patient_id: &str) -> bool {
        self.pattern.matches(patient_id)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}
