//! Core enums shared by the job store, the reaper and the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a stored or user-supplied string names no variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s.to_lowercase().as_str() {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s).ok_or_else(|| ParseEnumError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

// ============================================================================
// Jobs
// ============================================================================

/// What a job asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Locate and attach side-channel data (physio recordings).
    Discover,
    /// Convert the primary data into derived artifacts.
    Process,
}

string_enum!(TaskKind, "task kind", {
    Discover => "discover",
    Process => "process",
});

/// Lifecycle status of a job.
///
/// `new → active → {done, failed}`. `active → new` happens only through
/// scheduler start-up recovery. `done` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    Active,
    Done,
    Failed,
}

string_enum!(JobStatus, "job status", {
    New => "new",
    Active => "active",
    Done => "done",
    Failed => "failed",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self → next` is a transition the scheduler or a pipeline may
    /// make. Start-up recovery (`Active → New`) is handled separately by the
    /// store.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::New => next == Self::Active,
            Self::Active => next.is_terminal(),
            Self::Done | Self::Failed => false,
        }
    }
}

// ============================================================================
// Datasets
// ============================================================================

/// Role of a dataset within its data container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Primary,
    Secondary,
    Derived,
}

string_enum!(DatasetKind, "dataset kind", {
    Primary => "primary",
    Secondary => "secondary",
    Derived => "derived",
});

/// On-disk format of a dataset's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// DICOM series (one file per slice)
    Dicom,
    /// Vendor raw acquisition file
    PFile,
    /// Standard volumetric format produced by conversion
    Nifti,
    /// Multi-resolution tile set rendered from a volume
    Pyramid,
    /// Physiological recordings
    Physio,
}

string_enum!(DataFormat, "data format", {
    Dicom => "dicom",
    PFile => "pfile",
    Nifti => "nifti",
    Pyramid => "pyramid",
    Physio => "physio",
});

impl DataFormat {
    /// Formats that can be the primary dataset of a container and therefore
    /// select a pipeline variant.
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::Dicom | Self::PFile)
    }
}
