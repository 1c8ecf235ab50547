//! Canonical default values shared by the daemons and the CLI.

/// Name pattern of instrument acquisition files in the source directory.
pub const DEFAULT_ACQUISITION_PATTERN: &str = "P?????.7";
/// Bytes read from a companion file to compare against the series identity.
pub const DEFAULT_COMPANION_PREFIX_LEN: usize = 32;
pub const DEFAULT_REAPER_POLL_SECS: u64 = 30;
pub const DEFAULT_SCHEDULER_POLL_SECS: u64 = 10;
pub const DEFAULT_MAX_JOBS: usize = 1;
pub const DEFAULT_PHYSIO_WINDOW_SECS: u64 = 60;
pub const DEFAULT_DATABASE_URL: &str = "sqlite:acqflow.sqlite3";

pub const REAP_STAGE_DIR: &str = "reap";
pub const SORT_STAGE_DIR: &str = "sort";

pub const DEFAULT_HEADER_COMMAND: &str = "acqflow-pfile-header";
pub const DEFAULT_DICOM_CONVERTER_COMMAND: &str = "acqflow-dicom2nifti";
pub const DEFAULT_PFILE_CONVERTER_COMMAND: &str = "acqflow-pfile2nifti";
pub const DEFAULT_PYRAMID_COMMAND: &str = "acqflow-pyramid";

/// Dataset labels written by the pipelines.
pub const PHYSIO_DATASET_LABEL: &str = "Physio Data";
pub const VOLUME_DATASET_LABEL: &str = "NIfTI (raw)";
pub const PYRAMID_DATASET_LABEL: &str = "Image Pyramid";
