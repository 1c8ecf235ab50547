//! `acqflow reaper`: watch a scanner directory and publish stable acquisitions.

use acqflow_protocol::CancellationToken;
use acqflow_reaper::{Reaper, ReaperConfig, REAPER_METRICS};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug)]
pub struct ReaperArgs {
    pub stage_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub patient_filter: Option<String>,
    pub sleeptime: Option<u64>,
    pub id: Option<String>,
    pub pattern: Option<String>,
    pub header_command: Option<String>,
    pub checkpoint: Option<PathBuf>,
}

/// Merge the config file (if any) with command-line overrides.
pub fn build_config(args: ReaperArgs) -> Result<ReaperConfig> {
    let mut config = match (&args.config, &args.stage_path, &args.data_path) {
        (Some(path), _, _) => ReaperConfig::load(path)
            .with_context(|| format!("Failed to load reaper config {}", path.display()))?,
        (None, Some(stage), Some(data)) => ReaperConfig::new(stage, data),
        (None, _, _) => bail!("stage_path and data_path are required without --config"),
    };

    if let Some(stage) = args.stage_path {
        config.stage_path = stage;
    }
    if let Some(data) = args.data_path {
        config.data_path = data;
    }
    if args.patient_filter.is_some() {
        config.patient_filter = args.patient_filter;
    }
    if let Some(secs) = args.sleeptime {
        config.poll_interval_secs = secs;
    }
    if args.id.is_some() {
        config.reaper_id = args.id;
    }
    if let Some(pattern) = args.pattern {
        config.pattern = pattern;
    }
    if let Some(command) = args.header_command {
        config.header_command = command;
    }
    if args.checkpoint.is_some() {
        config.checkpoint_path = args.checkpoint;
    }
    Ok(config)
}

pub fn run(args: ReaperArgs, token: &CancellationToken) -> Result<()> {
    let config = build_config(args)?;
    info!(
        stage = %config.stage_path.display(),
        data = %config.data_path.display(),
        "Starting reaper"
    );

    let mut reaper = Reaper::from_config(&config).context("Failed to start reaper")?;

    let result = reaper.run(token);
    warn!("Process halted: {}", REAPER_METRICS.summary());
    result.context("Reaper stopped with an error")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ReaperArgs {
        ReaperArgs {
            stage_path: None,
            data_path: None,
            config: None,
            patient_filter: None,
            sleeptime: None,
            id: None,
            pattern: None,
            header_command: None,
            checkpoint: None,
        }
    }

    #[test]
    fn test_positional_paths_without_config() {
        let config = build_config(ReaperArgs {
            stage_path: Some("/stage".into()),
            data_path: Some("/scanner/raw".into()),
            sleeptime: Some(5),
            patient_filter: Some("ex*".into()),
            ..args()
        })
        .unwrap();

        assert_eq!(config.stage_path, PathBuf::from("/stage"));
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.patient_filter.as_deref(), Some("ex*"));
        assert_eq!(config.resolved_reaper_id().unwrap(), "raw");
    }

    #[test]
    fn test_missing_paths_is_an_error() {
        assert!(build_config(args()).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reaper.toml");
        std::fs::write(
            &path,
            "stage_path = \"/stage\"\ndata_path = \"/scanner/raw\"\npoll_interval_secs = 60\n",
        )
        .unwrap();

        let config = build_config(ReaperArgs {
            config: Some(path),
            sleeptime: Some(2),
            id: Some("mr1".into()),
            ..args()
        })
        .unwrap();

        assert_eq!(config.data_path, PathBuf::from("/scanner/raw"));
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.resolved_reaper_id().unwrap(), "mr1");
    }
}
