//! `acqflow scheduler`: run queued jobs through their format pipelines.

use crate::cli::open_store;
use acqflow_db::JobStore;
use acqflow_protocol::{CancellationToken, TaskKind};
use acqflow_scheduler::{
    PipelineEnv, Scheduler, SchedulerConfig, SchedulerOptions, SCHEDULER_METRICS,
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct SchedulerArgs {
    pub data_root: Option<PathBuf>,
    pub physio_path: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub database: Option<String>,
    pub task: Option<TaskKind>,
    pub jobs: Option<usize>,
    pub sleeptime: Option<u64>,
    pub dicom_converter: Option<String>,
    pub pfile_converter: Option<String>,
    pub pyramid_command: Option<String>,
}

/// Merge the config file (if any) with command-line overrides.
pub fn build_config(args: SchedulerArgs) -> Result<SchedulerConfig> {
    let mut config = match (&args.config, &args.data_root, &args.physio_path) {
        (Some(path), _, _) => SchedulerConfig::load(path)
            .with_context(|| format!("Failed to load scheduler config {}", path.display()))?,
        (None, Some(root), Some(physio)) => SchedulerConfig::new(root, physio),
        (None, _, _) => bail!("data_root and physio_path are required without --config"),
    };

    if let Some(root) = args.data_root {
        config.data_root = root;
    }
    if let Some(physio) = args.physio_path {
        config.physio_path = physio;
    }
    if let Some(url) = args.database {
        config.database_url = url;
    }
    if args.task.is_some() {
        config.task = args.task;
    }
    if let Some(jobs) = args.jobs {
        config.max_jobs = jobs;
    }
    if let Some(secs) = args.sleeptime {
        config.poll_interval_secs = secs;
    }
    if let Some(command) = args.dicom_converter {
        config.dicom_converter_command = command;
    }
    if let Some(command) = args.pfile_converter {
        config.pfile_converter_command = command;
    }
    if let Some(command) = args.pyramid_command {
        config.pyramid_command = command;
    }
    Ok(config)
}

pub fn run(args: SchedulerArgs, token: &CancellationToken) -> Result<()> {
    let config = build_config(args)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = rt.block_on(async {
        let store: Arc<dyn JobStore> = Arc::new(open_store(&config.database_url).await?);
        info!(
            database = %config.database_url,
            data_root = %config.data_root.display(),
            "Starting scheduler"
        );

        let env = Arc::new(PipelineEnv::from_config(&config, store));
        let mut scheduler = Scheduler::new(env, SchedulerOptions::from(&config));
        scheduler
            .run(token)
            .await
            .context("Scheduler stopped with an error")
    });

    warn!("Process halted: {}", SCHEDULER_METRICS.summary());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SchedulerArgs {
        SchedulerArgs {
            data_root: None,
            physio_path: None,
            config: None,
            database: None,
            task: None,
            jobs: None,
            sleeptime: None,
            dicom_converter: None,
            pfile_converter: None,
            pyramid_command: None,
        }
    }

    #[test]
    fn test_positional_paths_without_config() {
        let config = build_config(SchedulerArgs {
            data_root: Some("/nims".into()),
            physio_path: Some("/physio".into()),
            database: Some("sqlite::memory:".into()),
            task: Some(TaskKind::Process),
            jobs: Some(4),
            ..args()
        })
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.task, Some(TaskKind::Process));
        assert_eq!(config.effective_max_jobs(), 4);
    }

    #[test]
    fn test_missing_paths_is_an_error() {
        assert!(build_config(SchedulerArgs {
            data_root: Some("/nims".into()),
            ..args()
        })
        .is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scheduler.toml");
        std::fs::write(
            &path,
            "data_root = \"/nims\"\nphysio_path = \"/physio\"\nmax_jobs = 2\ntask = \"discover\"\n",
        )
        .unwrap();

        let config = build_config(SchedulerArgs {
            config: Some(path),
            jobs: Some(8),
            pyramid_command: Some("tiler".into()),
            ..args()
        })
        .unwrap();

        assert_eq!(config.max_jobs, 8);
        assert_eq!(config.task, Some(TaskKind::Discover));
        assert_eq!(config.pyramid_command, "tiler");
        assert_eq!(config.physio_path, PathBuf::from("/physio"));
    }
}
