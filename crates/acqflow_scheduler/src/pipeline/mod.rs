//! Format pipelines.
//!
//! Every pipeline runs the same two stages:
//!
//! - `discover`: attach physiological recordings for the acquisition as a
//!   `secondary` dataset.
//! - `convert`: run the format's converter and attach its output as
//!   `derived` datasets.
//!
//! The variant is picked from the format of the container's primary
//! dataset. Dataset files are copied one at a time and the actual file
//! count is committed after each copy, so partial progress is visible in
//! the store.

mod dicom;
mod pfile;

pub use dicom::DicomPipeline;
pub use pfile::PFilePipeline;

use crate::config::SchedulerConfig;
use crate::convert::{
    CommandPyramidRenderer, CommandVolumeConverter, PyramidRenderer, VolumeConverter,
};
use crate::error::{PipelineError, Result};
use crate::metrics::SCHEDULER_METRICS;
use crate::physio::{DirectoryPhysioLocator, PhysioLocator};
use acqflow_db::{DataContainer, Dataset, DbError, Job, JobStore, NewDataset};
use acqflow_protocol::defaults::PHYSIO_DATASET_LABEL;
use acqflow_protocol::{DataFormat, DatasetKind, JobStatus, TaskKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// The two-stage pipeline contract.
///
/// `Ok` marks the job `done`; any error marks it `failed`.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn discover(&self, job: &Job) -> Result<()>;
    async fn convert(&self, job: &Job) -> Result<()>;
}

/// Collaborators shared by all pipelines.
pub struct PipelineEnv {
    pub store: Arc<dyn JobStore>,
    /// Dataset `relpath`s are relative to this directory
    pub data_root: PathBuf,
    pub physio: Arc<dyn PhysioLocator>,
    pub dicom_converter: Arc<dyn VolumeConverter>,
    pub pfile_converter: Arc<dyn VolumeConverter>,
    pub renderer: Arc<dyn PyramidRenderer>,
}

impl PipelineEnv {
    /// Wire the command-line tool adapters named in `config`.
    pub fn from_config(config: &SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            data_root: config.data_root.clone(),
            physio: Arc::new(DirectoryPhysioLocator::new(
                config.physio_path.clone(),
                config.physio_window(),
            )),
            dicom_converter: Arc::new(CommandVolumeConverter::new(
                config.dicom_converter_command.clone(),
            )),
            pfile_converter: Arc::new(CommandVolumeConverter::new(
                config.pfile_converter_command.clone(),
            )),
            renderer: Arc::new(CommandPyramidRenderer::new(config.pyramid_command.clone())),
        }
    }

    /// The job's container and its primary dataset.
    pub async fn load_target(&self, job: &Job) -> Result<(DataContainer, Dataset)> {
        let container = self
            .store
            .get_container(job.container_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("container {}", job.container_id)))?;
        let primary = self
            .store
            .primary_dataset(job.container_id)
            .await?
            .ok_or_else(|| {
                DbError::not_found(format!("primary dataset of container {}", job.container_id))
            })?;
        Ok((container, primary))
    }

    pub fn dataset_path(&self, dataset: &Dataset) -> PathBuf {
        self.data_root.join(&dataset.relpath)
    }

    /// Attach physio recordings for the container, if the acquisition
    /// recorded any. Shared by every variant.
    pub async fn attach_physio(&self, job: &Job) -> Result<Option<Dataset>> {
        let (container, primary) = self.load_target(job).await?;
        if !primary.physio_flag {
            return Ok(None);
        }
        let psd = primary.psd.as_deref().ok_or_else(|| {
            PipelineError::Physio(format!("primary dataset {} has no psd", primary.id))
        })?;

        let files = self
            .physio
            .locate(container.acquisition_end(), psd)
            .await?;
        if files.is_empty() {
            info!(job_id = job.id, "No physio files");
            return Ok(None);
        }

        info!(
            job_id = job.id,
            "{}: physio files {}",
            job.id,
            files
                .iter()
                .map(|f| file_name(f))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let dataset = NewDataset::new(
            container.id,
            DatasetKind::Secondary,
            DataFormat::Physio,
            PHYSIO_DATASET_LABEL,
            allocate_relpath(),
        );
        let sources: Vec<(PathBuf, PathBuf)> = files
            .into_iter()
            .map(|f| {
                let name = PathBuf::from(f.file_name().unwrap_or_default());
                (f, name)
            })
            .collect();
        self.import_files(dataset, &sources).await.map(Some)
    }

    /// Create `dataset` with a target count of `files.len()`, then copy
    /// each `(source, relative destination)` pair into it, committing the
    /// actual count after every file.
    pub async fn import_files(
        &self,
        dataset: NewDataset,
        files: &[(PathBuf, PathBuf)],
    ) -> Result<Dataset> {
        let dest_root = self.data_root.join(&dataset.relpath);
        tokio::fs::create_dir_all(&dest_root).await?;

        let created = self
            .store
            .create_dataset(dataset.with_target(files.len() as i64))
            .await?;

        for (src, rel) in files {
            let dst = dest_root.join(rel);
            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(src, &dst).await?;
            self.store.record_file_copied(created.id).await?;
        }

        Ok(self.store.get_dataset(created.id).await?.unwrap_or(created))
    }

    /// Import every file under `root`, keeping the directory layout.
    pub async fn import_tree(&self, dataset: NewDataset, root: &Path) -> Result<Dataset> {
        let files = list_tree(root)?;
        self.import_files(dataset, &files).await
    }
}

/// Files under `root` as `(absolute, relative)` pairs, sorted by path.
pub(crate) fn list_tree(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;
        files.push((entry.path().to_path_buf(), rel));
    }
    Ok(files)
}

/// Fresh storage directory for a new dataset, relative to the data root.
pub(crate) fn allocate_relpath() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{}", &id[..2], id)
}

/// Container names become file name stems for converter output.
pub(crate) fn output_stem(container: &DataContainer) -> String {
    let stem: String = container
        .name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if stem.is_empty() {
        format!("container_{}", container.id)
    } else {
        stem
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Dispatch
// ============================================================================

/// Tagged dispatch over the supported acquisition formats.
pub enum FormatPipeline {
    Dicom(DicomPipeline),
    PFile(PFilePipeline),
}

impl FormatPipeline {
    /// Pipeline for a primary dataset format; `None` for formats that are
    /// never primary.
    pub fn for_format(format: DataFormat, env: Arc<PipelineEnv>) -> Option<Self> {
        match format {
            DataFormat::Dicom => Some(Self::Dicom(DicomPipeline::new(env))),
            DataFormat::PFile => Some(Self::PFile(PFilePipeline::new(env))),
            DataFormat::Nifti | DataFormat::Pyramid | DataFormat::Physio => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dicom(_) => "dicom",
            Self::PFile(_) => "pfile",
        }
    }

    /// Run the stage selected by the job's task kind.
    pub async fn execute(&self, job: &Job) -> Result<()> {
        match job.task {
            TaskKind::Discover => self.discover(job).await,
            TaskKind::Process => self.convert(job).await,
        }
    }
}

#[async_trait]
impl Pipeline for FormatPipeline {
    async fn discover(&self, job: &Job) -> Result<()> {
        match self {
            Self::Dicom(p) => p.discover(job).await,
            Self::PFile(p) => p.discover(job).await,
        }
    }

    async fn convert(&self, job: &Job) -> Result<()> {
        match self {
            Self::Dicom(p) => p.convert(job).await,
            Self::PFile(p) => p.convert(job).await,
        }
    }
}

/// Execute one claimed job and commit its terminal status.
pub async fn run_job(store: Arc<dyn JobStore>, pipeline: FormatPipeline, job: Job) {
    info!(job_id = job.id, pipeline = pipeline.name(), "{}: Running   {}", job.id, job);

    let status = match pipeline.execute(&job).await {
        Ok(()) => JobStatus::Done,
        Err(e) => {
            warn!(job_id = job.id, "{}: {}", job.id, e);
            JobStatus::Failed
        }
    };

    if let Err(e) = store.finish_job(job.id, status).await {
        error!(job_id = job.id, "{}: Cannot record status {}: {}", job.id, status, e);
        return;
    }

    match status {
        JobStatus::Done => {
            SCHEDULER_METRICS.inc_completed();
            info!(job_id = job.id, "{}: Finished  {}", job.id, job);
        }
        _ => {
            SCHEDULER_METRICS.inc_failed();
            info!(job_id = job.id, "{}: Failed    {}", job.id, job);
        }
    }
}
