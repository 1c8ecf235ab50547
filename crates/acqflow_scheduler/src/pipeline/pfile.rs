use super::{output_stem, Pipeline, PipelineEnv};
use crate::error::{PipelineError, Result};
use acqflow_db::{Job, NewDataset};
use acqflow_protocol::defaults::VOLUME_DATASET_LABEL;
use acqflow_protocol::{DataFormat, DatasetKind};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Pulse sequences the raw-file converter can reconstruct (spiral).
const CONVERTIBLE_PSD: &str = "sprt";

/// Vendor raw file: only spiral acquisitions are converted; other
/// sequences finish with no derived data.
pub struct PFilePipeline {
    env: Arc<PipelineEnv>,
}

impl PFilePipeline {
    pub fn new(env: Arc<PipelineEnv>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Pipeline for PFilePipeline {
    async fn discover(&self, job: &Job) -> Result<()> {
        self.env.attach_physio(job).await.map(|_| ())
    }

    async fn convert(&self, job: &Job) -> Result<()> {
        let env = &self.env;
        let (container, primary) = env.load_target(job).await?;

        let psd = primary.psd.as_deref().unwrap_or_default();
        if !psd.contains(CONVERTIBLE_PSD) {
            info!(job_id = job.id, psd, "{}: nothing to convert", job.id);
            return Ok(());
        }

        let input = first_file(&env.dataset_path(&primary)).await?;
        let output = tempfile::tempdir()?;
        let output_base = output.path().join(output_stem(&container));
        env.pfile_converter
            .convert(&input, &output_base)
            .await?
            .ok_or_else(|| PipelineError::Convert("PFile conversion produced no volume".into()))?;

        let dataset = env
            .import_tree(
                NewDataset::new(
                    container.id,
                    DatasetKind::Derived,
                    DataFormat::Nifti,
                    VOLUME_DATASET_LABEL,
                    super::allocate_relpath(),
                ),
                output.path(),
            )
            .await?;
        info!(
            job_id = job.id,
            dataset_id = dataset.id,
            files = dataset.file_cnt_act,
            "{}: PFile converted",
            job.id
        );
        Ok(())
    }
}

/// First regular file (by name) in a dataset directory.
async fn first_file(dir: &std::path::Path) -> Result<PathBuf> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    files.into_iter().next().ok_or_else(|| {
        PipelineError::Convert(format!("primary dataset {} is empty", dir.display()))
    })
}
