use super::{output_stem, Pipeline, PipelineEnv};
use crate::error::{PipelineError, Result};
use acqflow_db::{Job, NewDataset};
use acqflow_protocol::defaults::{PYRAMID_DATASET_LABEL, VOLUME_DATASET_LABEL};
use acqflow_protocol::{DataFormat, DatasetKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// DICOM series: convert the series directory to a volume, then render
/// an image pyramid from that volume.
pub struct DicomPipeline {
    env: Arc<PipelineEnv>,
}

impl DicomPipeline {
    pub fn new(env: Arc<PipelineEnv>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Pipeline for DicomPipeline {
    async fn discover(&self, job: &Job) -> Result<()> {
        self.env.attach_physio(job).await.map(|_| ())
    }

    async fn convert(&self, job: &Job) -> Result<()> {
        let env = &self.env;
        let (container, primary) = env.load_target(job).await?;

        let output = tempfile::tempdir()?;
        let output_base = output.path().join(output_stem(&container));
        let volume = env
            .dicom_converter
            .convert(&env.dataset_path(&primary), &output_base)
            .await?
            .ok_or_else(|| PipelineError::Convert("DICOM conversion produced no volume".into()))?;

        let volume_ds = env
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
            dataset_id = volume_ds.id,
            files = volume_ds.file_cnt_act,
            "{}: volume generated",
            job.id
        );

        let tiles = tempfile::tempdir()?;
        env.renderer.render(&volume, tiles.path()).await?;
        let pyramid_ds = env
            .import_tree(
                NewDataset::new(
                    container.id,
                    DatasetKind::Derived,
                    DataFormat::Pyramid,
                    PYRAMID_DATASET_LABEL,
                    super::allocate_relpath(),
                ),
                tiles.path(),
            )
            .await?;
        info!(
            job_id = job.id,
            dataset_id = pyramid_ds.id,
            files = pyramid_ds.file_cnt_act,
            "{}: Image pyramid generated",
            job.id
        );
        Ok(())
    }
}
