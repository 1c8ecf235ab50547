//! Scheduler and pipeline integration tests
//!
//! Real SQLite job store, in-process converters.

use acqflow_db::{DataContainer, Job, JobStore, NewDataset, SqliteJobStore};
use acqflow_protocol::{CancellationToken, DataFormat, DatasetKind, JobStatus, TaskKind};
use acqflow_scheduler::{
    PhysioLocator, PipelineEnv, PipelineError, PollOutcome, PyramidRenderer, Result, Scheduler,
    SchedulerOptions, VolumeConverter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

/// Writes `<base><suffix>` for each suffix; tracks concurrent calls.
struct FakeConverter {
    suffixes: Vec<&'static str>,
    delay: Duration,
    current: AtomicUsize,
    max_seen: AtomicUsize,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeConverter {
    fn new(suffixes: Vec<&'static str>) -> Self {
        Self {
            suffixes,
            delay: Duration::ZERO,
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    fn slow(suffixes: Vec<&'static str>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(suffixes)
        }
    }
}

#[async_trait]
impl VolumeConverter for FakeConverter {
    async fn convert(&self, input: &Path, output_base: &Path) -> Result<Option<PathBuf>> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.to_path_buf());

        tokio::time::sleep(self.delay).await;

        let mut volume = None;
        for suffix in &self.suffixes {
            let path = PathBuf::from(format!("{}{}", output_base.display(), suffix));
            tokio::fs::write(&path, b"voxels").await?;
            if volume.is_none() {
                volume = Some(path);
            }
        }
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(volume)
    }
}

struct FakeRenderer;

#[async_trait]
impl PyramidRenderer for FakeRenderer {
    async fn render(&self, volume: &Path, output_dir: &Path) -> Result<()> {
        assert!(volume.exists());
        tokio::fs::create_dir_all(output_dir.join("0")).await?;
        tokio::fs::write(output_dir.join("pyramid.html"), b"<html/>").await?;
        tokio::fs::write(output_dir.join("0/0_0.png"), b"png").await?;
        tokio::fs::write(output_dir.join("0/0_1.png"), b"png").await?;
        Ok(())
    }
}

enum FakePhysio {
    Found(Vec<PathBuf>),
    Broken,
}

#[async_trait]
impl PhysioLocator for FakePhysio {
    async fn locate(&self, _end: DateTime<Utc>, psd: &str) -> Result<Vec<PathBuf>> {
        match self {
            Self::Found(files) => Ok(files
                .iter()
                .filter(|f| f.to_string_lossy().contains(psd))
                .cloned()
                .collect()),
            Self::Broken => Err(PipelineError::Physio("share not mounted".into())),
        }
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    tmp: TempDir,
    store: Arc<SqliteJobStore>,
    converter: Arc<FakeConverter>,
}

impl Fixture {
    async fn new(converter: FakeConverter) -> Self {
        let tmp = TempDir::new().unwrap();
        let store = SqliteJobStore::open_path(tmp.path().join("acqflow.sqlite3"))
            .await
            .unwrap();
        Self {
            tmp,
            store: Arc::new(store),
            converter: Arc::new(converter),
        }
    }

    fn data_root(&self) -> PathBuf {
        self.tmp.path().join("data")
    }

    fn env(&self, physio: FakePhysio) -> Arc<PipelineEnv> {
        Arc::new(PipelineEnv {
            store: self.store.clone(),
            data_root: self.data_root(),
            physio: Arc::new(physio),
            dicom_converter: self.converter.clone(),
            pfile_converter: self.converter.clone(),
            renderer: Arc::new(FakeRenderer),
        })
    }

    fn scheduler(&self, physio: FakePhysio, max_jobs: usize, task: Option<TaskKind>) -> Scheduler {
        Scheduler::new(
            self.env(physio),
            SchedulerOptions {
                task,
                max_jobs,
                poll_interval: Duration::from_millis(20),
            },
        )
    }

    /// Container with a primary dataset holding two files.
    async fn container(&self, name: &str, primary: NewDatasetSpec) -> DataContainer {
        let c = self
            .store
            .create_container(name, Utc::now(), 300)
            .await
            .unwrap();
        let relpath = format!("primary/{name}");
        let dir = self.data_root().join(&relpath);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("0001.dcm"), b"a").unwrap();
        std::fs::write(dir.join("0002.dcm"), b"b").unwrap();

        let mut ds = NewDataset::new(c.id, DatasetKind::Primary, primary.format, "raw", relpath)
            .with_target(2)
            .with_physio(primary.physio);
        if let Some(psd) = primary.psd {
            ds = ds.with_psd(psd);
        }
        self.store.create_dataset(ds).await.unwrap();
        c
    }

    async fn job(&self, id: i64) -> Job {
        self.store.get_job(id).await.unwrap().unwrap()
    }
}

struct NewDatasetSpec {
    format: DataFormat,
    psd: Option<&'static str>,
    physio: bool,
}

fn dicom() -> NewDatasetSpec {
    NewDatasetSpec {
        format: DataFormat::Dicom,
        psd: None,
        physio: false,
    }
}

fn pfile(psd: &'static str, physio: bool) -> NewDatasetSpec {
    NewDatasetSpec {
        format: DataFormat::PFile,
        psd: Some(psd),
        physio,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_dicom_convert_records_derived_datasets() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz", ".bval", ".bvec"])).await;
    let c = fx.container("exam_3_1", dicom()).await;
    let job = fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, None);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Dispatched(job.id));
    scheduler.drain().await;

    assert_eq!(fx.job(job.id).await.status, JobStatus::Done);

    let datasets = fx.store.list_datasets(c.id).await.unwrap();
    let derived: Vec<_> = datasets
        .iter()
        .filter(|d| d.kind == DatasetKind::Derived)
        .collect();
    assert_eq!(derived.len(), 2);

    let nifti = derived.iter().find(|d| d.format == DataFormat::Nifti).unwrap();
    assert_eq!(nifti.file_cnt_tgt, 3);
    assert_eq!(nifti.file_cnt_act, 3);
    assert_eq!(nifti.label, "NIfTI (raw)");
    assert!(fx.data_root().join(&nifti.relpath).join("exam_3_1.nii.gz").exists());

    let pyramid = derived.iter().find(|d| d.format == DataFormat::Pyramid).unwrap();
    assert_eq!(pyramid.file_cnt_tgt, 3);
    assert!(pyramid.is_complete());
    assert!(fx.data_root().join(&pyramid.relpath).join("0/0_1.png").exists());

    let inputs = fx.converter.inputs.lock().unwrap().clone();
    assert_eq!(inputs, vec![fx.data_root().join("primary/exam_3_1")]);
}

#[tokio::test]
async fn test_same_container_jobs_never_overlap() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c = fx.container("exam", dicom()).await;
    let a = fx.store.enqueue_job(c.id, TaskKind::Discover).await.unwrap();
    let b = fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 4, None);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Dispatched(a.id));
    // Capacity remains, but B waits for A
    let second = scheduler.poll_once().await.unwrap();
    if second != PollOutcome::Idle {
        // A already finished on another worker thread
        assert_eq!(fx.job(a.id).await.status, JobStatus::Done);
        assert_eq!(second, PollOutcome::Dispatched(b.id));
    }
    scheduler.drain().await;

    if second == PollOutcome::Idle {
        assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Dispatched(b.id));
        scheduler.drain().await;
    }
    assert_eq!(fx.job(b.id).await.status, JobStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap_is_respected() {
    let fx = Fixture::new(FakeConverter::slow(
        vec![".nii.gz"],
        Duration::from_millis(150),
    ))
    .await;

    let mut jobs = Vec::new();
    for i in 0..5 {
        let c = fx.container(&format!("exam_{i}"), dicom()).await;
        jobs.push(fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap());
    }

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 2, None);
    let token = CancellationToken::new();
    let handle = {
        let token = token.clone();
        tokio::spawn(async move { scheduler.run(&token).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let done = fx
            .store
            .list_jobs(Some(JobStatus::Done), 100)
            .await
            .unwrap()
            .len();
        if done == jobs.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    token.cancel();
    handle.await.unwrap().unwrap();

    let max_seen = fx.converter.max_seen.load(Ordering::SeqCst);
    assert!(max_seen <= 2, "saw {max_seen} concurrent pipelines");
    assert!(max_seen >= 1);
}

#[tokio::test]
async fn test_startup_recovery_resets_active_jobs() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c = fx.container("exam", dicom()).await;
    let job = fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap();
    // Previous run crashed mid-pipeline
    assert!(fx.store.claim_job(job.id).await.unwrap());

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, None);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);

    assert_eq!(scheduler.recover().await.unwrap(), 1);
    assert_eq!(fx.job(job.id).await.status, JobStatus::New);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Dispatched(job.id));
    scheduler.drain().await;
    assert_eq!(fx.job(job.id).await.status, JobStatus::Done);
}

#[tokio::test]
async fn test_recovery_honors_task_filter() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c1 = fx.container("exam_1", dicom()).await;
    let c2 = fx.container("exam_2", dicom()).await;
    let discover = fx.store.enqueue_job(c1.id, TaskKind::Discover).await.unwrap();
    let process = fx.store.enqueue_job(c2.id, TaskKind::Process).await.unwrap();
    fx.store.claim_job(discover.id).await.unwrap();
    fx.store.claim_job(process.id).await.unwrap();

    let scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, Some(TaskKind::Discover));
    assert_eq!(scheduler.recover().await.unwrap(), 1);
    assert_eq!(fx.job(discover.id).await.status, JobStatus::New);
    assert_eq!(fx.job(process.id).await.status, JobStatus::Active);
}

#[tokio::test]
async fn test_missing_primary_dataset_fails_job() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c = fx.store.create_container("bare", Utc::now(), 0).await.unwrap();
    let job = fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, None);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Rejected(job.id));
    assert_eq!(fx.job(job.id).await.status, JobStatus::Failed);
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_converter_without_output_fails_job() {
    let fx = Fixture::new(FakeConverter::new(vec![])).await;
    let c = fx.container("exam", dicom()).await;
    let job = fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, None);
    scheduler.poll_once().await.unwrap();
    scheduler.drain().await;

    assert_eq!(fx.job(job.id).await.status, JobStatus::Failed);
    let datasets = fx.store.list_datasets(c.id).await.unwrap();
    assert!(datasets.iter().all(|d| d.kind == DatasetKind::Primary));

    // Failed is terminal
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_discover_attaches_physio() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let physio_dir = fx.tmp.path().join("physio");
    std::fs::create_dir_all(&physio_dir).unwrap();
    let mut files = Vec::new();
    for name in ["RESPData_sprt_1120", "PPGData_sprt_1120", "PPGData_epi_1120"] {
        let path = physio_dir.join(name);
        std::fs::write(&path, b"samples").unwrap();
        files.push(path);
    }

    let c = fx.container("exam", pfile("sprt", true)).await;
    let job = fx.store.enqueue_job(c.id, TaskKind::Discover).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(files), 1, None);
    scheduler.poll_once().await.unwrap();
    scheduler.drain().await;

    assert_eq!(fx.job(job.id).await.status, JobStatus::Done);
    let secondary: Vec<_> = fx
        .store
        .list_datasets(c.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.kind == DatasetKind::Secondary)
        .collect();
    assert_eq!(secondary.len(), 1);
    assert_eq!(secondary[0].label, "Physio Data");
    assert_eq!(secondary[0].format, DataFormat::Physio);
    assert_eq!(secondary[0].file_cnt_act, 2);
    assert!(secondary[0].is_complete());
    assert!(fx
        .data_root()
        .join(&secondary[0].relpath)
        .join("RESPData_sprt_1120")
        .exists());
}

#[tokio::test]
async fn test_discover_without_physio_flag_succeeds_empty() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c = fx.container("exam", pfile("sprt", false)).await;
    let job = fx.store.enqueue_job(c.id, TaskKind::Discover).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Broken, 1, None);
    scheduler.poll_once().await.unwrap();
    scheduler.drain().await;

    assert_eq!(fx.job(job.id).await.status, JobStatus::Done);
    assert_eq!(fx.store.list_datasets(c.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_physio_lookup_error_fails_job() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c = fx.container("exam", pfile("sprt", true)).await;
    let job = fx.store.enqueue_job(c.id, TaskKind::Discover).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Broken, 1, None);
    scheduler.poll_once().await.unwrap();
    scheduler.drain().await;

    assert_eq!(fx.job(job.id).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_pfile_converts_spiral_only() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz", ".json"])).await;
    let spiral = fx.container("spiral", pfile("sprt_fmri", false)).await;
    let epi = fx.container("epi", pfile("epi2", false)).await;
    let spiral_job = fx.store.enqueue_job(spiral.id, TaskKind::Process).await.unwrap();
    let epi_job = fx.store.enqueue_job(epi.id, TaskKind::Process).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 2, None);
    scheduler.poll_once().await.unwrap();
    scheduler.poll_once().await.unwrap();
    scheduler.drain().await;

    assert_eq!(fx.job(spiral_job.id).await.status, JobStatus::Done);
    assert_eq!(fx.job(epi_job.id).await.status, JobStatus::Done);

    let spiral_derived: Vec<_> = fx
        .store
        .list_datasets(spiral.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.kind == DatasetKind::Derived)
        .collect();
    assert_eq!(spiral_derived.len(), 1);
    assert_eq!(spiral_derived[0].file_cnt_act, 2);
    assert_eq!(spiral_derived[0].file_cnt_tgt, 2);

    assert_eq!(fx.store.list_datasets(epi.id).await.unwrap().len(), 1);

    // Converted from the first file of the primary dataset
    let inputs = fx.converter.inputs.lock().unwrap().clone();
    assert_eq!(
        inputs,
        vec![fx.data_root().join("primary/spiral").join("0001.dcm")]
    );
}

#[tokio::test]
async fn test_task_filter_skips_other_kinds() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let c = fx.container("exam", dicom()).await;
    fx.store.enqueue_job(c.id, TaskKind::Process).await.unwrap();

    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, Some(TaskKind::Discover));
    assert_eq!(scheduler.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_run_stops_when_cancelled() {
    let fx = Fixture::new(FakeConverter::new(vec![".nii.gz"])).await;
    let mut scheduler = fx.scheduler(FakePhysio::Found(vec![]), 1, None);
    let token = CancellationToken::new();
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), scheduler.run(&token))
        .await
        .unwrap()
        .unwrap();
}
