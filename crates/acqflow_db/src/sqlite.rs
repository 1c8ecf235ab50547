//! SQLite implementation of [`JobStore`].

use crate::error::{DbError, Result};
use crate::schema::SCHEMA_STATEMENTS;
use crate::store::JobStore;
use crate::types::{DataContainer, Dataset, Job, NewDataset};
use acqflow_protocol::{DataFormat, DatasetKind, JobStatus, TaskKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Concurrent pipelines write through the same file; wait for the lock
/// instead of failing with SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_CONNECTIONS: u32 = 5;

const JOB_COLUMNS: &str = "id, task, status, container_id, created_at, updated_at";
const CONTAINER_COLUMNS: &str = "id, name, timestamp_ms, duration_secs, primary_dataset_id";
const DATASET_COLUMNS: &str =
    "id, container_id, kind, format, label, relpath, file_cnt_tgt, file_cnt_act, psd, physio_flag";

/// SQLite-backed job store.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) the store at a `sqlite:` URL and ensure the schema.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?;
        if is_in_memory(url) {
            // Each pooled connection would otherwise get its own empty database
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            return Self::connect(options, pool).await;
        }

        if let Some(parent) = options
            .get_filename()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::connect(options, SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)).await
    }

    /// Open (or create) the store at a file path and ensure the schema.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::connect(
            SqliteConnectOptions::new().filename(path),
            SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS),
        )
        .await
    }

    async fn connect(options: SqliteConnectOptions, pool: SqlitePoolOptions) -> Result<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = pool.connect_with(options).await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Job store opened");
        Ok(store)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Row decoding
// ============================================================================

/// `sqlite::memory:` and `mode=memory` URLs never touch the filesystem.
fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::decode(format!("timestamp out of range: {ms}")))
}

fn decode_enum<T>(row: &SqliteRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| DbError::decode(format!("invalid {column}: '{raw}'")))
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        task: decode_enum(row, "task", TaskKind::parse)?,
        status: decode_enum(row, "status", JobStatus::parse)?,
        container_id: row.try_get("container_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn row_to_container(row: &SqliteRow) -> Result<DataContainer> {
    Ok(DataContainer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        timestamp: from_millis(row.try_get("timestamp_ms")?)?,
        duration_secs: row.try_get("duration_secs")?,
        primary_dataset_id: row.try_get("primary_dataset_id")?,
    })
}

fn row_to_dataset(row: &SqliteRow) -> Result<Dataset> {
    Ok(Dataset {
        id: row.try_get("id")?,
        container_id: row.try_get("container_id")?,
        kind: decode_enum(row, "kind", DatasetKind::parse)?,
        format: decode_enum(row, "format", DataFormat::parse)?,
        label: row.try_get("label")?,
        relpath: row.try_get("relpath")?,
        file_cnt_tgt: row.try_get("file_cnt_tgt")?,
        file_cnt_act: row.try_get("file_cnt_act")?,
        psd: row.try_get("psd")?,
        physio_flag: row.try_get::<i64, _>("physio_flag")? != 0,
    })
}

// ============================================================================
// JobStore
// ============================================================================

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn next_eligible_job(&self, task: Option<TaskKind>) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs j
            WHERE j.status = 'new'
              AND (?1 IS NULL OR j.task = ?1)
              AND NOT EXISTS (
                  SELECT 1 FROM jobs a
                  WHERE a.container_id = j.container_id
                    AND a.id < j.id
                    AND a.status IN ('new', 'active')
              )
            ORDER BY j.id ASC
            LIMIT 1
            "#
        ))
        .bind(task.map(|t| t.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn claim_job(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'active', updated_at = ?2 WHERE id = ?1 AND status = 'new'",
        )
        .bind(job_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(job_id, claimed, "Claim attempted");
        Ok(claimed)
    }

    async fn finish_job(&self, job_id: i64, status: JobStatus) -> Result<()> {
        if !JobStatus::Active.can_transition_to(status) {
            return Err(DbError::invalid_state(format!(
                "job {job_id} cannot finish as '{status}'"
            )));
        }

        let result = sqlx::query(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = 'active'",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_job(job_id).await? {
                Some(job) => Err(DbError::invalid_state(format!(
                    "job {job_id} is '{}', expected 'active'",
                    job.status
                ))),
                None => Err(DbError::not_found(format!("job {job_id}"))),
            };
        }
        Ok(())
    }

    async fn reset_active_jobs(&self, task: Option<TaskKind>) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'active' AND (?1 IS NULL OR task = ?1) ORDER BY id"
        ))
        .bind(task.map(|t| t.as_str()))
        .fetch_all(&mut *tx)
        .await?;
        let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;

        sqlx::query(
            "UPDATE jobs SET status = 'new', updated_at = ?2 WHERE status = 'active' AND (?1 IS NULL OR task = ?1)",
        )
        .bind(task.map(|t| t.as_str()))
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(jobs)
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn enqueue_job(&self, container_id: i64, task: TaskKind) -> Result<Job> {
        let now = now_millis();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (task, status, container_id, created_at, updated_at)
            VALUES (?1, 'new', ?2, ?3, ?3)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(task.as_str())
        .bind(container_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        row_to_job(&row)
    }

    async fn create_container(
        &self,
        name: &str,
        timestamp: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<DataContainer> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO data_containers (name, timestamp_ms, duration_secs)
            VALUES (?1, ?2, ?3)
            RETURNING {CONTAINER_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(timestamp.timestamp_millis())
        .bind(duration_secs)
        .fetch_one(&self.pool)
        .await?;
        row_to_container(&row)
    }

    async fn get_container(&self, container_id: i64) -> Result<Option<DataContainer>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM data_containers WHERE id = ?1"
        ))
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_container).transpose()
    }

    async fn create_dataset(&self, dataset: NewDataset) -> Result<Dataset> {
        if dataset.kind == DatasetKind::Primary && !dataset.format.is_acquisition() {
            return Err(DbError::invalid_state(format!(
                "'{}' cannot be the primary dataset of a container",
                dataset.format
            )));
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO datasets
                (container_id, kind, format, label, relpath, file_cnt_tgt, file_cnt_act, psd, physio_flag, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9)
            RETURNING {DATASET_COLUMNS}
            "#
        ))
        .bind(dataset.container_id)
        .bind(dataset.kind.as_str())
        .bind(dataset.format.as_str())
        .bind(&dataset.label)
        .bind(&dataset.relpath)
        .bind(dataset.file_cnt_tgt)
        .bind(&dataset.psd)
        .bind(dataset.physio_flag as i64)
        .bind(now_millis())
        .fetch_one(&mut *tx)
        .await?;
        let created = row_to_dataset(&row)?;

        if created.kind == DatasetKind::Primary {
            let result =
                sqlx::query("UPDATE data_containers SET primary_dataset_id = ?1 WHERE id = ?2")
                    .bind(created.id)
                    .bind(created.container_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::not_found(format!(
                    "container {}",
                    created.container_id
                )));
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_dataset(&self, dataset_id: i64) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1"))
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_dataset).transpose()
    }

    async fn primary_dataset(&self, container_id: i64) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DATASET_COLUMNS} FROM datasets
            WHERE id = (SELECT primary_dataset_id FROM data_containers WHERE id = ?1)
            "#
        ))
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_dataset).transpose()
    }

    async fn list_datasets(&self, container_id: i64) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(&format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE container_id = ?1 ORDER BY id"
        ))
        .bind(container_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dataset).collect()
    }

    async fn record_file_copied(&self, dataset_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE datasets SET file_cnt_act = file_cnt_act + 1 WHERE id = ?1 RETURNING file_cnt_act",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("file_cnt_act")?),
            None => Err(DbError::not_found(format!("dataset {dataset_id}"))),
        }
    }
}
