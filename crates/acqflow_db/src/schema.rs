//! Table definitions for the job store.

pub(crate) const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS data_containers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        primary_dataset_id INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS datasets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        container_id INTEGER NOT NULL REFERENCES data_containers(id),
        kind TEXT NOT NULL,
        format TEXT NOT NULL,
        label TEXT NOT NULL,
        relpath TEXT NOT NULL,
        file_cnt_tgt INTEGER NOT NULL DEFAULT 0,
        file_cnt_act INTEGER NOT NULL DEFAULT 0,
        psd TEXT,
        physio_flag INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'new',
        container_id INTEGER NOT NULL REFERENCES data_containers(id),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    // Eligibility scan: lowest new job first
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, id)",
    // Per-container ordering predicate
    "CREATE INDEX IF NOT EXISTS idx_jobs_container ON jobs(container_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_datasets_container ON datasets(container_id)",
];
