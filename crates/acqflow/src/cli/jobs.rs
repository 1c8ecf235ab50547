//! `acqflow enqueue` and `acqflow jobs`: queue administration.

use crate::cli::open_store;
use acqflow_db::{Job, JobStore};
use acqflow_protocol::{JobStatus, TaskKind};
use anyhow::{bail, Context, Result};

#[derive(Debug)]
pub struct EnqueueArgs {
    pub database_url: String,
    pub container: i64,
    pub task: TaskKind,
}

#[derive(Debug)]
pub struct JobsArgs {
    pub database_url: String,
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub json: bool,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

pub fn run_enqueue(args: EnqueueArgs) -> Result<()> {
    runtime()?.block_on(async {
        let store = open_store(&args.database_url).await?;
        if store.get_container(args.container).await?.is_none() {
            bail!("container {} does not exist", args.container);
        }
        let job = store.enqueue_job(args.container, args.task).await?;
        println!("{}", job);
        store.close().await;
        Ok(())
    })
}

pub fn run_jobs(args: JobsArgs) -> Result<()> {
    runtime()?.block_on(async {
        let store = open_store(&args.database_url).await?;
        let jobs = store.list_jobs(args.status, args.limit).await?;
        store.close().await;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        } else {
            print!("{}", format_table(&jobs));
        }
        Ok(())
    })
}

fn format_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs.\n".to_string();
    }
    let mut out = format!(
        "{:>8}  {:<8}  {:<6}  {:>9}  {}\n",
        "ID", "TASK", "STATUS", "CONTAINER", "UPDATED"
    );
    for job in jobs {
        out.push_str(&format!(
            "{:>8}  {:<8}  {:<6}  {:>9}  {}\n",
            job.id,
            job.task,
            job.status,
            job.container_id,
            job.updated_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    out
}
