//! acqflow launcher
//!
//! - `reaper`: capture stable acquisition files into the sort stage
//! - `scheduler`: run queued jobs through their format pipelines
//! - `enqueue` / `jobs`: queue administration

use acqflow_logging::{init_logging, LogConfig};
use acqflow_protocol::{CancellationToken, JobStatus, TaskKind};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

mod cli;

use cli::jobs::{EnqueueArgs, JobsArgs};
use cli::reaper::ReaperArgs;
use cli::scheduler::SchedulerArgs;

#[derive(Parser, Debug)]
#[command(name = "acqflow", about = "Acquisition reaper and processing scheduler")]
struct Cli {
    /// Process name used for the log file
    #[arg(short = 'n', long = "log-name", global = true)]
    log_name: Option<String>,

    /// Log file (or directory) in addition to stderr
    #[arg(short = 'f', long = "log-file", global = true)]
    log_file: Option<PathBuf>,

    /// Log level for acqflow targets; RUST_LOG overrides
    #[arg(short = 'l', long = "log-level", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a scanner directory and publish stable acquisitions
    Reaper {
        /// Staging root holding reap/ and sort/
        stage_path: Option<PathBuf>,

        /// Directory the scanner writes acquisitions into
        data_path: Option<PathBuf>,

        /// TOML config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only capture matching patient ids ('*' wildcard)
        #[arg(short = 'p', long = "patid")]
        patid: Option<String>,

        /// Seconds between polls
        #[arg(short = 's', long)]
        sleeptime: Option<u64>,

        /// Reaper instance id (default: last component of data_path)
        #[arg(long)]
        id: Option<String>,

        /// Acquisition file name pattern
        #[arg(long)]
        pattern: Option<String>,

        /// Header parser command, run as `<command> <file>`
        #[arg(long)]
        header_command: Option<String>,

        /// Checkpoint file path
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Run queued jobs through their format pipelines
    Scheduler {
        /// Root that dataset paths are relative to
        data_root: Option<PathBuf>,

        /// Directory holding physio recordings
        physio_path: Option<PathBuf>,

        /// TOML config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Job store URL
        #[arg(long, env = "ACQFLOW_DATABASE")]
        database: Option<String>,

        /// Only run jobs of this kind (discover, process)
        #[arg(short = 't', long)]
        task: Option<TaskKind>,

        /// Maximum concurrently running jobs
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Seconds between polls when idle
        #[arg(short = 's', long)]
        sleeptime: Option<u64>,

        #[arg(long)]
        dicom_converter: Option<String>,

        #[arg(long)]
        pfile_converter: Option<String>,

        #[arg(long)]
        pyramid_command: Option<String>,
    },

    /// Queue a job for an existing container
    Enqueue {
        #[arg(long)]
        container: i64,

        #[arg(long)]
        task: TaskKind,

        #[arg(long, env = "ACQFLOW_DATABASE")]
        database: Option<String>,
    },

    /// List jobs, newest first
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long, default_value = "50")]
        limit: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        #[arg(long, env = "ACQFLOW_DATABASE")]
        database: Option<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Reaper { .. } => "reaper",
            Commands::Scheduler { .. } => "scheduler",
            Commands::Enqueue { .. } => "enqueue",
            Commands::Jobs { .. } => "jobs",
        }
    }

    fn is_daemon(&self) -> bool {
        matches!(self, Commands::Reaper { .. } | Commands::Scheduler { .. })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_name = cli
        .log_name
        .clone()
        .unwrap_or_else(|| cli.command.name().to_string());
    if let Err(e) = init_logging(LogConfig {
        app_name: &app_name,
        level: &cli.log_level,
        log_file: cli.log_file.as_deref(),
    }) {
        eprintln!("Error: {:?}", e);
        return ExitCode::from(1);
    }

    match run_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(command: Commands) -> Result<()> {
    let token = CancellationToken::new();
    if command.is_daemon() {
        install_signal_handlers(&token)?;
    }

    match command {
        Commands::Reaper {
            stage_path,
            data_path,
            config,
            patid,
            sleeptime,
            id,
            pattern,
            header_command,
            checkpoint,
        } => cli::reaper::run(
            ReaperArgs {
                stage_path,
                data_path,
                config,
                patient_filter: patid,
                sleeptime,
                id,
                pattern,
                header_command,
                checkpoint,
            },
            &token,
        ),
        Commands::Scheduler {
            data_root,
            physio_path,
            config,
            database,
            task,
            jobs,
            sleeptime,
            dicom_converter,
            pfile_converter,
            pyramid_command,
        } => cli::scheduler::run(
            SchedulerArgs {
                data_root,
                physio_path,
                config,
                database,
                task,
                jobs,
                sleeptime,
                dicom_converter,
                pfile_converter,
                pyramid_command,
            },
            &token,
        ),
        Commands::Enqueue {
            container,
            task,
            database,
        } => cli::jobs::run_enqueue(EnqueueArgs {
            database_url: cli::resolve_database_url(database),
            container,
            task,
        }),
        Commands::Jobs {
            status,
            limit,
            json,
            database,
        } => cli::jobs::run_jobs(JobsArgs {
            database_url: cli::resolve_database_url(database),
            status,
            limit,
            json,
        }),
    }
}

/// SIGINT/SIGTERM cancel `token`; the work in progress finishes first.
fn install_signal_handlers(token: &CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handler_token = token.clone();
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, initiating shutdown...", sig);
                handler_token.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        let handler_token = token.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating shutdown...");
            handler_token.cancel();
        })?;
    }

    Ok(())
}
