//! Shared logging setup for the acqflow daemons.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_TARGETS: &[&str] = &[
    "acqflow",
    "acqflow_db",
    "acqflow_reaper",
    "acqflow_scheduler",
];
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by the daemons.
pub struct LogConfig<'a> {
    /// Process name; used as the log file base name when `log_file` is a directory.
    pub app_name: &'a str,
    /// Level applied to all acqflow targets unless `RUST_LOG` is set.
    pub level: &'a str,
    /// Optional log destination. Without it, logs go to stderr only.
    pub log_file: Option<&'a Path>,
}

/// Build the default filter directive string for `level`.
pub fn default_filter(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize tracing with stderr output and, if configured, a rolling log file.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let file_layer = match config.log_file {
        Some(path) => {
            let (dir, base_name) = split_log_path(path, config.app_name);
            let file_path = dir.join(format!("{}.log", sanitize_name(&base_name)));
            let writer = RotatingLog::open(file_path, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
                .with_context(|| format!("Failed to open log file for {}", base_name))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(build_filter(config.level)?),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(build_filter(config.level)?),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// `RUST_LOG` wins; otherwise `level` applies to every acqflow target.
fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(level)))
        .with_context(|| format!("Invalid log level: {}", level))
}

/// Resolve a configured log destination into (directory, base name).
///
/// `logs/reaper.log` → (`logs`, `reaper`); an existing directory gets the app name.
fn split_log_path(path: &Path, app_name: &str) -> (PathBuf, String) {
    if path.is_dir() {
        return (path.to_path_buf(), app_name.to_string());
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let base = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| app_name.to_string());
    (dir, base)
}

/// Size-rotated log file: `name.log`, then `name.log.1` up to
/// `name.log.{keep - 1}`, oldest last.
#[derive(Clone)]
struct RotatingLog(Arc<Mutex<LogFile>>);

struct LogFile {
    path: PathBuf,
    keep: usize,
    limit: u64,
    file: File,
    written: u64,
}

impl RotatingLog {
    fn open(path: PathBuf, keep: usize, limit: u64) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        let mut log = LogFile {
            path,
            keep: keep.max(1),
            limit,
            file,
            written,
        };
        if log.written > log.limit {
            log.roll()?;
        }
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, LogFile>> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }
}

impl LogFile {
    fn backup(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for n in (1..self.keep).rev() {
            let from = if n == 1 {
                self.path.clone()
            } else {
                self.backup(n - 1)
            };
            remove_if_exists(&self.backup(n))?;
            match fs::rename(&from, self.backup(n)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        // With keep == 1 the live file is simply truncated
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingLog {
    type Writer = RotatingLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
