//! Durable modification-time watermark.
//!
//! Candidates older than the watermark are ignored, so a restart does not
//! rescan everything the previous run already captured. The file holds one
//! RFC 3339 UTC timestamp with microsecond precision.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct CheckpointStore {
    path: PathBuf,
    current: DateTime<Utc>,
}

impl CheckpointStore {
    /// Read the checkpoint at `path`. A missing or unparsable file reads as
    /// the Unix epoch.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(text) => match DateTime::parse_from_rfc3339(text.trim()) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    warn!(path = %path.display(), "Unparsable checkpoint ({}), starting from epoch", e);
                    DateTime::<Utc>::UNIX_EPOCH
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "No checkpoint, starting from epoch");
                DateTime::<Utc>::UNIX_EPOCH
            }
        };
        Self { path, current }
    }

    pub fn current(&self) -> DateTime<Utc> {
        self.current
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the watermark forward to `to` and persist it.
    ///
    /// Never moves backwards; returns whether the stored value changed.
    pub fn advance(&mut self, to: DateTime<Utc>) -> Result<bool> {
        if to <= self.current {
            return Ok(false);
        }
        write_atomic(&self.path, &to.to_rfc3339_opts(SecondsFormat::Micros, true))?;
        self.current = to;
        Ok(true)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, format!("{contents}\n"))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_epoch() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::load(tmp.path().join(".raw.datetime"));
        assert_eq!(store.current(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_garbage_is_epoch() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".raw.datetime");
        fs::write(&path, "yesterday-ish").unwrap();
        assert_eq!(CheckpointStore::load(&path).current(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_advance_is_monotonic_and_persisted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(".raw.datetime");
        let mut store = CheckpointStore::load(&path);

        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();

        assert!(store.advance(t1).unwrap());
        assert_eq!(store.current(), t1);

        // Older and equal values are ignored
        assert!(!store.advance(t0).unwrap());
        assert!(!store.advance(t1).unwrap());
        assert_eq!(store.current(), t1);

        let reloaded = CheckpointStore::load(&path);
        assert_eq!(reloaded.current(), t1);
        assert!(!tmp.path().join("nested").join(".raw.datetime.tmp").exists());

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "2024-03-01T12:00:00.123456Z");
    }
}
