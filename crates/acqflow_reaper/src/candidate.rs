//! Candidate scanning

use crate::error::Result;
use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One acquisition file as seen by a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapCandidate {
    pub path: PathBuf,
    pub size: u64,
    /// Truncated to microseconds to match checkpoint precision
    pub mtime: DateTime<Utc>,
    pub needs_capture: bool,
}

impl ReapCandidate {
    pub fn new(path: PathBuf, size: u64, mtime: DateTime<Utc>) -> Self {
        Self {
            path,
            size,
            mtime: mtime.trunc_subsecs(6),
            needs_capture: true,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl fmt::Display for ReapCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.file_name(), hrsize(self.size))
    }
}

/// List regular files in `dir` whose names match `pattern`.
///
/// Files that vanish or cannot be stat'ed between listing and stat are
/// skipped with a warning.
pub fn scan_candidates(dir: &Path, pattern: &str) -> Result<Vec<ReapCandidate>> {
    let escaped_dir = glob::Pattern::escape(&dir.to_string_lossy());
    let full = Path::new(&escaped_dir).join(pattern);

    let mut candidates = Vec::new();
    for entry in glob::glob(&full.to_string_lossy())? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Error while checking for files: {}", e);
                continue;
            }
        };
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), "Cannot stat candidate: {}", e);
                continue;
            }
        };
        let mtime: DateTime<Utc> = meta.modified()?.into();
        candidates.push(ReapCandidate::new(path, meta.len(), mtime));
    }
    Ok(candidates)
}

/// Human-readable size: `999B`, `1.9K`, `42M`.
pub fn hrsize(size: u64) -> String {
    if size < 1000 {
        return format!("{size}B");
    }
    let mut value = size as f64;
    for suffix in ["K", "M", "G", "T", "P", "E"] {
        value /= 1024.0;
        if value < 10.0 {
            return format!("{value:.1}{suffix}");
        }
        if value < 1000.0 {
            return format!("{value:.0}{suffix}");
        }
    }
    format!("{value:.0}Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hrsize() {
        assert_eq!(hrsize(0), "0B");
        assert_eq!(hrsize(999), "999B");
        assert_eq!(hrsize(2000), "2.0K");
        assert_eq!(hrsize(1950), "1.9K");
        assert_eq!(hrsize(500 * 1024), "500K");
        assert_eq!(hrsize(2 * 1024 * 1024), "2.0M");
    }

    #[test]
    fn test_scan_matches_pattern_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("P00001.7"), b"a").unwrap();
        fs::write(tmp.path().join("P12345.7"), b"bb").unwrap();
        fs::write(tmp.path().join("P00001.7_abc"), b"c").unwrap();
        fs::write(tmp.path().join("P1.7"), b"d").unwrap();
        fs::create_dir(tmp.path().join("P99999.7")).unwrap();

        let mut names: Vec<_> = scan_candidates(tmp.path(), "P?????.7")
            .unwrap()
            .into_iter()
            .map(|c| (c.file_name(), c.size))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![("P00001.7".to_string(), 1), ("P12345.7".to_string(), 2)]
        );
    }

    #[test]
    fn test_scan_escapes_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("scan[1]");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("P00001.7"), b"x").unwrap();

        let found = scan_candidates(&dir, "P?????.7").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].needs_capture);
    }

    #[test]
    fn test_display() {
        let c = ReapCandidate::new(PathBuf::from("/data/P00001.7"), 2000, Utc::now());
        assert_eq!(c.to_string(), "P00001.7 [2.0K]");
    }
}
