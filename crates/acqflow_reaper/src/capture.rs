//! Copy-then-publish staging.
//!
//! A capture is assembled in a private directory under `reap/` and then
//! renamed into `sort/` in one step, so the sort stage never sees a
//! partial capture. Both directories must be on the same volume.

use crate::error::{ReaperError, Result};
use acqflow_protocol::CancellationToken;
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const COPY_CHUNK: usize = 1024 * 1024;

/// Removes a private capture directory when dropped unless disarmed.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), "Failed to remove partial capture: {}", e);
            } else {
                debug!(path = %self.path.display(), "Removed partial capture");
            }
        }
    }
}

/// Owns the reap and sort staging directories for one reaper instance.
pub struct Stager {
    reaper_id: String,
    reap_stage: PathBuf,
    sort_stage: PathBuf,
    companion_prefix_len: usize,
}

impl Stager {
    /// Create the staging directories if needed.
    pub fn new(
        reaper_id: impl Into<String>,
        reap_stage: impl Into<PathBuf>,
        sort_stage: impl Into<PathBuf>,
        companion_prefix_len: usize,
    ) -> Result<Self> {
        let stager = Self {
            reaper_id: reaper_id.into(),
            reap_stage: reap_stage.into(),
            sort_stage: sort_stage.into(),
            companion_prefix_len,
        };
        fs::create_dir_all(&stager.reap_stage)?;
        fs::create_dir_all(&stager.sort_stage)?;
        Ok(stager)
    }

    pub fn sort_stage(&self) -> &Path {
        &self.sort_stage
    }

    /// Publish captures a previous run left in `reap/`.
    ///
    /// Completeness is not verified: a crash during the copy phase leaves a
    /// partial directory that is published as-is.
    pub fn recover(&self) -> Result<usize> {
        let prefix = format!("{}_", self.reaper_id);
        let mut recovered = 0;
        for entry in fs::read_dir(&self.reap_stage)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let target = self.sort_stage.join(&name);
            match fs::rename(entry.path(), &target) {
                Ok(()) => {
                    warn!(
                        dir = %name.to_string_lossy(),
                        "Published leftover capture from previous run (unverified)"
                    );
                    recovered += 1;
                }
                Err(e) => {
                    warn!(dir = %name.to_string_lossy(), "Cannot publish leftover capture: {}", e);
                }
            }
        }
        Ok(recovered)
    }

    /// Copy `primary` plus matching companions into a private directory and
    /// publish it. Returns the published directory.
    ///
    /// On cancellation the private directory is removed. On any other
    /// failure it is left in `reap/`.
    pub fn capture(
        &self,
        primary: &Path,
        series_uid: &str,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let companions = self.find_companions(primary, series_uid)?;
        let private = self.create_private_dir()?;
        let mut guard = StagingGuard::new(private.clone());

        match self.fill(&private, primary, &companions, token) {
            Ok(()) => {}
            Err(ReaperError::Cancelled) => return Err(ReaperError::Cancelled),
            Err(e) => {
                guard.disarm();
                return Err(e);
            }
        }

        let dir_name = private
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "capture dir has no name"))?;
        let published = self.sort_stage.join(dir_name);
        if let Err(e) = fs::rename(&private, &published) {
            guard.disarm();
            return Err(e.into());
        }
        guard.disarm();
        Ok(published)
    }

    fn fill(
        &self,
        private: &Path,
        primary: &Path,
        companions: &[PathBuf],
        token: &CancellationToken,
    ) -> Result<()> {
        let primary_name = primary
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "primary has no file name"))?;
        copy_preserving(primary, &private.join(primary_name), token)?;

        for companion in companions {
            let Some(name) = companion.file_name() else {
                continue;
            };
            let staged_name = format!("_{}", name.to_string_lossy());
            copy_preserving(companion, &private.join(&staged_name), token)?;
            info!("Reaping    {}", staged_name);
        }
        Ok(())
    }

    /// Files named `<primary>_*` whose identity prefix equals `series_uid`.
    fn find_companions(&self, primary: &Path, series_uid: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}_*", glob::Pattern::escape(&primary.to_string_lossy()));
        let mut companions = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) if path.is_file() => path,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Error while checking for companions: {}", e);
                    continue;
                }
            };
            if read_identity_prefix(&path, self.companion_prefix_len)? == series_uid {
                companions.push(path);
            } else {
                debug!(path = %path.display(), "Companion belongs to another series");
            }
        }
        companions.sort();
        Ok(companions)
    }

    /// `reap/<id>_<secs>.<micros>`, suffixed on collision with either stage.
    fn create_private_dir(&self) -> Result<PathBuf> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let base = format!(
            "{}_{}.{:06}",
            self.reaper_id,
            now.as_secs(),
            now.subsec_micros()
        );

        self.reserve_private_dir(&base)
    }

    /// Create `reap/<base>`, or the first free `<base>_<n>` when either
    /// stage already holds that name.
    fn reserve_private_dir(&self, base: &str) -> Result<PathBuf> {
        let mut name = base.to_string();
        let mut attempt = 1;
        loop {
            if !self.sort_stage.join(&name).exists() {
                let candidate = self.reap_stage.join(&name);
                match fs::create_dir(&candidate) {
                    Ok(()) => return Ok(candidate),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e.into()),
                }
            }
            name = format!("{base}_{attempt}");
            attempt += 1;
        }
    }
}

/// First `len` bytes of `path`, trailing NULs and whitespace trimmed.
fn read_identity_prefix(path: &Path, len: usize) -> Result<String> {
    let mut buf = Vec::with_capacity(len);
    File::open(path)?.take(len as u64).read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    Ok(text
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string())
}

/// Chunked copy that checks `token` between chunks and keeps the source's
/// permissions and timestamps.
fn copy_preserving(src: &Path, dst: &Path, token: &CancellationToken) -> Result<u64> {
    let mut reader = File::open(src)?;
    let mut writer = File::create(dst)?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(ReaperError::Cancelled);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    writer.sync_all()?;
    drop(writer);

    let meta = fs::metadata(src)?;
    fs::set_permissions(dst, meta.permissions())?;
    filetime::set_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UID: &str = "1.2.840.113619.2.283.4120";

    fn setup() -> (TempDir, Stager, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("raw");
        fs::create_dir(&data).unwrap();
        let stager = Stager::new(
            "raw",
            tmp.path().join("stage/reap"),
            tmp.path().join("stage/sort"),
            32,
        )
        .unwrap();
        (tmp, stager, data)
    }

    fn companion_bytes(uid: &str) -> Vec<u8> {
        let mut bytes = uid.as_bytes().to_vec();
        bytes.resize(32, 0);
        bytes.extend_from_slice(b"payload");
        bytes
    }

    #[test]
    fn test_capture_with_companions() {
        let (tmp, stager, data) = setup();
        let primary = data.join("P00001.7");
        fs::write(&primary, vec![7u8; 3000]).unwrap();
        fs::write(data.join("P00001.7_refscan"), companion_bytes(UID)).unwrap();
        fs::write(data.join("P00001.7_other"), companion_bytes("9.9.9")).unwrap();

        let mtime = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&primary, mtime).unwrap();

        let published = stager
            .capture(&primary, UID, &CancellationToken::new())
            .unwrap();

        assert!(published.starts_with(tmp.path().join("stage/sort")));
        assert!(published
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("raw_"));
        assert_eq!(fs::read(published.join("P00001.7")).unwrap().len(), 3000);
        assert!(published.join("_P00001.7_refscan").exists());
        assert!(!published.join("_P00001.7_other").exists());

        let meta = fs::metadata(published.join("P00001.7")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);

        assert_eq!(fs::read_dir(tmp.path().join("stage/reap")).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_capture_is_removed() {
        let (tmp, stager, data) = setup();
        let primary = data.join("P00001.7");
        fs::write(&primary, b"data").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = stager.capture(&primary, UID, &token).unwrap_err();
        assert!(matches!(err, ReaperError::Cancelled));

        assert_eq!(fs::read_dir(tmp.path().join("stage/reap")).unwrap().count(), 0);
        assert_eq!(fs::read_dir(tmp.path().join("stage/sort")).unwrap().count(), 0);
    }

    #[test]
    fn test_io_failure_leaves_private_dir() {
        let (tmp, stager, data) = setup();
        let missing = data.join("P00009.7");

        let err = stager
            .capture(&missing, UID, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ReaperError::Io(_)));

        assert_eq!(fs::read_dir(tmp.path().join("stage/reap")).unwrap().count(), 1);
        assert_eq!(fs::read_dir(tmp.path().join("stage/sort")).unwrap().count(), 0);
    }

    #[test]
    fn test_recover_publishes_own_leftovers_only() {
        let (tmp, stager, _data) = setup();
        let reap = tmp.path().join("stage/reap");
        fs::create_dir(reap.join("raw_1700000000.000001")).unwrap();
        fs::write(reap.join("raw_1700000000.000001/P00001.7"), b"x").unwrap();
        fs::create_dir(reap.join("other_1700000000.000002")).unwrap();
        fs::create_dir(reap.join("raw2_1700000000.000003")).unwrap();

        assert_eq!(stager.recover().unwrap(), 1);

        let sort = tmp.path().join("stage/sort");
        assert!(sort.join("raw_1700000000.000001/P00001.7").exists());
        assert!(reap.join("other_1700000000.000002").exists());
        assert!(reap.join("raw2_1700000000.000003").exists());
    }

    #[test]
    fn test_private_dir_names_are_unique() {
        let (_tmp, stager, _data) = setup();
        let a = stager.create_private_dir().unwrap();
        let b = stager.create_private_dir().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_private_dir_skips_names_already_published() {
        let (_tmp, stager, _data) = setup();
        fs::create_dir(stager.sort_stage().join("raw_1700000000.000001")).unwrap();

        let dir = stager.reserve_private_dir("raw_1700000000.000001").unwrap();
        assert_eq!(dir.file_name().unwrap(), "raw_1700000000.000001_1");

        let dir = stager.reserve_private_dir("raw_1700000000.000001").unwrap();
        assert_eq!(dir.file_name().unwrap(), "raw_1700000000.000001_2");
    }

    #[test]
    fn test_identity_prefix_trims_padding() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("companion");
        fs::write(&path, companion_bytes(UID)).unwrap();
        assert_eq!(read_identity_prefix(&path, 32).unwrap(), UID);
    }
}
