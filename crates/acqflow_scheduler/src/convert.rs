//! External converters.
//!
//! Numeric conversion and pyramid tiling are done by separate tools; the
//! pipelines only see these traits.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Raw acquisition → standard volume.
#[async_trait]
pub trait VolumeConverter: Send + Sync {
    /// Convert `input` (a file or a series directory), writing outputs whose
    /// names start with `output_base`. Returns the produced volume, or
    /// `None` if nothing was produced.
    async fn convert(&self, input: &Path, output_base: &Path) -> Result<Option<PathBuf>>;
}

/// Standard volume → multi-resolution tile set.
#[async_trait]
pub trait PyramidRenderer: Send + Sync {
    async fn render(&self, volume: &Path, output_dir: &Path) -> Result<()>;
}

/// Runs `<command> <input> <output_base>`.
pub struct CommandVolumeConverter {
    command: String,
}

impl CommandVolumeConverter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl VolumeConverter for CommandVolumeConverter {
    async fn convert(&self, input: &Path, output_base: &Path) -> Result<Option<PathBuf>> {
        run_command(&self.command, &[input, output_base]).await?;
        find_with_prefix(output_base).await
    }
}

/// Runs `<command> <volume> <output_dir>`.
pub struct CommandPyramidRenderer {
    command: String,
}

impl CommandPyramidRenderer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl PyramidRenderer for CommandPyramidRenderer {
    async fn render(&self, volume: &Path, output_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(output_dir).await?;
        run_command(&self.command, &[volume, output_dir]).await
    }
}

async fn run_command(command: &str, args: &[&Path]) -> Result<()> {
    debug!(command, ?args, "Running external tool");
    let output = Command::new(command)
        .args(args)
        .output()
        .await
        .map_err(|e| PipelineError::Convert(format!("failed to run {}: {}", command, e)))?;

    if !output.status.success() {
        return Err(PipelineError::Convert(format!(
            "{} exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// File next to `base` whose name starts with `base`'s name. NIfTI volumes
/// win over sidecar files; ties break by name.
async fn find_with_prefix(base: &Path) -> Result<Option<PathBuf>> {
    let (Some(dir), Some(prefix)) = (base.parent(), base.file_name()) else {
        return Ok(None);
    };
    let prefix = prefix.to_string_lossy();

    let mut matches = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file()
            && entry.file_name().to_string_lossy().starts_with(prefix.as_ref())
        {
            matches.push(entry.path());
        }
    }
    matches.sort_by_key(|p| (!is_volume(p), p.clone()));
    Ok(matches.into_iter().next())
}

fn is_volume(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}
