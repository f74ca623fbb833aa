use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use masonshell_core::{ArchiveFormat, ProjectLayout, STAGING_PREFIX};

/// Scratch directory under the project root for one pipeline run. Everything
/// downloaded or unpacked lands here until the run either promotes it into
/// place or throws it away.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn create(layout: &ProjectLayout) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system time is before unix epoch")?
            .as_nanos();
        let path = layout.root().join(format!(
            "{}-{}-{}",
            STAGING_PREFIX,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create staging directory: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_path(&self, format: ArchiveFormat) -> PathBuf {
        self.path.join(format!("release.{}", format.extension()))
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.path.join("tree")
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove staging directory: {}", self.path.display())
            }),
        }
    }
}

/// Removes staging directories left behind by interrupted runs. Returns the
/// paths that were cleaned up; unreadable roots are treated as having nothing
/// to sweep.
pub fn sweep_stale_staging(layout: &ProjectLayout) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let entries = match fs::read_dir(layout.root()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(removed),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read directory: {}", layout.root().display())
            })
        }
    };

    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", layout.root().display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !ProjectLayout::is_staging_entry(name) {
            continue;
        }
        let path = entry.path();
        if fs::remove_dir_all(&path).is_ok() {
            removed.push(path);
        }
    }

    Ok(removed)
}
