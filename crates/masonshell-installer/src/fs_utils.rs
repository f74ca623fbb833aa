use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: failed to spawn command"))?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "{context_message}: status={:?} stdout={:?} stderr={:?}",
            output.status.code(),
            stdout.trim(),
            stderr.trim()
        ));
    }
    Ok(())
}

pub(crate) fn run_command_capture(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: failed to spawn command"))?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "{context_message}: status={:?} stdout={:?} stderr={:?}",
            output.status.code(),
            stdout.trim(),
            stderr.trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

pub(crate) fn remove_path_if_exists(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to inspect {}", path.display()))
        }
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory {}", path.display()))
    } else {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))
    }
}

/// Moves a directory, falling back to copy-then-delete across filesystems.
pub(crate) fn move_dir_or_copy(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    copy_dir_recursive(source, dest)?;
    fs::remove_dir_all(source)
        .with_context(|| format!("failed to remove source after copy: {}", source.display()))?;
    Ok(())
}

pub(crate) fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create directory: {}", dest.display()))?;

    let entries = fs::read_dir(source)
        .with_context(|| format!("failed to read directory: {}", source.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", source.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect {}", entry.path().display()))?;
        let source_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_recursive(&source_path, &dest_path)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let target = fs::read_link(&source_path).with_context(|| {
                    format!("failed to read symlink: {}", source_path.display())
                })?;
                std::os::unix::fs::symlink(&target, &dest_path).with_context(|| {
                    format!("failed to create symlink: {}", dest_path.display())
                })?;
            }
            #[cfg(not(unix))]
            {
                fs::copy(&source_path, &dest_path).with_context(|| {
                    format!("failed to copy file to {}", dest_path.display())
                })?;
            }
        } else {
            fs::copy(&source_path, &dest_path)
                .with_context(|| format!("failed to copy file to {}", dest_path.display()))?;
        }
    }

    Ok(())
}

/// Moves every top-level entry of `source` into `dest`. Collisions abort
/// unless `replace_existing` is set, in which case the old entry is removed
/// first. Entries named in `preserve_existing` are kept as-is on collision so
/// a forced reinstall never clobbers them.
pub(crate) fn move_tree_into(
    source: &Path,
    dest: &Path,
    replace_existing: bool,
    preserve_existing: &[&str],
) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create directory: {}", dest.display()))?;

    let entries = fs::read_dir(source)
        .with_context(|| format!("failed to read directory: {}", source.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", source.display()))?;
        let name = entry.file_name();
        let target = dest.join(&name);
        if target.exists() {
            if !replace_existing {
                bail!(
                    "destination already contains '{}'; remove it or choose an empty directory",
                    name.to_string_lossy()
                );
            }
            if preserve_existing
                .iter()
                .any(|keep| name.to_str() == Some(keep))
            {
                continue;
            }
            remove_path_if_exists(&target)?;
        }
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect {}", entry.path().display()))?;
        if file_type.is_dir() {
            move_dir_or_copy(&entry.path(), &target)?;
        } else if fs::rename(entry.path(), &target).is_err() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy file to {}", target.display()))?;
            remove_file_if_exists(&entry.path()).with_context(|| {
                format!("failed to remove source after copy: {}", entry.path().display())
            })?;
        }
    }

    Ok(())
}

pub(crate) fn escape_ps_single_quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

pub(crate) fn dir_is_empty(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path)
        .with_context(|| format!("failed to read directory: {}", path.display()))?;
    Ok(entries.next().is_none())
}
