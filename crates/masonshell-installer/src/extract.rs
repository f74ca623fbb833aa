use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use masonshell_core::ArchiveFormat;
use thiserror::Error;

use crate::fs_utils::{dir_is_empty, escape_ps_single_quote, run_command};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("archive {path} is corrupted or truncated ({detail}); delete it and download again")]
    Corrupted { path: String, detail: String },
    #[error("archive {path} contains no files")]
    Empty { path: String },
    #[error("cannot write extracted files into {dir}; fix the directory permissions and retry")]
    NotWritable { dir: String },
    #[error("failed to extract {path}: {detail}")]
    Unknown { path: String, detail: String },
}

/// Unpacks `archive` into `dest`. A native tool is tried first since it is
/// usually faster on large trees; when none succeeds the archive is read in
/// process. `dest` is removed again whenever extraction fails, so callers
/// never see a half-written tree.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
) -> Result<(), ExtractError> {
    let result = extract_archive_inner(archive, dest, format);
    if result.is_err() {
        let _ = fs::remove_dir_all(dest);
    }
    result
}

fn extract_archive_inner(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
) -> Result<(), ExtractError> {
    let metadata = fs::metadata(archive).map_err(|err| classify_io(archive, dest, err))?;
    if metadata.len() == 0 {
        return Err(ExtractError::Empty {
            path: archive.display().to_string(),
        });
    }

    fs::create_dir_all(dest).map_err(|err| classify_io(archive, dest, err))?;
    probe_writable(dest)?;

    if extract_with_native_tool(archive, dest, format).is_err() {
        // The native tool may have written a partial tree before failing.
        let _ = fs::remove_dir_all(dest);
        fs::create_dir_all(dest).map_err(|err| classify_io(archive, dest, err))?;
        match format {
            ArchiveFormat::Zip => extract_zip_in_process(archive, dest)?,
            ArchiveFormat::TarGz => extract_tar_gz_in_process(archive, dest)?,
        }
    }

    match dir_is_empty(dest) {
        Ok(true) => Err(ExtractError::Empty {
            path: archive.display().to_string(),
        }),
        Ok(false) => Ok(()),
        Err(err) => Err(ExtractError::Unknown {
            path: archive.display().to_string(),
            detail: format!("{err:#}"),
        }),
    }
}

fn probe_writable(dest: &Path) -> Result<(), ExtractError> {
    let probe = dest.join(".masonshell-write-probe");
    match File::create(&probe) {
        Ok(mut file) => {
            let _ = file.write_all(b"probe");
            drop(file);
            let _ = fs::remove_file(&probe);
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            Err(ExtractError::NotWritable {
                dir: dest.display().to_string(),
            })
        }
        Err(err) => Err(ExtractError::Unknown {
            path: dest.display().to_string(),
            detail: err.to_string(),
        }),
    }
}

fn extract_with_native_tool(archive: &Path, dest: &Path, format: ArchiveFormat) -> Result<()> {
    match format {
        ArchiveFormat::Zip => {
            if cfg!(windows) {
                let mut command = Command::new("powershell");
                command.arg("-NoProfile").arg("-Command").arg(format!(
                    "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
                    escape_ps_single_quote(archive),
                    escape_ps_single_quote(dest)
                ));
                if run_command(&mut command, "failed to extract zip with powershell").is_ok() {
                    return Ok(());
                }
            }
            let mut command = Command::new("unzip");
            command.arg("-q").arg(archive).arg("-d").arg(dest);
            run_command(&mut command, "failed to extract zip with unzip")
        }
        ArchiveFormat::TarGz => {
            let mut command = Command::new("tar");
            command.arg("-xf").arg(archive).arg("-C").arg(dest);
            run_command(&mut command, "failed to extract tar archive")
        }
    }
}

pub(crate) fn extract_zip_in_process(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive).map_err(|err| classify_io(archive, dest, err))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|err| classify_zip(archive, dest, err))?;
    if zip.is_empty() {
        return Err(ExtractError::Empty {
            path: archive.display().to_string(),
        });
    }

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| classify_zip(archive, dest, err))?;
        // Entries that escape the destination are skipped outright.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| classify_io(archive, dest, err))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|err| classify_io(archive, dest, err))?;
        }
        let mut out = File::create(&out_path).map_err(|err| classify_io(archive, dest, err))?;
        io::copy(&mut entry, &mut out).map_err(|err| classify_io(archive, dest, err))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
        }
    }

    Ok(())
}

pub(crate) fn extract_tar_gz_in_process(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    // `unpack_in` canonicalizes `dest` while validating entry paths, so the
    // destination must exist before the first entry is unpacked.
    fs::create_dir_all(dest).map_err(|err| classify_io(archive, dest, err))?;
    let file = File::open(archive).map_err(|err| classify_io(archive, dest, err))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);

    let mut unpacked = 0usize;
    let entries = tar
        .entries()
        .map_err(|err| classify_io(archive, dest, err))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| classify_io(archive, dest, err))?;
        if entry
            .unpack_in(dest)
            .map_err(|err| classify_io(archive, dest, err))?
        {
            unpacked += 1;
        }
    }

    if unpacked == 0 {
        return Err(ExtractError::Empty {
            path: archive.display().to_string(),
        });
    }

    Ok(())
}

fn classify_io(archive: &Path, dest: &Path, err: io::Error) -> ExtractError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ExtractError::NotWritable {
            dir: dest.display().to_string(),
        },
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            ExtractError::Corrupted {
                path: archive.display().to_string(),
                detail: err.to_string(),
            }
        }
        _ => ExtractError::Unknown {
            path: archive.display().to_string(),
            detail: err.to_string(),
        },
    }
}

fn classify_zip(archive: &Path, dest: &Path, err: zip::result::ZipError) -> ExtractError {
    use zip::result::ZipError;
    match err {
        ZipError::Io(io_err) => classify_io(archive, dest, io_err),
        ZipError::InvalidArchive(detail) => ExtractError::Corrupted {
            path: archive.display().to_string(),
            detail: detail.to_string(),
        },
        ZipError::UnsupportedArchive(detail) => ExtractError::Corrupted {
            path: archive.display().to_string(),
            detail: detail.to_string(),
        },
        other => ExtractError::Unknown {
            path: archive.display().to_string(),
            detail: other.to_string(),
        },
    }
}

/// Release archives usually wrap everything in a single `name-ref` directory.
/// Returns that directory when present so callers work with the real tree
/// root, and `dest` itself otherwise.
pub fn normalize_extracted_root(dest: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dest)
        .with_context(|| format!("failed to read directory: {}", dest.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dest.display()))?;
        paths.push(entry.path());
    }

    match paths.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(dest.to_path_buf()),
    }
}
