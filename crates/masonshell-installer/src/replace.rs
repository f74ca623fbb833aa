use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use masonshell_core::{
    ProjectLayout, ACCESS_FILE_NAME, ACCESS_TEMPLATE_NAME, ENTRYPOINT_NAME, PAYLOAD_DIR_NAME,
};
use masonshell_fingerprint::{fingerprint_file, FileRole, FingerprintTable};
use thiserror::Error;

use crate::fs_utils::{move_dir_or_copy, remove_path_if_exists};

/// One live path scheduled for replacement from a staged release tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub kind: EntryKind,
    pub source: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    PayloadDir,
    TrackedFile(FileRole),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementPlan {
    pub entries: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedPath {
    pub dest: PathBuf,
    /// Release the previous copy matched, when the fingerprint table knew it.
    pub matched_release: Option<String>,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualReviewFile {
    pub dest: PathBuf,
    /// Where the incoming copy was parked for the user to merge by hand.
    pub saved_copy: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementFailure {
    pub dest: PathBuf,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplacementReport {
    pub replaced: Vec<ReplacedPath>,
    pub manual_review: Vec<ManualReviewFile>,
    pub failures: Vec<ReplacementFailure>,
}

#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("{} path(s) could not be replaced; the site was left on its previous files where possible", .report.failures.len())]
    Failures { report: ReplacementReport },
}

/// Builds the ordered replacement plan for an upgrade: the payload directory
/// first, then the tracked root files. The payload directory must exist in
/// the staged tree; tracked files are optional since some releases only ship
/// a template for them.
pub fn build_replacement_plan(layout: &ProjectLayout, staged_root: &Path) -> Result<ReplacementPlan> {
    let staged_payload = staged_root.join(PAYLOAD_DIR_NAME);
    if !staged_payload.is_dir() {
        bail!(
            "extracted tree has no '{}' directory; this does not look like a Masonry release",
            PAYLOAD_DIR_NAME
        );
    }

    let mut entries = vec![PlanEntry {
        kind: EntryKind::PayloadDir,
        source: staged_payload,
        dest: layout.payload_dir(),
    }];

    let staged_entrypoint = staged_root.join(ENTRYPOINT_NAME);
    if staged_entrypoint.is_file() {
        entries.push(PlanEntry {
            kind: EntryKind::TrackedFile(FileRole::Entrypoint),
            source: staged_entrypoint,
            dest: layout.entrypoint_path(),
        });
    }

    // Releases ship the access rules as a template next to the entrypoint.
    let staged_access = staged_root.join(ACCESS_TEMPLATE_NAME);
    let staged_access = if staged_access.is_file() {
        staged_access
    } else {
        staged_root.join(ACCESS_FILE_NAME)
    };
    if staged_access.is_file() {
        entries.push(PlanEntry {
            kind: EntryKind::TrackedFile(FileRole::AccessFile),
            source: staged_access,
            dest: layout.access_file_path(),
        });
    }

    Ok(ReplacementPlan { entries })
}

/// Executes the plan. The payload directory is swapped via a versioned backup
/// that is only deleted once the new directory is confirmed in place. Tracked
/// files are replaced automatically when their current hash matches a known
/// release; otherwise the incoming copy is parked next to the live file under
/// the new version's suffix and flagged for manual review. File-level
/// failures are collected rather than aborting the rest of the plan.
pub fn execute_replacement_plan(
    plan: &ReplacementPlan,
    table: &FingerprintTable,
    installed_label: &str,
    incoming_label: &str,
) -> Result<ReplacementReport, ReplaceError> {
    let mut report = ReplacementReport::default();

    for entry in &plan.entries {
        match entry.kind {
            EntryKind::PayloadDir => {
                if let Err(err) = swap_payload_dir(entry, installed_label, &mut report) {
                    report.failures.push(ReplacementFailure {
                        dest: entry.dest.clone(),
                        detail: format!("{err:#}"),
                    });
                    // Without a fresh payload directory the file swaps would
                    // produce a mixed-version site.
                    break;
                }
            }
            EntryKind::TrackedFile(role) => {
                replace_tracked_file(entry, role, table, incoming_label, &mut report);
            }
        }
    }

    if report.failures.is_empty() {
        Ok(report)
    } else {
        Err(ReplaceError::Failures { report })
    }
}

fn swap_payload_dir(
    entry: &PlanEntry,
    installed_label: &str,
    report: &mut ReplacementReport,
) -> Result<()> {
    if !entry.dest.exists() {
        move_dir_or_copy(&entry.source, &entry.dest)?;
        report.replaced.push(ReplacedPath {
            dest: entry.dest.clone(),
            matched_release: None,
            backup: None,
        });
        return Ok(());
    }

    let backup = ProjectLayout::versioned_backup_path(&entry.dest, installed_label);
    remove_path_if_exists(&backup)?;
    fs::rename(&entry.dest, &backup).with_context(|| {
        format!(
            "failed to move {} aside to {}",
            entry.dest.display(),
            backup.display()
        )
    })?;

    if let Err(err) = move_dir_or_copy(&entry.source, &entry.dest) {
        // Put the previous payload back so the site keeps working.
        let restore = fs::rename(&backup, &entry.dest);
        return match restore {
            Ok(()) => Err(err),
            Err(restore_err) => Err(err.context(format!(
                "and restoring the previous payload failed too: {restore_err}"
            ))),
        };
    }

    if !entry.dest.is_dir() {
        bail!(
            "payload swap left no directory at {}; previous copy kept at {}",
            entry.dest.display(),
            backup.display()
        );
    }
    fs::remove_dir_all(&backup)
        .with_context(|| format!("failed to remove payload backup {}", backup.display()))?;

    report.replaced.push(ReplacedPath {
        dest: entry.dest.clone(),
        matched_release: None,
        backup: None,
    });
    Ok(())
}

fn replace_tracked_file(
    entry: &PlanEntry,
    role: FileRole,
    table: &FingerprintTable,
    incoming_label: &str,
    report: &mut ReplacementReport,
) {
    if !entry.dest.exists() {
        if let Err(err) = fs::copy(&entry.source, &entry.dest) {
            report.failures.push(ReplacementFailure {
                dest: entry.dest.clone(),
                detail: format!("failed to install {}: {err}", entry.dest.display()),
            });
            return;
        }
        report.replaced.push(ReplacedPath {
            dest: entry.dest.clone(),
            matched_release: None,
            backup: None,
        });
        return;
    }

    let live_hash = match fingerprint_file(&entry.dest) {
        Ok(hash) => hash,
        Err(err) => {
            report.failures.push(ReplacementFailure {
                dest: entry.dest.clone(),
                detail: format!("{err:#}"),
            });
            return;
        }
    };

    match table.classify(role, &live_hash) {
        Some(known) => {
            let backup = ProjectLayout::versioned_backup_path(&entry.dest, &known.release);
            if let Err(err) = backup_and_replace(entry, &backup) {
                report.failures.push(ReplacementFailure {
                    dest: entry.dest.clone(),
                    detail: format!("{err:#}"),
                });
                return;
            }
            report.replaced.push(ReplacedPath {
                dest: entry.dest.clone(),
                matched_release: Some(known.release.clone()),
                backup: Some(backup),
            });
        }
        None => {
            // Unknown hash means local edits. Leave the live file untouched
            // and park the incoming copy beside it.
            let saved_copy = ProjectLayout::versioned_backup_path(&entry.dest, incoming_label);
            if let Err(err) = fs::copy(&entry.source, &saved_copy) {
                report.failures.push(ReplacementFailure {
                    dest: entry.dest.clone(),
                    detail: format!(
                        "failed to save incoming copy to {}: {err}",
                        saved_copy.display()
                    ),
                });
                return;
            }
            report.manual_review.push(ManualReviewFile {
                dest: entry.dest.clone(),
                saved_copy,
            });
        }
    }
}

fn backup_and_replace(entry: &PlanEntry, backup: &Path) -> Result<()> {
    remove_path_if_exists(backup)?;
    fs::rename(&entry.dest, backup).with_context(|| {
        format!(
            "failed to back up {} to {}",
            entry.dest.display(),
            backup.display()
        )
    })?;

    if let Err(err) = fs::copy(&entry.source, &entry.dest) {
        let restore = fs::rename(backup, &entry.dest);
        return match restore {
            Ok(()) => Err(err).with_context(|| {
                format!("failed to install new copy at {}", entry.dest.display())
            }),
            Err(restore_err) => Err(err).with_context(|| {
                format!(
                    "failed to install new copy at {} and restoring the backup failed too: {restore_err}",
                    entry.dest.display()
                )
            }),
        };
    }

    Ok(())
}

#[cfg(unix)]
pub fn find_nonstandard_modes(layout: &ProjectLayout) -> Result<Vec<(PathBuf, u32)>> {
    use std::os::unix::fs::PermissionsExt;

    let mut found = Vec::new();
    let mut pending = vec![layout.payload_dir()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read directory: {}", dir.display()))
            }
        };
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
            let metadata = entry
                .metadata()
                .with_context(|| format!("failed to inspect {}", entry.path().display()))?;
            let mode = metadata.permissions().mode() & 0o7777;
            if metadata.is_dir() {
                if mode != 0o755 {
                    found.push((entry.path(), mode));
                }
                pending.push(entry.path());
            } else if metadata.is_file() && mode != 0o644 {
                found.push((entry.path(), mode));
            }
        }
    }

    let entrypoint = layout.entrypoint_path();
    if let Ok(metadata) = fs::metadata(&entrypoint) {
        let mode = metadata.permissions().mode() & 0o7777;
        if mode != 0o644 {
            found.push((entrypoint, mode));
        }
    }

    Ok(found)
}

#[cfg(unix)]
pub fn normalize_modes(paths: &[(PathBuf, u32)]) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for (path, _) in paths {
        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to inspect {}", path.display()))?;
        let mode = if metadata.is_dir() { 0o755 } else { 0o644 };
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn find_nonstandard_modes(_layout: &ProjectLayout) -> Result<Vec<(PathBuf, u32)>> {
    Ok(Vec::new())
}

#[cfg(not(unix))]
pub fn normalize_modes(_paths: &[(PathBuf, u32)]) -> Result<()> {
    Ok(())
}
