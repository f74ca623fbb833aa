use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use masonshell_core::{ArchiveFormat, ProjectLayout, ResolvedRelease, VersionRef};
use masonshell_fingerprint::FingerprintTable;
use masonshell_remote::{DownloadError, ReleaseSource, ResolveError};
use semver::Version;
use thiserror::Error;

use crate::compat::{
    run_compatibility_checks_with_probe, run_php_probe, CheckStatus, CompatibilityReport,
    RuntimeProbe,
};
use crate::extract::{extract_archive, normalize_extracted_root, ExtractError};
use crate::fs_utils::{move_dir_or_copy, move_tree_into, remove_path_if_exists, run_command};
use crate::replace::{
    build_replacement_plan, execute_replacement_plan, find_nonstandard_modes, normalize_modes,
    ReplaceError, ReplacementReport,
};
use crate::site_config::{append_config_directives, run_site_installer_with_runner, SiteSettings};
use crate::staging::{sweep_stale_staging, StagingDir};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Resolving,
    Downloading,
    Extracting,
    Replacing,
    CheckingCompatibility,
    Installing,
    Upgrading,
    CleaningUp,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "preflight",
            Self::Resolving => "resolve",
            Self::Downloading => "download",
            Self::Extracting => "extract",
            Self::Replacing => "replace",
            Self::CheckingCompatibility => "compatibility check",
            Self::Installing => "install",
            Self::Upgrading => "upgrade",
            Self::CleaningUp => "cleanup",
            Self::Done => "done",
        }
    }
}

/// Receives pipeline events as they happen. The CLI renders these; tests
/// record them.
pub trait PipelineReporter {
    fn stage_changed(&mut self, stage: Stage);
    fn progress(&mut self, bytes: u64, total: Option<u64>);
    fn note(&mut self, message: &str);
    fn warn(&mut self, message: &str);
}

pub struct NullReporter;

impl PipelineReporter for NullReporter {
    fn stage_changed(&mut self, _stage: Stage) {}
    fn progress(&mut self, _bytes: u64, _total: Option<u64>) {}
    fn note(&mut self, _message: &str) {}
    fn warn(&mut self, _message: &str) {}
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Replace(#[from] ReplaceError),
    #[error("environment is not compatible; {} required check(s) failed", .report.failure_count())]
    Compatibility { report: CompatibilityReport },
    #[error("no completed installation found at {root}; run 'masonshell new' first")]
    NotInstalled { root: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An aborted run. The stage records how far the pipeline got; everything
/// staged on disk has already been cleaned up by the time this is returned.
#[derive(Debug, Error)]
#[error("aborted during {}: {}", .stage.as_str(), .source)]
pub struct PipelineError {
    pub stage: Stage,
    pub source: StageError,
}

fn stage_error(stage: Stage, source: impl Into<StageError>) -> PipelineError {
    PipelineError {
        stage,
        source: source.into(),
    }
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub version: VersionRef,
    pub format: ArchiveFormat,
    pub force: bool,
    pub skip_site_install: bool,
    pub site: Option<SiteSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The marker file was already present; nothing was downloaded or
    /// touched.
    AlreadyInstalled,
    Installed {
        version: Option<Version>,
        site_installed: bool,
        compat: CompatibilityReport,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeMode {
    Full,
    CheckOnly,
    DownloadOnly,
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub version: VersionRef,
    pub format: ArchiveFormat,
    pub mode: UpgradeMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    UpToDate {
        installed: Option<Version>,
        remote: Option<Version>,
    },
    UpgradeAvailable {
        installed: Option<Version>,
        remote: Option<Version>,
    },
    Downloaded {
        version_label: String,
        cache_dir: PathBuf,
        archive_path: PathBuf,
    },
    Upgraded {
        from: Option<Version>,
        to: Option<Version>,
        report: ReplacementReport,
    },
}

pub fn run_install<Reporter>(
    layout: &ProjectLayout,
    request: &InstallRequest,
    source: &dyn ReleaseSource,
    reporter: &mut Reporter,
) -> Result<InstallOutcome, PipelineError>
where
    Reporter: PipelineReporter + ?Sized,
{
    run_install_with_hooks(layout, request, source, reporter, run_php_probe, run_command)
}

/// Runs the full installation pipeline. `probe` answers runtime questions
/// and `run` executes site commands, so tests can drive the pipeline without
/// a real `php` on the path.
pub fn run_install_with_hooks<Reporter, Probe, RunCommand>(
    layout: &ProjectLayout,
    request: &InstallRequest,
    source: &dyn ReleaseSource,
    reporter: &mut Reporter,
    probe: Probe,
    run: RunCommand,
) -> Result<InstallOutcome, PipelineError>
where
    Reporter: PipelineReporter + ?Sized,
    Probe: FnMut(RuntimeProbe) -> Result<String>,
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    if layout.has_completed_install() && !request.force {
        reporter.note("a completed installation is already present; nothing to do");
        return Ok(InstallOutcome::AlreadyInstalled);
    }
    layout
        .ensure_root()
        .map_err(|err| stage_error(Stage::Idle, err))?;
    sweep_and_report(layout, reporter);

    reporter.stage_changed(Stage::Resolving);
    let resolved = source
        .resolve(&request.version, request.format)
        .map_err(|err| stage_error(Stage::Resolving, err))?;
    if let Some(version) = &resolved.version {
        reporter.note(&format!("resolved '{}' to version {version}", request.version));
    }

    let staging =
        StagingDir::create(layout).map_err(|err| stage_error(Stage::Downloading, err))?;
    let result =
        install_from_release(layout, request, source, reporter, probe, run, &resolved, &staging);

    reporter.stage_changed(Stage::CleaningUp);
    if let Err(err) = staging.remove() {
        reporter.warn(&format!("{err:#}"));
    }
    let (site_installed, compat) = result?;

    if site_installed {
        remove_installer_artifacts(layout, reporter);
    }
    write_marker(layout, resolved.version.as_ref())
        .map_err(|err| stage_error(Stage::CleaningUp, err))?;

    reporter.stage_changed(Stage::Done);
    Ok(InstallOutcome::Installed {
        version: resolved.version,
        site_installed,
        compat,
    })
}

#[allow(clippy::too_many_arguments)]
fn install_from_release<Reporter, Probe, RunCommand>(
    layout: &ProjectLayout,
    request: &InstallRequest,
    source: &dyn ReleaseSource,
    reporter: &mut Reporter,
    mut probe: Probe,
    mut run: RunCommand,
    resolved: &ResolvedRelease,
    staging: &StagingDir,
) -> Result<(bool, CompatibilityReport), PipelineError>
where
    Reporter: PipelineReporter + ?Sized,
    Probe: FnMut(RuntimeProbe) -> Result<String>,
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    reporter.stage_changed(Stage::Downloading);
    let archive_path = staging.archive_path(request.format);
    let written = source
        .download(&resolved.source, &archive_path, &mut |bytes, total| {
            reporter.progress(bytes, total)
        })
        .map_err(|err| stage_error(Stage::Downloading, err))?;
    reporter.note(&format!("downloaded {written} bytes"));

    reporter.stage_changed(Stage::Extracting);
    let extract_dir = staging.extract_dir();
    extract_archive(&archive_path, &extract_dir, request.format)
        .map_err(|err| stage_error(Stage::Extracting, err))?;
    let tree_root = normalize_extracted_root(&extract_dir)
        .map_err(|err| stage_error(Stage::Extracting, err))?;
    // A forced reinstall refreshes the release files but keeps the user's
    // site directory.
    move_tree_into(&tree_root, layout.root(), request.force, &["site"])
        .map_err(|err| stage_error(Stage::Extracting, err))?;

    reporter.stage_changed(Stage::CheckingCompatibility);
    let report = run_compatibility_checks_with_probe(layout, &mut probe)
        .map_err(|err| stage_error(Stage::CheckingCompatibility, err))?;
    for check in &report.checks {
        if check.status == CheckStatus::Warn {
            reporter.warn(&format!("{}: {}", check.name, check.detail));
        }
    }
    if !report.passed() {
        return Err(stage_error(
            Stage::CheckingCompatibility,
            StageError::Compatibility { report },
        ));
    }

    reporter.stage_changed(Stage::Installing);
    let site_installed = if request.skip_site_install {
        reporter.note("leaving the site uninstalled; finish setup in the browser");
        false
    } else {
        let Some(site) = request.site.as_ref() else {
            return Err(stage_error(
                Stage::Installing,
                anyhow!("site settings are required unless the site install is skipped"),
            ));
        };
        append_config_directives(layout, &site.database, &site.timezone)
            .map_err(|err| stage_error(Stage::Installing, err))?;
        reporter.note("appended database and timezone settings to site/config.php");
        run_site_installer_with_runner(layout, site, &mut run)
            .map_err(|err| stage_error(Stage::Installing, err))?;
        reporter.note("site installer finished");
        true
    };

    Ok((site_installed, report))
}

pub fn run_upgrade<Reporter>(
    layout: &ProjectLayout,
    request: &UpgradeRequest,
    source: &dyn ReleaseSource,
    reporter: &mut Reporter,
) -> Result<UpgradeOutcome, PipelineError>
where
    Reporter: PipelineReporter + ?Sized,
{
    run_upgrade_with_hooks(layout, request, source, reporter, |_prompt| false)
}

/// Runs the upgrade pipeline. `confirm` answers yes/no questions such as the
/// permission normalization offer; the default declines everything.
pub fn run_upgrade_with_hooks<Reporter, Confirm>(
    layout: &ProjectLayout,
    request: &UpgradeRequest,
    source: &dyn ReleaseSource,
    reporter: &mut Reporter,
    confirm: Confirm,
) -> Result<UpgradeOutcome, PipelineError>
where
    Reporter: PipelineReporter + ?Sized,
    Confirm: FnMut(&str) -> bool,
{
    if !layout.has_completed_install() {
        return Err(stage_error(
            Stage::Idle,
            StageError::NotInstalled {
                root: layout.root().display().to_string(),
            },
        ));
    }
    let installed = layout
        .installed_version()
        .map_err(|err| stage_error(Stage::Idle, err))?;
    match &installed {
        Some(version) => reporter.note(&format!("installed version is {version}")),
        None => reporter.warn("could not determine the installed version"),
    }
    if request.mode != UpgradeMode::CheckOnly {
        sweep_and_report(layout, reporter);
    }

    reporter.stage_changed(Stage::Resolving);
    let resolved = source
        .resolve(&request.version, request.format)
        .map_err(|err| stage_error(Stage::Resolving, err))?;
    let remote = resolved.version.clone();
    match &remote {
        Some(version) => reporter.note(&format!("latest release is {version}")),
        None => reporter.warn("could not determine the remote release version"),
    }

    if request.mode != UpgradeMode::DownloadOnly {
        if let (Some(installed), Some(remote)) = (&installed, &remote) {
            if remote <= installed {
                reporter.stage_changed(Stage::Done);
                return Ok(UpgradeOutcome::UpToDate {
                    installed: Some(installed.clone()),
                    remote: Some(remote.clone()),
                });
            }
        }
    }
    if request.mode == UpgradeMode::CheckOnly {
        reporter.stage_changed(Stage::Done);
        return Ok(UpgradeOutcome::UpgradeAvailable { installed, remote });
    }

    let staging =
        StagingDir::create(layout).map_err(|err| stage_error(Stage::Downloading, err))?;
    let result = upgrade_from_release(
        layout, request, source, reporter, confirm, &resolved, &staging, installed,
    );

    reporter.stage_changed(Stage::CleaningUp);
    if let Err(err) = staging.remove() {
        reporter.warn(&format!("{err:#}"));
    }
    let outcome = result?;

    reporter.stage_changed(Stage::Done);
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn upgrade_from_release<Reporter, Confirm>(
    layout: &ProjectLayout,
    request: &UpgradeRequest,
    source: &dyn ReleaseSource,
    reporter: &mut Reporter,
    mut confirm: Confirm,
    resolved: &ResolvedRelease,
    staging: &StagingDir,
    installed: Option<Version>,
) -> Result<UpgradeOutcome, PipelineError>
where
    Reporter: PipelineReporter + ?Sized,
    Confirm: FnMut(&str) -> bool,
{
    reporter.stage_changed(Stage::Downloading);
    let archive_path = staging.archive_path(request.format);
    let written = source
        .download(&resolved.source, &archive_path, &mut |bytes, total| {
            reporter.progress(bytes, total)
        })
        .map_err(|err| stage_error(Stage::Downloading, err))?;
    reporter.note(&format!("downloaded {written} bytes"));

    reporter.stage_changed(Stage::Extracting);
    let extract_dir = staging.extract_dir();
    extract_archive(&archive_path, &extract_dir, request.format)
        .map_err(|err| stage_error(Stage::Extracting, err))?;
    let tree_root = normalize_extracted_root(&extract_dir)
        .map_err(|err| stage_error(Stage::Extracting, err))?;

    let incoming_label = resolved
        .version
        .as_ref()
        .map(|version| version.to_string())
        .unwrap_or_else(|| request.version.git_ref());

    if request.mode == UpgradeMode::DownloadOnly {
        let cache_dir = layout.download_cache_dir().join(&incoming_label);
        remove_path_if_exists(&cache_dir).map_err(|err| stage_error(Stage::Extracting, err))?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create {}", cache_dir.display()))
            .map_err(|err| stage_error(Stage::Extracting, err))?;
        move_dir_or_copy(&tree_root, &cache_dir.join("tree"))
            .map_err(|err| stage_error(Stage::Extracting, err))?;
        let cached_archive =
            cache_dir.join(format!("masonry-{incoming_label}.{}", request.format.extension()));
        if fs::rename(&archive_path, &cached_archive).is_err() {
            fs::copy(&archive_path, &cached_archive)
                .with_context(|| format!("failed to copy archive to {}", cached_archive.display()))
                .map_err(|err| stage_error(Stage::Extracting, err))?;
        }
        reporter.note(&format!("saved release files under {}", cache_dir.display()));
        return Ok(UpgradeOutcome::Downloaded {
            version_label: incoming_label,
            cache_dir,
            archive_path: cached_archive,
        });
    }

    reporter.stage_changed(Stage::Replacing);
    let mut table = FingerprintTable::builtin();
    match table.extend_from_manifest(&layout.fingerprint_manifest_path()) {
        Ok(true) => reporter.note("loaded fingerprint manifest overrides"),
        Ok(false) => {}
        Err(err) => return Err(stage_error(Stage::Replacing, err)),
    }
    let installed_label = installed
        .as_ref()
        .map(|version| version.to_string())
        .unwrap_or_else(|| "previous".to_string());
    let plan = build_replacement_plan(layout, &tree_root)
        .map_err(|err| stage_error(Stage::Replacing, err))?;
    let report = execute_replacement_plan(&plan, &table, &installed_label, &incoming_label)
        .map_err(|err| stage_error(Stage::Replacing, err))?;
    for kept in &report.manual_review {
        reporter.warn(&format!(
            "{} has local changes; the new copy was saved at {}",
            kept.dest.display(),
            kept.saved_copy.display()
        ));
    }

    match find_nonstandard_modes(layout) {
        Ok(found) if !found.is_empty() => {
            let question = format!(
                "{} path(s) have non-standard permissions; normalize to 755/644?",
                found.len()
            );
            if confirm(&question) {
                match normalize_modes(&found) {
                    Ok(()) => {
                        reporter.note(&format!("normalized permissions on {} path(s)", found.len()))
                    }
                    Err(err) => reporter.warn(&format!("{err:#}")),
                }
            }
        }
        Ok(_) => {}
        Err(err) => reporter.warn(&format!("could not scan file permissions: {err:#}")),
    }

    reporter.stage_changed(Stage::Upgrading);
    let now_installed = layout
        .installed_version()
        .map_err(|err| stage_error(Stage::Upgrading, err))?;
    let to = now_installed.or_else(|| resolved.version.clone());
    Ok(UpgradeOutcome::Upgraded {
        from: installed,
        to,
        report,
    })
}

fn sweep_and_report<Reporter>(layout: &ProjectLayout, reporter: &mut Reporter)
where
    Reporter: PipelineReporter + ?Sized,
{
    match sweep_stale_staging(layout) {
        Ok(removed) => {
            for path in removed {
                reporter.note(&format!("removed stale staging directory {}", path.display()));
            }
        }
        Err(err) => reporter.warn(&format!("could not sweep stale staging directories: {err:#}")),
    }
}

fn remove_installer_artifacts<Reporter>(layout: &ProjectLayout, reporter: &mut Reporter)
where
    Reporter: PipelineReporter + ?Sized,
{
    for path in layout.installer_artifact_paths() {
        if !path.exists() {
            continue;
        }
        match remove_path_if_exists(&path) {
            Ok(()) => reporter.note(&format!("removed installer artifact {}", path.display())),
            Err(err) => reporter.warn(&format!("{err:#}")),
        }
    }
}

fn write_marker(layout: &ProjectLayout, version: Option<&Version>) -> Result<()> {
    let path = layout.marker_path();
    if path.is_file() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs();
    let label = version
        .map(|version| version.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let contents =
        format!("<?php // installed by masonshell\n// version: {label}\n// completed: {timestamp}\n");
    fs::write(&path, contents)
        .with_context(|| format!("failed to write marker file {}", path.display()))
}
