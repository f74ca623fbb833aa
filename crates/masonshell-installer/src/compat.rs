use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use masonshell_core::{ProjectLayout, ACCESS_TEMPLATE_NAME};
use semver::Version;

use crate::fs_utils::run_command_capture;

pub const REQUIRED_EXTENSIONS: [&str; 7] =
    ["pdo_mysql", "pcre", "hash", "json", "session", "ctype", "spl"];
pub const OPTIONAL_EXTENSIONS: [&str; 5] = ["gd", "zip", "curl", "mbstring", "openssl"];

pub fn minimum_runtime_version() -> Version {
    Version::new(8, 1, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompatibilityReport {
    pub checks: Vec<CompatCheck>,
}

impl CompatibilityReport {
    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .all(|check| check.status != CheckStatus::Fail)
    }

    pub fn failure_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|check| check.status == CheckStatus::Fail)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|check| check.status == CheckStatus::Warn)
            .count()
    }

    fn push(&mut self, name: &str, status: CheckStatus, detail: impl Into<String>) {
        self.checks.push(CompatCheck {
            name: name.to_string(),
            status,
            detail: detail.into(),
        });
    }
}

/// Which runtime question a probe answers. Production probes shell out to
/// `php`; tests substitute canned output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeProbe {
    Version,
    Modules,
}

pub(crate) fn run_php_probe(probe: RuntimeProbe) -> Result<String> {
    let mut command = Command::new("php");
    let context_message = match probe {
        RuntimeProbe::Version => {
            command.arg("-r").arg("echo PHP_VERSION;");
            "failed to query runtime version"
        }
        RuntimeProbe::Modules => {
            command.arg("-m");
            "failed to list runtime extensions"
        }
    };
    run_command_capture(&mut command, context_message)
}

pub fn run_compatibility_checks(layout: &ProjectLayout) -> Result<CompatibilityReport> {
    run_compatibility_checks_with_probe(layout, run_php_probe)
}

/// Runs the pre-install environment checks against the unpacked tree. Any
/// `Fail` entry blocks installation; `Warn` entries are reported but not
/// fatal.
pub fn run_compatibility_checks_with_probe<Probe>(
    layout: &ProjectLayout,
    mut probe: Probe,
) -> Result<CompatibilityReport>
where
    Probe: FnMut(RuntimeProbe) -> Result<String>,
{
    let mut report = CompatibilityReport::default();

    match probe(RuntimeProbe::Version) {
        Ok(raw) => {
            let text = raw.trim().to_string();
            match parse_runtime_version(&text) {
                Some(version) if version >= minimum_runtime_version() => {
                    report.push("runtime version", CheckStatus::Pass, format!("php {text}"));
                }
                Some(version) => {
                    report.push(
                        "runtime version",
                        CheckStatus::Fail,
                        format!(
                            "php {version} is below the required {}",
                            minimum_runtime_version()
                        ),
                    );
                }
                None => {
                    report.push(
                        "runtime version",
                        CheckStatus::Fail,
                        format!("could not parse runtime version from {text:?}"),
                    );
                }
            }
        }
        Err(err) => {
            report.push(
                "runtime version",
                CheckStatus::Fail,
                format!("php runtime not available: {err:#}"),
            );
        }
    }

    match probe(RuntimeProbe::Modules) {
        Ok(raw) => {
            let loaded = parse_loaded_extensions(&raw);
            for name in REQUIRED_EXTENSIONS {
                if loaded.contains(name) {
                    report.push(&format!("extension {name}"), CheckStatus::Pass, "loaded");
                } else {
                    report.push(
                        &format!("extension {name}"),
                        CheckStatus::Fail,
                        "required extension is not loaded",
                    );
                }
            }
            for name in OPTIONAL_EXTENSIONS {
                if loaded.contains(name) {
                    report.push(&format!("extension {name}"), CheckStatus::Pass, "loaded");
                } else {
                    report.push(
                        &format!("extension {name}"),
                        CheckStatus::Warn,
                        "optional extension is not loaded",
                    );
                }
            }
        }
        Err(err) => {
            report.push(
                "extensions",
                CheckStatus::Fail,
                format!("could not list extensions: {err:#}"),
            );
        }
    }

    report
        .checks
        .push(check_writable_dir("assets writable", &layout.assets_dir()));
    report
        .checks
        .push(check_appendable_file("config writable", &layout.config_path()));

    match ensure_access_file(layout)? {
        AccessFileState::AlreadyInPlace => {
            report.push("access file", CheckStatus::Pass, "already in place");
        }
        AccessFileState::RenamedFromTemplate => {
            report.push(
                "access file",
                CheckStatus::Pass,
                format!("renamed {ACCESS_TEMPLATE_NAME} into place"),
            );
        }
        AccessFileState::Unrecognized => {
            report.push(
                "access file",
                CheckStatus::Fail,
                format!(
                    "the access file was not written by Masonry; merge {ACCESS_TEMPLATE_NAME} into it by hand"
                ),
            );
        }
        AccessFileState::Missing => {
            report.push(
                "access file",
                CheckStatus::Fail,
                format!("neither the access file nor {ACCESS_TEMPLATE_NAME} is present"),
            );
        }
    }

    Ok(report)
}

/// Guard comment every shipped access rules file starts with.
pub const ACCESS_FILE_MARKER: &str = "# Masonry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFileState {
    AlreadyInPlace,
    RenamedFromTemplate,
    /// Present on disk but without the guard comment, so it belongs to some
    /// other system and must be merged by hand.
    Unrecognized,
    Missing,
}

/// Puts the access rules file in place, renaming the shipped template when
/// the live file does not exist yet. An existing file is only accepted when
/// it carries the guard comment.
pub fn ensure_access_file(layout: &ProjectLayout) -> Result<AccessFileState> {
    let access = layout.access_file_path();
    if access.is_file() {
        let contents = fs::read_to_string(&access)
            .with_context(|| format!("failed to read {}", access.display()))?;
        if contents.lines().any(|line| line.trim_start().starts_with(ACCESS_FILE_MARKER)) {
            return Ok(AccessFileState::AlreadyInPlace);
        }
        return Ok(AccessFileState::Unrecognized);
    }
    let template = layout.access_template_path();
    if template.is_file() {
        fs::rename(&template, &access).with_context(|| {
            format!(
                "failed to rename {} to {}",
                template.display(),
                access.display()
            )
        })?;
        return Ok(AccessFileState::RenamedFromTemplate);
    }
    Ok(AccessFileState::Missing)
}

fn check_writable_dir(name: &str, dir: &Path) -> CompatCheck {
    if let Err(err) = fs::create_dir_all(dir) {
        return CompatCheck {
            name: name.to_string(),
            status: CheckStatus::Fail,
            detail: format!("cannot create {}: {err}", dir.display()),
        };
    }
    let probe = dir.join(".masonshell-write-probe");
    let result = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&probe)
        .and_then(|mut file| file.write_all(b"probe"));
    let _ = fs::remove_file(&probe);
    match result {
        Ok(()) => CompatCheck {
            name: name.to_string(),
            status: CheckStatus::Pass,
            detail: format!("{} is writable", dir.display()),
        },
        Err(err) => CompatCheck {
            name: name.to_string(),
            status: CheckStatus::Fail,
            detail: format!("cannot write into {}: {err}", dir.display()),
        },
    }
}

fn check_appendable_file(name: &str, path: &Path) -> CompatCheck {
    if !path.is_file() {
        return CompatCheck {
            name: name.to_string(),
            status: CheckStatus::Fail,
            detail: format!("{} is missing from the unpacked tree", path.display()),
        };
    }
    match OpenOptions::new().append(true).open(path) {
        Ok(_) => CompatCheck {
            name: name.to_string(),
            status: CheckStatus::Pass,
            detail: format!("{} accepts appends", path.display()),
        },
        Err(err) => CompatCheck {
            name: name.to_string(),
            status: CheckStatus::Fail,
            detail: format!("cannot open {} for writing: {err}", path.display()),
        },
    }
}

fn parse_runtime_version(raw: &str) -> Option<Version> {
    // Distro builds report versions like "8.1.2-1ubuntu2.14"; only the
    // leading triple matters here.
    let core = raw.trim().split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some(Version::new(major, minor, patch))
}

fn parse_loaded_extensions(raw: &str) -> BTreeSet<String> {
    raw.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('['))
        .map(|line| line.to_ascii_lowercase())
        .collect()
}
