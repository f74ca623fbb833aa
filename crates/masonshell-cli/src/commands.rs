use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use masonshell_core::{ProjectLayout, VersionRef};
use masonshell_installer::{
    run_install, run_upgrade_with_hooks, verify_database, AdminSettings, DatabaseSettings,
    InstallOutcome, InstallRequest, SiteSettings, UpgradeMode, UpgradeOutcome, UpgradeRequest,
    DEFAULT_DB_HOST, DEFAULT_DB_PORT, DEFAULT_TIMEZONE,
};
use masonshell_remote::{HttpReleaseSource, RemoteOptions};
use semver::Version;
use serde::Serialize;

use crate::completion::write_completions_script;
use crate::prompt::{prompt_confirm, prompt_line, prompt_required};
use crate::render::{render_status_line, OutputStyle, PipelineConsole, TerminalRenderer};
use crate::{Cli, Commands};

pub(crate) const DEFAULT_ADMIN_NAME: &str = "admin";

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::New {
            directory,
            release,
            format,
            host,
            db_host,
            db_port,
            db_name,
            db_user,
            db_pass,
            timezone,
            admin_name,
            admin_pass,
            admin_email,
            no_install,
            force,
            yes,
        } => {
            let version = parse_release_ref(&release)?;
            let layout = ProjectLayout::new(project_root(directory));
            let source = release_source(host)?;
            let renderer = TerminalRenderer::current();

            let site = if no_install {
                None
            } else {
                let prefill = SitePrefill {
                    db_host,
                    db_port,
                    db_name,
                    db_user,
                    db_pass,
                    timezone,
                    admin_name,
                    admin_pass,
                    admin_email,
                };
                let mut input = io::stdin().lock();
                let settings = collect_site_settings(&mut input, &prefill, yes)?;
                let database =
                    settle_database_settings(&mut input, settings.database.clone(), yes, renderer)?;
                Some(SiteSettings { database, ..settings })
            };

            let request = InstallRequest {
                version,
                format: format.into(),
                force,
                skip_site_install: no_install,
                site,
            };
            let mut console = PipelineConsole::new(renderer);
            let outcome = run_install(&layout, &request, &source, &mut console)?;
            drop(console);
            for line in format_new_outcome_lines(&outcome, renderer.style()) {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Upgrade {
            directory,
            check,
            download,
            release,
            format,
            host,
            yes,
        } => {
            let version = parse_release_ref(&release)?;
            let layout = ProjectLayout::new(project_root(directory));
            let source = release_source(host)?;
            let renderer = TerminalRenderer::current();
            let mode = if check {
                UpgradeMode::CheckOnly
            } else if download {
                UpgradeMode::DownloadOnly
            } else {
                UpgradeMode::Full
            };
            let request = UpgradeRequest {
                version,
                format: format.into(),
                mode,
            };

            let outcome = {
                let mut input = io::stdin().lock();
                let mut console = PipelineConsole::new(renderer);
                run_upgrade_with_hooks(&layout, &request, &source, &mut console, |question| {
                    yes || prompt_confirm(&mut input, question, false).unwrap_or(false)
                })?
            };
            for line in format_upgrade_outcome_lines(&outcome, renderer.style()) {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Status { directory, json } => {
            let layout = ProjectLayout::new(project_root(directory));
            let report = build_status_report(&layout)?;
            if json {
                let rendered = serde_json::to_string_pretty(&report)
                    .context("failed to render status as JSON")?;
                println!("{rendered}");
            } else {
                for line in format_status_lines(&report) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        Commands::Completions { shell } => write_completions_script(shell, &mut io::stdout()),
    }
}

fn project_root(directory: Option<PathBuf>) -> PathBuf {
    directory.unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn parse_release_ref(input: &str) -> Result<VersionRef> {
    VersionRef::parse(input)
        .ok_or_else(|| anyhow!("'{input}' is not a release version, branch, or commit"))
}

fn release_source(host: Option<String>) -> Result<HttpReleaseSource> {
    let options = match host {
        Some(base_url) => RemoteOptions {
            base_url,
            ..RemoteOptions::default()
        },
        None => RemoteOptions::default(),
    };
    HttpReleaseSource::new(options)
}

/// Values carried in from command line flags; anything left `None` is
/// prompted for.
#[derive(Debug, Clone, Default)]
pub(crate) struct SitePrefill {
    pub(crate) db_host: Option<String>,
    pub(crate) db_port: Option<u16>,
    pub(crate) db_name: Option<String>,
    pub(crate) db_user: Option<String>,
    pub(crate) db_pass: Option<String>,
    pub(crate) timezone: Option<String>,
    pub(crate) admin_name: Option<String>,
    pub(crate) admin_pass: Option<String>,
    pub(crate) admin_email: Option<String>,
}

fn settle_value(
    reader: &mut dyn BufRead,
    assume_yes: bool,
    flag: Option<String>,
    label: &str,
    default: Option<&str>,
) -> Result<String> {
    if let Some(value) = flag {
        return Ok(value);
    }
    if assume_yes {
        if let Some(default) = default {
            return Ok(default.to_string());
        }
        bail!("{label} is required; pass the flag or run without --yes");
    }
    match default {
        Some(default) => prompt_line(reader, label, Some(default)),
        None => prompt_required(reader, label),
    }
}

/// Fills in the site settings from flags first, then prompts for the rest.
/// With `assume_yes` nothing is read; missing values fall back to defaults or
/// fail.
pub(crate) fn collect_site_settings(
    reader: &mut dyn BufRead,
    prefill: &SitePrefill,
    assume_yes: bool,
) -> Result<SiteSettings> {
    let host = settle_value(
        reader,
        assume_yes,
        prefill.db_host.clone(),
        "database host",
        Some(DEFAULT_DB_HOST),
    )?;
    let port = match prefill.db_port {
        Some(port) => port,
        None => {
            let text = settle_value(
                reader,
                assume_yes,
                None,
                "database port",
                Some(&DEFAULT_DB_PORT.to_string()),
            )?;
            text.parse::<u16>()
                .with_context(|| format!("'{text}' is not a valid port number"))?
        }
    };
    let name = settle_value(reader, assume_yes, prefill.db_name.clone(), "database name", None)?;
    let user = settle_value(reader, assume_yes, prefill.db_user.clone(), "database user", None)?;
    let password = settle_value(
        reader,
        assume_yes,
        prefill.db_pass.clone(),
        "database password",
        None,
    )?;
    let timezone = settle_value(
        reader,
        assume_yes,
        prefill.timezone.clone(),
        "timezone",
        Some(DEFAULT_TIMEZONE),
    )?;
    let admin_name = settle_value(
        reader,
        assume_yes,
        prefill.admin_name.clone(),
        "admin name",
        Some(DEFAULT_ADMIN_NAME),
    )?;
    let admin_password = settle_value(
        reader,
        assume_yes,
        prefill.admin_pass.clone(),
        "admin password",
        None,
    )?;
    let admin_email = settle_value(
        reader,
        assume_yes,
        prefill.admin_email.clone(),
        "admin email",
        None,
    )?;

    Ok(SiteSettings {
        database: DatabaseSettings {
            host,
            port,
            name,
            user,
            password,
        },
        admin: AdminSettings {
            name: admin_name,
            password: admin_password,
            email: admin_email,
        },
        timezone,
    })
}

fn prompt_database_settings(
    reader: &mut dyn BufRead,
    previous: &DatabaseSettings,
) -> Result<DatabaseSettings> {
    let host = prompt_line(reader, "database host", Some(&previous.host))?;
    let port_text = prompt_line(reader, "database port", Some(&previous.port.to_string()))?;
    let port = port_text
        .parse::<u16>()
        .with_context(|| format!("'{port_text}' is not a valid port number"))?;
    let name = prompt_line(reader, "database name", Some(&previous.name))?;
    let user = prompt_line(reader, "database user", Some(&previous.user))?;
    let password = prompt_line(reader, "database password", Some(&previous.password))?;
    Ok(DatabaseSettings {
        host,
        port,
        name,
        user,
        password,
    })
}

pub(crate) const DB_VERIFY_ATTEMPTS: u32 = 3;

/// Checks the credentials up front so a typo surfaces before anything is
/// downloaded. `reprompt` supplies corrected settings between attempts;
/// returning `None` gives up immediately.
pub(crate) fn verify_database_with_retry<Verify, Reprompt>(
    mut db: DatabaseSettings,
    mut verify: Verify,
    mut reprompt: Reprompt,
) -> Result<DatabaseSettings>
where
    Verify: FnMut(&DatabaseSettings) -> Result<()>,
    Reprompt: FnMut(&DatabaseSettings, &anyhow::Error) -> Result<Option<DatabaseSettings>>,
{
    let mut attempt = 1_u32;
    loop {
        let err = match verify(&db) {
            Ok(()) => return Ok(db),
            Err(err) => err,
        };
        if attempt >= DB_VERIFY_ATTEMPTS {
            return Err(err.context(format!(
                "database verification failed after {DB_VERIFY_ATTEMPTS} attempt(s)"
            )));
        }
        match reprompt(&db, &err)? {
            Some(updated) => db = updated,
            None => return Err(err),
        }
        attempt += 1;
    }
}

fn settle_database_settings(
    reader: &mut dyn BufRead,
    initial: DatabaseSettings,
    assume_yes: bool,
    renderer: TerminalRenderer,
) -> Result<DatabaseSettings> {
    verify_database_with_retry(
        initial,
        |db| verify_database(db),
        |previous, err| {
            if assume_yes {
                return Ok(None);
            }
            eprintln!(
                "{}",
                render_status_line(renderer.style(), "warn", &format!("{err:#}"))
            );
            prompt_database_settings(reader, previous).map(Some)
        },
    )
}

pub(crate) fn format_new_outcome_lines(outcome: &InstallOutcome, style: OutputStyle) -> Vec<String> {
    match outcome {
        // The pipeline already notes that nothing needed doing.
        InstallOutcome::AlreadyInstalled => Vec::new(),
        InstallOutcome::Installed {
            version,
            site_installed,
            compat,
        } => {
            let headline = match version {
                Some(version) => format!("installed Masonry {version}"),
                None => "installed Masonry".to_string(),
            };
            let mut lines = vec![render_status_line(style, "ok", &headline)];
            if compat.warning_count() > 0 {
                lines.push(render_status_line(
                    style,
                    "warn",
                    &format!(
                        "{} optional compatibility check(s) reported warnings",
                        compat.warning_count()
                    ),
                ));
            }
            if *site_installed {
                lines.push(render_status_line(
                    style,
                    "ok",
                    "site installer completed; the admin account is ready",
                ));
            } else {
                lines.push(render_status_line(
                    style,
                    "step",
                    "open /install.php in the browser to finish setup",
                ));
            }
            lines
        }
    }
}

pub(crate) fn format_upgrade_outcome_lines(
    outcome: &UpgradeOutcome,
    style: OutputStyle,
) -> Vec<String> {
    match outcome {
        UpgradeOutcome::UpToDate { installed, remote } => vec![render_status_line(
            style,
            "ok",
            &format!(
                "site is up to date (installed {}, latest {})",
                version_text(installed),
                version_text(remote)
            ),
        )],
        UpgradeOutcome::UpgradeAvailable { installed, remote } => vec![
            render_status_line(
                style,
                "step",
                &format!(
                    "upgrade available: {} -> {}",
                    version_text(installed),
                    version_text(remote)
                ),
            ),
            render_status_line(style, "step", "run 'masonshell upgrade' to apply it"),
        ],
        UpgradeOutcome::Downloaded {
            version_label,
            cache_dir,
            archive_path,
        } => vec![
            render_status_line(
                style,
                "ok",
                &format!("saved release {version_label} under {}", cache_dir.display()),
            ),
            render_status_line(style, "step", &format!("archive: {}", archive_path.display())),
        ],
        UpgradeOutcome::Upgraded { from, to, report } => {
            let mut lines = vec![
                render_status_line(
                    style,
                    "ok",
                    &format!("upgraded {} -> {}", version_text(from), version_text(to)),
                ),
                render_status_line(
                    style,
                    "ok",
                    &format!("{} path(s) replaced", report.replaced.len()),
                ),
            ];
            for kept in &report.manual_review {
                lines.push(render_status_line(
                    style,
                    "warn",
                    &format!(
                        "review {} by hand; the new copy is at {}",
                        kept.dest.display(),
                        kept.saved_copy.display()
                    ),
                ));
            }
            lines
        }
    }
}

fn version_text(version: &Option<Version>) -> String {
    version
        .as_ref()
        .map(|version| version.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StatusReport {
    pub(crate) root: String,
    pub(crate) installed: bool,
    pub(crate) version: Option<String>,
    pub(crate) payload_present: bool,
    pub(crate) entrypoint_present: bool,
    pub(crate) access_file: &'static str,
    pub(crate) config_present: bool,
}

/// Reads the on-disk state without touching anything; `status` must stay
/// safe to run against a live site.
pub(crate) fn build_status_report(layout: &ProjectLayout) -> Result<StatusReport> {
    let version = layout.installed_version()?.map(|version| version.to_string());
    let access_file = if layout.access_file_path().is_file() {
        "in place"
    } else if layout.access_template_path().is_file() {
        "template only"
    } else {
        "missing"
    };
    Ok(StatusReport {
        root: layout.root().display().to_string(),
        installed: layout.has_completed_install(),
        version,
        payload_present: layout.payload_dir().is_dir(),
        entrypoint_present: layout.entrypoint_path().is_file(),
        access_file,
        config_present: layout.config_path().is_file(),
    })
}

pub(crate) fn format_status_lines(report: &StatusReport) -> Vec<String> {
    vec![
        format!("root: {}", report.root),
        format!("installed: {}", if report.installed { "yes" } else { "no" }),
        format!("version: {}", report.version.as_deref().unwrap_or("unknown")),
        format!("payload: {}", presence(report.payload_present)),
        format!("entrypoint: {}", presence(report.entrypoint_present)),
        format!("access file: {}", report.access_file),
        format!("config: {}", presence(report.config_present)),
    ]
}

fn presence(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "missing"
    }
}
