use super::*;

use std::env;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::CommandFactory;
use clap_complete::Shell;
use masonshell_core::{ArchiveFormat, ProjectLayout, VersionRef};
use masonshell_installer::{
    CheckStatus, CompatCheck, CompatibilityReport, DatabaseSettings, InstallOutcome,
    ManualReviewFile, PipelineReporter, ReplacementReport, Stage, UpgradeOutcome, DEFAULT_DB_HOST,
    DEFAULT_DB_PORT, DEFAULT_TIMEZONE,
};
use semver::Version;

use super::commands::{
    build_status_report, collect_site_settings, format_new_outcome_lines, format_status_lines,
    format_upgrade_outcome_lines, parse_release_ref, verify_database_with_retry, SitePrefill,
    StatusReport, DB_VERIFY_ATTEMPTS, DEFAULT_ADMIN_NAME,
};
use super::completion::write_completions_script;
use super::prompt::{parse_confirm_reply, prompt_confirm, prompt_line, prompt_required};
use super::render::{
    format_elapsed, render_progress_line, render_status_line, resolve_output_style, OutputStyle,
    PipelineConsole, TerminalRenderer,
};

fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("must read the system clock")
        .subsec_nanos();
    let dir = env::temp_dir().join(format!("masonshell-cli-{label}-{}-{nanos}", process::id()));
    fs::create_dir_all(&dir).expect("must create the scratch directory");
    dir
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent directories");
    }
    fs::write(path, contents).expect("must write the file");
}

fn make_installed_tree(root: &Path, version: &str) {
    write_file(
        &root.join("mason/core/Masonry.php"),
        &format!("<?php\nclass Masonry {{\n    const VERSION = '{version}';\n}}\n"),
    );
    write_file(&root.join("index.php"), "<?php // entrypoint\n");
    write_file(&root.join(".htaccess"), "RewriteEngine On\n");
    write_file(&root.join("site/config.php"), "<?php\n");
    write_file(&root.join("site/assets/installed.php"), "<?php // installed\n");
}

fn sample_database() -> DatabaseSettings {
    DatabaseSettings {
        host: DEFAULT_DB_HOST.to_string(),
        port: DEFAULT_DB_PORT,
        name: "masonry".to_string(),
        user: "mason".to_string(),
        password: "brick".to_string(),
    }
}

#[test]
fn cli_definition_is_internally_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn output_style_follows_stdout_only() {
    assert_eq!(resolve_output_style(true, true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
}

#[test]
fn status_lines_carry_badges_only_in_rich_mode() {
    assert_eq!(render_status_line(OutputStyle::Plain, "ok", "done"), "done");
    assert_eq!(render_status_line(OutputStyle::Rich, "ok", "done"), "[OK] done");
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "careful"),
        "[WARN] careful"
    );
}

#[test]
fn progress_lines_render_byte_counts() {
    let line = render_progress_line(OutputStyle::Rich, "download", 512, Some(1024), None)
        .expect("must render a rich progress line");
    assert!(line.contains("download"));
    assert!(line.contains("50%"));
    assert!(line.contains("512 B/1.00 KiB"));

    assert!(render_progress_line(OutputStyle::Plain, "download", 512, Some(1024), None).is_none());
}

#[test]
fn progress_lines_without_totals_show_running_bytes() {
    let line = render_progress_line(OutputStyle::Rich, "download", 2048, None, None)
        .expect("must render a rich progress line");
    assert!(line.contains("2.00 KiB"));
    assert!(!line.contains('%'));
}

#[test]
fn progress_lines_append_elapsed_time() {
    let line = render_progress_line(
        OutputStyle::Rich,
        "download",
        1024,
        Some(1024),
        Some(Duration::from_millis(1250)),
    )
    .expect("must render a rich progress line");
    assert!(line.contains("100%"));
    assert!(line.contains("complete in 1.250s"));
}

#[test]
fn elapsed_times_format_with_millisecond_padding() {
    assert_eq!(format_elapsed(Duration::from_millis(65)), "0.065s");
    assert_eq!(format_elapsed(Duration::from_millis(2300)), "2.300s");
}

#[test]
fn progress_state_tracks_completion() {
    let renderer = TerminalRenderer::from_style(OutputStyle::Plain);
    let mut progress = renderer.start_progress("download", None);
    assert!(!progress.completed());
    progress.set(512, Some(1024));
    assert!(!progress.completed());
    progress.set(1024, None);
    assert!(progress.completed());
    progress.finish_success();
}

#[test]
fn pipeline_console_survives_progress_without_a_terminal() {
    let renderer = TerminalRenderer::from_style(OutputStyle::Plain);
    let mut console = PipelineConsole::new(renderer);
    console.stage_changed(Stage::Downloading);
    console.progress(10, Some(100));
    console.progress(100, Some(100));
    console.stage_changed(Stage::Extracting);
    console.note("downloaded 100 bytes");
    console.warn("something minor");
    console.stage_changed(Stage::Done);
}

#[test]
fn confirm_replies_parse_case_insensitively() {
    assert!(parse_confirm_reply("y\n", false));
    assert!(parse_confirm_reply("YES\n", false));
    assert!(parse_confirm_reply("", true));
    assert!(!parse_confirm_reply("", false));
    assert!(!parse_confirm_reply("no\n", true));
}

#[test]
fn prompts_fall_back_to_defaults_on_empty_input() {
    let mut input = Cursor::new("\n");
    let value = prompt_line(&mut input, "database host", Some("localhost"))
        .expect("must read the prompt reply");
    assert_eq!(value, "localhost");

    let mut input = Cursor::new("db.example.com\n");
    let value = prompt_line(&mut input, "database host", Some("localhost"))
        .expect("must read the prompt reply");
    assert_eq!(value, "db.example.com");
}

#[test]
fn required_prompts_reject_empty_replies() {
    let mut input = Cursor::new("\n");
    let err = prompt_required(&mut input, "database name").expect_err("empty reply must be rejected");
    assert!(err.to_string().contains("database name"));
}

#[test]
fn confirm_prompts_honor_the_default_answer() {
    let mut input = Cursor::new("\n");
    assert!(prompt_confirm(&mut input, "proceed?", true).expect("must read the reply"));

    let mut input = Cursor::new("n\n");
    assert!(!prompt_confirm(&mut input, "proceed?", true).expect("must read the reply"));
}

#[test]
fn site_settings_come_from_flags_without_prompting() {
    let prefill = SitePrefill {
        db_host: Some("db.internal".to_string()),
        db_port: Some(3307),
        db_name: Some("masonry".to_string()),
        db_user: Some("mason".to_string()),
        db_pass: Some("brick".to_string()),
        timezone: Some("Europe/Berlin".to_string()),
        admin_name: Some("chief".to_string()),
        admin_pass: Some("hunter2!".to_string()),
        admin_email: Some("chief@example.com".to_string()),
    };
    let mut input = Cursor::new("");
    let settings =
        collect_site_settings(&mut input, &prefill, false).expect("must build settings from flags");
    assert_eq!(settings.database.host, "db.internal");
    assert_eq!(settings.database.port, 3307);
    assert_eq!(settings.database.name, "masonry");
    assert_eq!(settings.admin.name, "chief");
    assert_eq!(settings.admin.email, "chief@example.com");
    assert_eq!(settings.timezone, "Europe/Berlin");
}

#[test]
fn interactive_prompts_fill_the_remaining_settings() {
    let prefill = SitePrefill::default();
    let mut input = Cursor::new("\n\nmasonry\nmason\nbrick\n\n\nhunter2!\nadmin@example.com\n");
    let settings = collect_site_settings(&mut input, &prefill, false)
        .expect("prompt replies must build the settings");
    assert_eq!(settings.database.host, DEFAULT_DB_HOST);
    assert_eq!(settings.database.port, DEFAULT_DB_PORT);
    assert_eq!(settings.database.name, "masonry");
    assert_eq!(settings.database.user, "mason");
    assert_eq!(settings.database.password, "brick");
    assert_eq!(settings.timezone, DEFAULT_TIMEZONE);
    assert_eq!(settings.admin.name, DEFAULT_ADMIN_NAME);
    assert_eq!(settings.admin.password, "hunter2!");
    assert_eq!(settings.admin.email, "admin@example.com");
}

#[test]
fn assume_yes_fills_defaults_for_optional_values() {
    let prefill = SitePrefill {
        db_name: Some("masonry".to_string()),
        db_user: Some("mason".to_string()),
        db_pass: Some("brick".to_string()),
        admin_pass: Some("hunter2!".to_string()),
        admin_email: Some("admin@example.com".to_string()),
        ..SitePrefill::default()
    };
    let mut input = Cursor::new("");
    let settings = collect_site_settings(&mut input, &prefill, true)
        .expect("defaults must cover the optional values");
    assert_eq!(settings.database.host, DEFAULT_DB_HOST);
    assert_eq!(settings.database.port, DEFAULT_DB_PORT);
    assert_eq!(settings.timezone, DEFAULT_TIMEZONE);
    assert_eq!(settings.admin.name, DEFAULT_ADMIN_NAME);
}

#[test]
fn assume_yes_rejects_missing_required_values() {
    let prefill = SitePrefill {
        db_name: Some("masonry".to_string()),
        db_user: Some("mason".to_string()),
        db_pass: Some("brick".to_string()),
        admin_pass: Some("hunter2!".to_string()),
        ..SitePrefill::default()
    };
    let mut input = Cursor::new("");
    let err = collect_site_settings(&mut input, &prefill, true)
        .expect_err("a missing admin email must be rejected");
    assert!(err.to_string().contains("admin email"));
}

#[test]
fn database_retry_returns_on_first_success() {
    let db = sample_database();
    let settled = verify_database_with_retry(
        db.clone(),
        |_| Ok(()),
        |_, _| panic!("reprompt must not run when verification passes"),
    )
    .expect("verification must settle");
    assert_eq!(settled, db);
}

#[test]
fn database_retry_applies_corrected_settings() {
    let mut verify_calls = 0;
    let mut reprompts = 0;
    let settled = verify_database_with_retry(
        sample_database(),
        |db| {
            verify_calls += 1;
            if db.password == "right" {
                Ok(())
            } else {
                Err(anyhow::anyhow!("access denied"))
            }
        },
        |previous, _err| {
            reprompts += 1;
            let mut updated = previous.clone();
            updated.password = if reprompts == 2 {
                "right".to_string()
            } else {
                "still wrong".to_string()
            };
            Ok(Some(updated))
        },
    )
    .expect("corrected settings must verify");
    assert_eq!(settled.password, "right");
    assert_eq!(verify_calls, 3);
    assert_eq!(reprompts, 2);
}

#[test]
fn database_retry_stops_when_reprompting_declines() {
    let err = verify_database_with_retry(
        sample_database(),
        |_| Err(anyhow::anyhow!("access denied")),
        |_, _| Ok(None),
    )
    .expect_err("declining must surface the verification error");
    assert_eq!(err.to_string(), "access denied");
}

#[test]
fn database_retry_gives_up_after_the_attempt_limit() {
    let mut verify_calls = 0;
    let err = verify_database_with_retry(
        sample_database(),
        |_| {
            verify_calls += 1;
            Err(anyhow::anyhow!("access denied"))
        },
        |previous, _| Ok(Some(previous.clone())),
    )
    .expect_err("exhausted attempts must fail");
    assert_eq!(verify_calls, DB_VERIFY_ATTEMPTS);
    assert!(err.to_string().contains("after 3 attempt(s)"));
}

#[test]
fn release_refs_parse_or_explain() {
    assert_eq!(
        parse_release_ref("latest").expect("latest must parse"),
        VersionRef::Latest
    );
    assert_eq!(
        parse_release_ref("3.0.62").expect("a version must parse"),
        VersionRef::Semantic(Version::new(3, 0, 62))
    );

    let err = parse_release_ref("not a ref").expect_err("spaces must be rejected");
    assert!(err.to_string().contains("not a ref"));
}

#[test]
fn archive_flavors_map_to_formats() {
    assert_eq!(ArchiveFormat::from(ArchiveFlavor::Zip), ArchiveFormat::Zip);
    assert_eq!(ArchiveFormat::from(ArchiveFlavor::Tgz), ArchiveFormat::TarGz);
}

#[test]
fn already_installed_outcome_prints_nothing_extra() {
    let lines = format_new_outcome_lines(&InstallOutcome::AlreadyInstalled, OutputStyle::Plain);
    assert!(lines.is_empty());
}

#[test]
fn install_outcomes_summarize_version_and_site_state() {
    let outcome = InstallOutcome::Installed {
        version: Some(Version::new(3, 0, 62)),
        site_installed: true,
        compat: CompatibilityReport::default(),
    };
    let lines = format_new_outcome_lines(&outcome, OutputStyle::Plain);
    assert_eq!(lines[0], "installed Masonry 3.0.62");
    assert!(lines.iter().any(|line| line.contains("admin account is ready")));

    let outcome = InstallOutcome::Installed {
        version: None,
        site_installed: false,
        compat: CompatibilityReport::default(),
    };
    let lines = format_new_outcome_lines(&outcome, OutputStyle::Plain);
    assert_eq!(lines[0], "installed Masonry");
    assert!(lines.iter().any(|line| line.contains("install.php")));
}

#[test]
fn install_outcomes_count_compatibility_warnings() {
    let compat = CompatibilityReport {
        checks: vec![CompatCheck {
            name: "extension gd".to_string(),
            status: CheckStatus::Warn,
            detail: "missing optional extension".to_string(),
        }],
    };
    let outcome = InstallOutcome::Installed {
        version: Some(Version::new(3, 0, 62)),
        site_installed: true,
        compat,
    };
    let lines = format_new_outcome_lines(&outcome, OutputStyle::Rich);
    assert!(lines
        .iter()
        .any(|line| line.starts_with("[WARN] ") && line.contains("1 optional")));
}

#[test]
fn upgrade_outcomes_render_each_variant() {
    let up_to_date = UpgradeOutcome::UpToDate {
        installed: Some(Version::new(3, 0, 62)),
        remote: Some(Version::new(3, 0, 62)),
    };
    let lines = format_upgrade_outcome_lines(&up_to_date, OutputStyle::Plain);
    assert_eq!(lines, vec!["site is up to date (installed 3.0.62, latest 3.0.62)".to_string()]);

    let available = UpgradeOutcome::UpgradeAvailable {
        installed: Some(Version::new(3, 0, 34)),
        remote: Some(Version::new(3, 0, 62)),
    };
    let lines = format_upgrade_outcome_lines(&available, OutputStyle::Plain);
    assert!(lines[0].contains("3.0.34 -> 3.0.62"));

    let downloaded = UpgradeOutcome::Downloaded {
        version_label: "3.0.62".to_string(),
        cache_dir: PathBuf::from("/tmp/cache/3.0.62"),
        archive_path: PathBuf::from("/tmp/cache/3.0.62/masonry-3.0.62.zip"),
    };
    let lines = format_upgrade_outcome_lines(&downloaded, OutputStyle::Plain);
    assert!(lines[0].contains("saved release 3.0.62"));
    assert!(lines[1].contains("masonry-3.0.62.zip"));

    let upgraded = UpgradeOutcome::Upgraded {
        from: Some(Version::new(3, 0, 34)),
        to: Some(Version::new(3, 0, 62)),
        report: ReplacementReport {
            replaced: Vec::new(),
            manual_review: vec![ManualReviewFile {
                dest: PathBuf::from("/site/.htaccess"),
                saved_copy: PathBuf::from("/site/.htaccess-3.0.62"),
            }],
            failures: Vec::new(),
        },
    };
    let lines = format_upgrade_outcome_lines(&upgraded, OutputStyle::Plain);
    assert!(lines[0].contains("upgraded 3.0.34 -> 3.0.62"));
    assert!(lines.iter().any(|line| line.contains(".htaccess-3.0.62")));
}

#[test]
fn unknown_versions_render_as_unknown() {
    let outcome = UpgradeOutcome::UpgradeAvailable {
        installed: None,
        remote: Some(Version::new(3, 0, 62)),
    };
    let lines = format_upgrade_outcome_lines(&outcome, OutputStyle::Plain);
    assert!(lines[0].contains("unknown -> 3.0.62"));
}

#[test]
fn status_reports_reflect_the_tree() {
    let dir = scratch_dir("status-installed");
    make_installed_tree(&dir, "3.0.62");

    let layout = ProjectLayout::new(&dir);
    let report = build_status_report(&layout).expect("must build the report");
    assert!(report.installed);
    assert_eq!(report.version.as_deref(), Some("3.0.62"));
    assert!(report.payload_present);
    assert!(report.entrypoint_present);
    assert_eq!(report.access_file, "in place");
    assert!(report.config_present);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn status_reports_handle_empty_directories() {
    let dir = scratch_dir("status-empty");

    let layout = ProjectLayout::new(&dir);
    let report = build_status_report(&layout).expect("must build the report");
    assert!(!report.installed);
    assert_eq!(report.version, None);
    assert!(!report.payload_present);
    assert!(!report.entrypoint_present);
    assert_eq!(report.access_file, "missing");
    assert!(!report.config_present);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn status_reports_notice_the_access_template() {
    let dir = scratch_dir("status-template");
    write_file(&dir.join("htaccess.txt"), "RewriteEngine On\n");

    let layout = ProjectLayout::new(&dir);
    let report = build_status_report(&layout).expect("must build the report");
    assert_eq!(report.access_file, "template only");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn status_lines_cover_every_field() {
    let report = StatusReport {
        root: "/var/www/site".to_string(),
        installed: true,
        version: Some("3.0.62".to_string()),
        payload_present: true,
        entrypoint_present: true,
        access_file: "in place",
        config_present: false,
    };
    let lines = format_status_lines(&report);
    assert_eq!(lines[0], "root: /var/www/site");
    assert_eq!(lines[1], "installed: yes");
    assert_eq!(lines[2], "version: 3.0.62");
    assert_eq!(lines[3], "payload: present");
    assert_eq!(lines[4], "entrypoint: present");
    assert_eq!(lines[5], "access file: in place");
    assert_eq!(lines[6], "config: missing");
}

#[test]
fn status_reports_serialize_with_stable_keys() {
    let report = StatusReport {
        root: "/var/www/site".to_string(),
        installed: false,
        version: None,
        payload_present: false,
        entrypoint_present: false,
        access_file: "missing",
        config_present: false,
    };
    let value = serde_json::to_value(&report).expect("must serialize the report");
    let object = value.as_object().expect("must serialize as an object");
    for key in [
        "root",
        "installed",
        "version",
        "payload_present",
        "entrypoint_present",
        "access_file",
        "config_present",
    ] {
        assert!(object.contains_key(key), "missing key {key}");
    }
}

#[test]
fn completion_scripts_mention_the_binary() {
    let mut script = Vec::new();
    write_completions_script(Shell::Bash, &mut script).expect("must generate the script");
    let script = String::from_utf8(script).expect("script must be utf-8");
    assert!(script.contains("masonshell"));
}
