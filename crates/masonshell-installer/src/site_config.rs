use std::fs::OpenOptions;
use std::io::Write;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use masonshell_core::ProjectLayout;
use masonshell_fingerprint::sha256_hex;

use crate::fs_utils::run_command;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSettings {
    pub name: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    pub database: DatabaseSettings,
    pub admin: AdminSettings,
    pub timezone: String,
}

/// Renders the block appended to `site/config.php`. The file ships with the
/// release and is only ever appended to, so user edits above the block
/// survive.
pub fn format_config_directives(db: &DatabaseSettings, timezone: &str, salt: &str) -> String {
    let mut lines = vec![
        String::new(),
        "/** site settings written by masonshell */".to_string(),
    ];
    lines.push(format!(
        "$config->dbHost = '{}';",
        escape_php_single_quote(&db.host)
    ));
    lines.push(format!("$config->dbPort = '{}';", db.port));
    lines.push(format!(
        "$config->dbName = '{}';",
        escape_php_single_quote(&db.name)
    ));
    lines.push(format!(
        "$config->dbUser = '{}';",
        escape_php_single_quote(&db.user)
    ));
    lines.push(format!(
        "$config->dbPass = '{}';",
        escape_php_single_quote(&db.password)
    ));
    lines.push(format!(
        "$config->timezone = '{}';",
        escape_php_single_quote(timezone)
    ));
    lines.push(format!("$config->userAuthSalt = '{salt}';"));
    lines.push(String::new());
    lines.join("\n")
}

pub fn append_config_directives(
    layout: &ProjectLayout,
    db: &DatabaseSettings,
    timezone: &str,
) -> Result<()> {
    let salt = generate_auth_salt()?;
    let block = format_config_directives(db, timezone, &salt);
    let path = layout.config_path();
    let mut file = OpenOptions::new()
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    file.write_all(block.as_bytes())
        .with_context(|| format!("failed to append settings to {}", path.display()))?;
    Ok(())
}

fn generate_auth_salt() -> Result<String> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_nanos();
    let seed = format!("{}-{}-{:?}", std::process::id(), nanos, std::thread::current().id());
    Ok(sha256_hex(seed.as_bytes()))
}

fn escape_php_single_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub(crate) fn build_database_probe_command(db: &DatabaseSettings) -> Command {
    let script = format!(
        "new PDO('mysql:host={};port={};dbname={}', '{}', '{}');",
        escape_php_single_quote(&db.host),
        db.port,
        escape_php_single_quote(&db.name),
        escape_php_single_quote(&db.user),
        escape_php_single_quote(&db.password)
    );
    let mut command = Command::new("php");
    command.arg("-r").arg(script);
    command
}

pub fn verify_database(db: &DatabaseSettings) -> Result<()> {
    verify_database_with_runner(db, run_command)
}

pub fn verify_database_with_runner<RunCommand>(
    db: &DatabaseSettings,
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let mut command = build_database_probe_command(db);
    run(&mut command, "database connection failed")
}

pub(crate) fn build_site_install_command(layout: &ProjectLayout, settings: &SiteSettings) -> Command {
    let mut command = Command::new("php");
    command
        .arg("install.php")
        .arg(format!("--admin-name={}", settings.admin.name))
        .arg(format!("--admin-pass={}", settings.admin.password))
        .arg(format!("--admin-email={}", settings.admin.email))
        .current_dir(layout.root());
    command
}

pub fn run_site_installer(layout: &ProjectLayout, settings: &SiteSettings) -> Result<()> {
    run_site_installer_with_runner(layout, settings, run_command)
}

/// Drives the release's own bootstrap script. Database and timezone settings
/// are read from the config file appended beforehand, so only the admin
/// account crosses the command line.
pub fn run_site_installer_with_runner<RunCommand>(
    layout: &ProjectLayout,
    settings: &SiteSettings,
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let mut command = build_site_install_command(layout, settings);
    run(&mut command, "site installer failed")
}
