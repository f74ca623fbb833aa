mod commands;
mod completion;
mod prompt;
mod render;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use masonshell_core::ArchiveFormat;

use crate::commands::run_cli;
use crate::render::{current_output_style, render_status_line};

#[derive(Parser, Debug)]
#[command(name = "masonshell", version, about = "Install and upgrade Masonry CMS sites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a Masonry release and set up a new site.
    New {
        /// Project directory; defaults to the current one.
        directory: Option<PathBuf>,
        /// Release to install: a version, branch, commit, or "latest".
        #[arg(long, default_value = "latest")]
        release: String,
        /// Archive format to download.
        #[arg(long, value_enum, default_value = "zip")]
        format: ArchiveFlavor,
        /// Release host to download from instead of the default.
        #[arg(long)]
        host: Option<String>,
        /// Database host.
        #[arg(long)]
        db_host: Option<String>,
        /// Database port.
        #[arg(long)]
        db_port: Option<u16>,
        /// Database name.
        #[arg(long)]
        db_name: Option<String>,
        /// Database user.
        #[arg(long)]
        db_user: Option<String>,
        /// Database password.
        #[arg(long)]
        db_pass: Option<String>,
        /// Site timezone.
        #[arg(long)]
        timezone: Option<String>,
        /// Admin account name.
        #[arg(long)]
        admin_name: Option<String>,
        /// Admin account password.
        #[arg(long)]
        admin_pass: Option<String>,
        /// Admin account email address.
        #[arg(long)]
        admin_email: Option<String>,
        /// Unpack the files but leave the site installer for the browser.
        #[arg(long)]
        no_install: bool,
        /// Refresh the release files even if an installation is present.
        #[arg(long)]
        force: bool,
        /// Never prompt; missing values use defaults or fail.
        #[arg(long)]
        yes: bool,
    },
    /// Upgrade an installed site to a newer release.
    Upgrade {
        /// Project directory; defaults to the current one.
        directory: Option<PathBuf>,
        /// Report whether an upgrade is available without applying it.
        #[arg(long, conflicts_with = "download")]
        check: bool,
        /// Download and cache the release without touching the site.
        #[arg(long)]
        download: bool,
        /// Release to upgrade to: a version, branch, commit, or "latest".
        #[arg(long, default_value = "latest")]
        release: String,
        /// Archive format to download.
        #[arg(long, value_enum, default_value = "zip")]
        format: ArchiveFlavor,
        /// Release host to download from instead of the default.
        #[arg(long)]
        host: Option<String>,
        /// Answer yes to every question.
        #[arg(long)]
        yes: bool,
    },
    /// Report what is installed in a project directory.
    Status {
        /// Project directory; defaults to the current one.
        directory: Option<PathBuf>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum ArchiveFlavor {
    Zip,
    #[value(alias = "tar.gz")]
    Tgz,
}

impl From<ArchiveFlavor> for ArchiveFormat {
    fn from(flavor: ArchiveFlavor) -> Self {
        match flavor {
            ArchiveFlavor::Zip => ArchiveFormat::Zip,
            ArchiveFlavor::Tgz => ArchiveFormat::TarGz,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!(
                "{}",
                render_status_line(current_output_style(), "fail", &format!("{err:#}"))
            );
            ExitCode::FAILURE
        }
    }
}
