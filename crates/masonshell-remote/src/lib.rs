use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use masonshell_core::{ArchiveFormat, ArchiveSource, ResolvedRelease, VersionRef};

mod download;
mod resolve;

pub use download::DownloadError;
pub use resolve::ResolveError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOptions {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            base_url: masonshell_core::DEFAULT_RELEASE_HOST.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub trait ReleaseSource {
    fn resolve(
        &self,
        version: &VersionRef,
        format: ArchiveFormat,
    ) -> Result<ResolvedRelease, ResolveError>;

    fn download(
        &self,
        source: &ArchiveSource,
        dest: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, DownloadError>;
}

pub struct HttpReleaseSource {
    options: RemoteOptions,
    client: reqwest::blocking::Client,
}

impl HttpReleaseSource {
    pub fn new(options: RemoteOptions) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("masonshell/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .context("failed to build release host client")?;
        Ok(Self { options, client })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(RemoteOptions::default())
    }

    pub fn base_url(&self) -> &str {
        &self.options.base_url
    }
}

impl ReleaseSource for HttpReleaseSource {
    fn resolve(
        &self,
        version: &VersionRef,
        format: ArchiveFormat,
    ) -> Result<ResolvedRelease, ResolveError> {
        resolve::resolve_release(&self.client, &self.options.base_url, version, format)
    }

    fn download(
        &self,
        source: &ArchiveSource,
        dest: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, DownloadError> {
        download::download_archive(&self.client, source, dest, progress)
    }
}
