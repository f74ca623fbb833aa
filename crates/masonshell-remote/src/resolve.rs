use masonshell_core::{
    build_archive_url, build_version_check_url, parse_core_version, ArchiveFormat, ArchiveSource,
    ResolvedRelease, VersionRef,
};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(
        "no release found for '{version}' (HTTP {status} from {url}); check the ref or use 'latest'"
    )]
    NotFound {
        version: String,
        url: String,
        status: u16,
    },
    #[error("release host unreachable at {url}: {detail}")]
    Unreachable { url: String, detail: String },
}

pub(crate) fn resolve_release(
    client: &reqwest::blocking::Client,
    base_url: &str,
    version: &VersionRef,
    format: ArchiveFormat,
) -> Result<ResolvedRelease, ResolveError> {
    let check_url = build_version_check_url(base_url, version);
    let response = client
        .get(&check_url)
        .send()
        .map_err(|err| ResolveError::Unreachable {
            url: check_url.clone(),
            detail: err.to_string(),
        })?;

    let status = response.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
        return Err(ResolveError::NotFound {
            version: version.to_string(),
            url: check_url,
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(ResolveError::Unreachable {
            url: check_url,
            detail: format!("unexpected HTTP status {status}"),
        });
    }

    let body = response.text().map_err(|err| ResolveError::Unreachable {
        url: check_url.clone(),
        detail: err.to_string(),
    })?;

    Ok(ResolvedRelease {
        version: parse_core_version(&body),
        source: ArchiveSource {
            url: build_archive_url(base_url, version, format),
            format,
            size_hint: None,
        },
    })
}
