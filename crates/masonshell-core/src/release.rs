use crate::archive::ArchiveFormat;
use crate::layout::CORE_VERSION_REL_PATH;
use crate::version_ref::VersionRef;

pub const DEFAULT_RELEASE_HOST: &str = "https://github.com/masonry-cms/masonry";

pub fn build_archive_url(base: &str, version: &VersionRef, format: ArchiveFormat) -> String {
    format!(
        "{}/archive/{}.{}",
        base.trim_end_matches('/'),
        version.git_ref(),
        format.extension()
    )
}

pub fn build_version_check_url(base: &str, version: &VersionRef) -> String {
    format!(
        "{}/raw/{}/{}",
        base.trim_end_matches('/'),
        version.git_ref(),
        CORE_VERSION_REL_PATH
    )
}

pub fn parse_core_version(source: &str) -> Option<semver::Version> {
    for line in source.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("const VERSION") else {
            continue;
        };
        let Some(value) = rest.trim_start().strip_prefix('=') else {
            continue;
        };
        let value = value.trim();
        let Some(quoted) = value
            .strip_prefix('\'')
            .and_then(|v| v.split('\'').next())
            .or_else(|| value.strip_prefix('"').and_then(|v| v.split('"').next()))
        else {
            continue;
        };
        if let Ok(version) = semver::Version::parse(quoted) {
            return Some(version);
        }
    }
    None
}
