mod archive;
mod layout;
mod release;
mod version_ref;

pub use archive::{ArchiveFormat, ArchiveSource, ResolvedRelease};
pub use layout::{
    ProjectLayout, ACCESS_FILE_NAME, ACCESS_TEMPLATE_NAME, CORE_VERSION_REL_PATH, ENTRYPOINT_NAME,
    MARKER_REL_PATH, PAYLOAD_DIR_NAME, STAGING_PREFIX,
};
pub use release::{
    build_archive_url, build_version_check_url, parse_core_version, DEFAULT_RELEASE_HOST,
};
pub use version_ref::{VersionRef, DEFAULT_BRANCH};
