use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::release::parse_core_version;

pub const PAYLOAD_DIR_NAME: &str = "mason";
pub const CORE_VERSION_REL_PATH: &str = "mason/core/Masonry.php";
pub const ENTRYPOINT_NAME: &str = "index.php";
pub const ACCESS_FILE_NAME: &str = ".htaccess";
pub const ACCESS_TEMPLATE_NAME: &str = "htaccess.txt";
pub const MARKER_REL_PATH: &str = "site/assets/installed.php";
pub const STAGING_PREFIX: &str = ".masonshell-tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.root.join(PAYLOAD_DIR_NAME)
    }

    pub fn core_version_path(&self) -> PathBuf {
        self.root.join(CORE_VERSION_REL_PATH)
    }

    pub fn entrypoint_path(&self) -> PathBuf {
        self.root.join(ENTRYPOINT_NAME)
    }

    pub fn access_file_path(&self) -> PathBuf {
        self.root.join(ACCESS_FILE_NAME)
    }

    pub fn access_template_path(&self) -> PathBuf {
        self.root.join(ACCESS_TEMPLATE_NAME)
    }

    pub fn site_dir(&self) -> PathBuf {
        self.root.join("site")
    }

    pub fn config_path(&self) -> PathBuf {
        self.site_dir().join("config.php")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.site_dir().join("assets")
    }

    pub fn download_cache_dir(&self) -> PathBuf {
        self.assets_dir().join("cache").join("masonshell")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_REL_PATH)
    }

    pub fn install_script_path(&self) -> PathBuf {
        self.root.join("install.php")
    }

    pub fn install_data_dir(&self) -> PathBuf {
        self.site_dir().join("install")
    }

    pub fn fingerprint_manifest_path(&self) -> PathBuf {
        self.root.join("masonshell-fingerprints.toml")
    }

    pub fn installer_artifact_paths(&self) -> Vec<PathBuf> {
        vec![
            self.install_script_path(),
            self.install_data_dir(),
            self.root.join("LICENSE.txt"),
            self.root.join("CHANGELOG.md"),
        ]
    }

    pub fn is_staging_entry(file_name: &str) -> bool {
        file_name.starts_with(STAGING_PREFIX)
    }

    pub fn versioned_backup_path(path: &Path, version: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let name = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}-{version}.{ext}"),
            None => format!("{stem}-{version}"),
        };
        match path.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))
    }

    pub fn has_completed_install(&self) -> bool {
        self.marker_path().is_file()
    }

    pub fn installed_version(&self) -> Result<Option<semver::Version>> {
        let path = self.core_version_path();
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(parse_core_version(&source))
    }
}
