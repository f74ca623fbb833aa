use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Entrypoint,
    AccessFile,
}

impl FileRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entrypoint => "index.php",
            Self::AccessFile => ".htaccess",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "index.php" => Some(Self::Entrypoint),
            ".htaccess" => Some(Self::AccessFile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownReleaseFile {
    pub role: FileRole,
    pub release: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintTable {
    entries: Vec<KnownReleaseFile>,
}

const BUILTIN_ENTRIES: [(&str, FileRole, &str); 4] = [
    (
        "3.0.34",
        FileRole::Entrypoint,
        "3cda0773564f9a902cbfccc9ccfe32437bea7175e07cb25b96d1011bc58ce67c",
    ),
    (
        "3.0.34",
        FileRole::AccessFile,
        "80b04910a00a7ffd439842b02502e8166110355ffa01ef7cce1d39d5308b3ae5",
    ),
    (
        "3.0.62",
        FileRole::Entrypoint,
        "130848d88b3f009b3e58a6dc344d1b6be289c350c88da63dff66f19b09a43bde",
    ),
    (
        "3.0.62",
        FileRole::AccessFile,
        "35c8143b4551ea34c59667762f13e67edae91021d9e46b847a2d4a9fe85e3fa6",
    ),
];

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    file: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    role: String,
    release: String,
    sha256: String,
}

impl FingerprintTable {
    pub fn builtin() -> Self {
        let entries = BUILTIN_ENTRIES
            .iter()
            .map(|(release, role, sha256)| KnownReleaseFile {
                role: *role,
                release: (*release).to_string(),
                sha256: (*sha256).to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn from_entries(entries: Vec<KnownReleaseFile>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[KnownReleaseFile] {
        &self.entries
    }

    pub fn classify(&self, role: FileRole, sha256_hex: &str) -> Option<&KnownReleaseFile> {
        let needle = sha256_hex.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.role == role && entry.sha256 == needle)
    }

    /// Merges a release-time manifest into the table. Returns false when the
    /// manifest file does not exist.
    pub fn extend_from_manifest(&mut self, path: &Path) -> Result<bool> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let manifest = toml::from_str::<ManifestFile>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        for entry in manifest.file {
            let Some(role) = FileRole::parse(&entry.role) else {
                anyhow::bail!(
                    "unknown file role '{}' in {}",
                    entry.role,
                    path.display()
                );
            };
            let sha256 = entry.sha256.trim().to_ascii_lowercase();
            if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!(
                    "invalid sha256 for {} release {} in {}",
                    entry.role,
                    entry.release,
                    path.display()
                );
            }
            self.entries.push(KnownReleaseFile {
                role,
                release: entry.release,
                sha256,
            });
        }

        Ok(true)
    }
}
