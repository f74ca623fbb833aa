use std::fmt;

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    Latest,
    Branch(String),
    Commit(String),
    Semantic(semver::Version),
}

impl VersionRef {
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("latest") {
            return Some(Self::Latest);
        }

        if let Ok(version) = semver::Version::parse(trimmed) {
            return Some(Self::Semantic(version));
        }

        if trimmed.len() >= 7
            && trimmed.len() <= 40
            && trimmed.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Some(Self::Commit(trimmed.to_ascii_lowercase()));
        }

        let valid_branch = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
        if valid_branch {
            return Some(Self::Branch(trimmed.to_string()));
        }

        None
    }

    pub fn git_ref(&self) -> String {
        match self {
            Self::Latest => DEFAULT_BRANCH.to_string(),
            Self::Branch(name) => name.clone(),
            Self::Commit(sha) => sha.clone(),
            Self::Semantic(version) => version.to_string(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, Self::Commit(_) | Self::Semantic(_))
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Branch(name) => f.write_str(name),
            Self::Commit(sha) => f.write_str(sha),
            Self::Semantic(version) => write!(f, "{version}"),
        }
    }
}
