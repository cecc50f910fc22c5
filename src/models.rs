//! Core data types shared by the release client, the sequential manager and
//! the restore orchestrator.

use serde::{Deserialize, Serialize};

/// A release asset as returned by the Releases API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    /// API URL of the asset (`/repos/{owner}/{repo}/releases/assets/{id}`).
    #[serde(default)]
    pub url: Option<String>,
    /// Direct download URL; absent on some partial payloads.
    #[serde(default)]
    pub browser_download_url: Option<String>,
}

/// A tagged release. Immutable once published, apart from asset replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    /// Upload URL template, e.g. `https://uploads.github.com/.../assets{?name,label}`.
    #[serde(default)]
    pub upload_url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    pub fn asset_named(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    pub fn identity(&self) -> RemoteIdentity {
        RemoteIdentity {
            tag: Some(self.tag_name.clone()),
            release_id: Some(self.id),
        }
    }
}

/// The `(tag, release id)` pair that identifies what a remote currently
/// serves, or what was last restored locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub tag: Option<String>,
    pub release_id: Option<u64>,
}

/// Kind of distributable artifact. Each class has its own tag prefix,
/// destination directory and readiness content file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactClass {
    Index,
    Prompts,
}

impl ArtifactClass {
    pub fn default_prefix(self) -> &'static str {
        match self {
            ArtifactClass::Index => "index",
            ArtifactClass::Prompts => "prompts",
        }
    }

    /// Files whose non-empty presence makes a directory of this class usable.
    pub fn content_files(self) -> &'static [&'static str] {
        match self {
            ArtifactClass::Index => &[crate::readiness::CHUNKS_FILE],
            ArtifactClass::Prompts => &["prompts.yaml", "prompts.yml", "prompts.json"],
        }
    }

    pub fn label(self) -> &'static str {
        self.default_prefix()
    }
}

impl std::str::FromStr for ArtifactClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "index" => Ok(ArtifactClass::Index),
            "prompts" => Ok(ArtifactClass::Prompts),
            other => Err(format!(
                "unknown artifact class '{}'. Must be index or prompts.",
                other
            )),
        }
    }
}

impl std::fmt::Display for ArtifactClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a successful restore from a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreResult {
    pub tag: String,
    pub release_id: u64,
    pub asset_name: String,
    pub detail: String,
}

impl RestoreResult {
    pub fn identity(&self) -> RemoteIdentity {
        RemoteIdentity {
            tag: Some(self.tag.clone()),
            release_id: Some(self.release_id),
        }
    }
}
