//! Record of the last successfully restored release.
//!
//! Stored as `<dest>/.restore_meta.json`:
//!
//! ```json
//! {"tag": "index-7", "release_id": 123456, "restored_at": "2025-01-02T03:04:05Z"}
//! ```
//!
//! Loading is fail-soft (a missing or corrupt file reads as "nothing
//! restored"). Saving is atomic via a temp file in the same directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ReleaseError, Result};
use crate::models::RemoteIdentity;

pub const META_FILE: &str = ".restore_meta.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreMeta {
    pub tag: Option<String>,
    pub release_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<String>,
}

impl RestoreMeta {
    pub fn new(tag: impl Into<String>, release_id: u64) -> Self {
        Self {
            tag: Some(tag.into()),
            release_id: Some(release_id),
            restored_at: Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        }
    }

    /// Whether this record names the same release as `remote`.
    ///
    /// Release ids are compared when the remote id is known. The tag is
    /// only consulted when it is not.
    pub fn matches(&self, remote: &RemoteIdentity) -> bool {
        match remote.release_id {
            Some(id) => self.release_id == Some(id),
            None => match (&self.tag, &remote.tag) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

pub fn meta_path(dir: &Path) -> PathBuf {
    dir.join(META_FILE)
}

pub fn load(dir: &Path) -> Option<RestoreMeta> {
    let path = meta_path(dir);
    let bytes = std::fs::read(&path).ok()?;
    match serde_json::from_slice::<RestoreMeta>(&bytes) {
        Ok(meta) => Some(meta),
        Err(err) => {
            warn!(path = %path.display(), %err, "ignoring unreadable restore metadata");
            None
        }
    }
}

pub fn save(dir: &Path, meta: &RestoreMeta) -> Result<()> {
    let path = meta_path(dir);
    std::fs::create_dir_all(dir).map_err(|e| ReleaseError::io(dir, e))?;
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|e| ReleaseError::io(&path, std::io::Error::other(e)))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".restore_meta-")
        .tempfile_in(dir)
        .map_err(|e| ReleaseError::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| ReleaseError::io(&path, e))?;
    tmp.persist(&path)
        .map_err(|e| ReleaseError::io(&path, e.error))?;
    Ok(())
}
