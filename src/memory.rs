//! In-memory [`ReleaseApi`] implementation for tests and offline hosts.
//!
//! Releases, asset bytes and call counters live behind a `std::sync::RwLock`.
//! Failure switches let tests simulate an unreachable remote or a download
//! that dies mid-stream.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ReleaseError, Result};
use crate::models::{Asset, Release};
use crate::release_api::ReleaseApi;

#[derive(Default)]
struct State {
    /// Insertion order; newest last.
    releases: Vec<Release>,
    blobs: HashMap<u64, Vec<u8>>,
    next_id: u64,
    downloads: usize,
    uploads: usize,
    fail_downloads: bool,
    offline: bool,
}

impl State {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn release_mut(&mut self, id: u64) -> Option<&mut Release> {
        self.releases.iter_mut().find(|r| r.id == id)
    }
}

/// Release store held entirely in memory.
pub struct InMemoryReleases {
    state: RwLock<State>,
}

impl InMemoryReleases {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self, what: &str) -> Result<()> {
        if self.read().offline {
            return Err(ReleaseError::Transport {
                what: what.to_string(),
                status: None,
                detail: "remote unreachable".to_string(),
            });
        }
        Ok(())
    }

    /// Publish a release with the next free id and the given assets.
    pub fn publish(&self, tag: &str, assets: Vec<(&str, Vec<u8>)>) -> Release {
        let id = {
            let mut st = self.write();
            st.alloc_id()
        };
        self.publish_with_id(id, tag, assets)
    }

    /// Publish a release with an explicit id.
    pub fn publish_with_id(&self, id: u64, tag: &str, assets: Vec<(&str, Vec<u8>)>) -> Release {
        let mut st = self.write();
        st.next_id = st.next_id.max(id);
        let mut release = new_release(id, tag, tag, "");
        for (name, data) in assets {
            let asset_id = st.alloc_id();
            release.assets.push(new_asset(asset_id, tag, name, data.len()));
            st.blobs.insert(asset_id, data);
        }
        st.releases.retain(|r| r.tag_name != tag);
        st.releases.push(release.clone());
        release
    }

    /// Make every download fail with a transport error.
    pub fn fail_downloads(&self, fail: bool) {
        self.write().fail_downloads = fail;
    }

    /// Make every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.write().offline = offline;
    }

    pub fn download_count(&self) -> usize {
        self.read().downloads
    }

    pub fn upload_count(&self) -> usize {
        self.read().uploads
    }

    /// Snapshot of all releases, oldest first.
    pub fn releases(&self) -> Vec<Release> {
        self.read().releases.clone()
    }
}

impl Default for InMemoryReleases {
    fn default() -> Self {
        Self::new()
    }
}

fn new_release(id: u64, tag: &str, title: &str, notes: &str) -> Release {
    Release {
        id,
        tag_name: tag.to_string(),
        name: Some(title.to_string()),
        body: Some(notes.to_string()),
        draft: false,
        prerelease: false,
        upload_url: format!("memory://uploads/{}/assets{{?name,label}}", id),
        created_at: Some(chrono::Utc::now().to_rfc3339()),
        assets: Vec::new(),
    }
}

fn new_asset(id: u64, tag: &str, name: &str, size: usize) -> Asset {
    Asset {
        id,
        name: name.to_string(),
        size: size as u64,
        content_type: Some("application/octet-stream".to_string()),
        url: Some(format!("memory://assets/{}", id)),
        browser_download_url: Some(format!("memory://download/{}/{}", tag, name)),
    }
}

impl ReleaseApi for InMemoryReleases {
    fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        self.check_online("fetching release by tag")?;
        self.read()
            .releases
            .iter()
            .find(|r| r.tag_name == tag)
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound(format!("release tag '{}'", tag)))
    }

    fn get_latest_release(&self) -> Result<Release> {
        self.check_online("fetching latest release")?;
        self.read()
            .releases
            .iter()
            .rev()
            .find(|r| !r.draft && !r.prerelease)
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound("latest release".to_string()))
    }

    fn list_releases(&self, per_page: u32, page: u32) -> Result<Vec<Release>> {
        self.check_online("listing releases")?;
        let per_page = per_page.max(1) as usize;
        let skip = (page.max(1) as usize - 1) * per_page;
        Ok(self
            .read()
            .releases
            .iter()
            .rev()
            .skip(skip)
            .take(per_page)
            .cloned()
            .collect())
    }

    fn create_release(&self, tag: &str, title: &str, notes: &str) -> Result<Release> {
        self.check_online("creating release")?;
        let mut st = self.write();
        if st.releases.iter().any(|r| r.tag_name == tag) {
            return Err(ReleaseError::Conflict(format!(
                "release tag '{}' already_exists",
                tag
            )));
        }
        let id = st.alloc_id();
        let release = new_release(id, tag, title, notes);
        st.releases.push(release.clone());
        Ok(release)
    }

    fn list_assets(&self, release_id: u64) -> Result<Vec<Asset>> {
        self.check_online("listing assets")?;
        self.read()
            .releases
            .iter()
            .find(|r| r.id == release_id)
            .map(|r| r.assets.clone())
            .ok_or_else(|| ReleaseError::NotFound(format!("release id {}", release_id)))
    }

    fn upload_asset_bytes(&self, release: &Release, name: &str, data: Vec<u8>) -> Result<Asset> {
        self.check_online("uploading asset")?;
        let mut st = self.write();
        let asset_id = st.alloc_id();
        let tag = release.tag_name.clone();
        let target = st
            .release_mut(release.id)
            .ok_or_else(|| ReleaseError::NotFound(format!("release id {}", release.id)))?;
        if target.assets.iter().any(|a| a.name == name) {
            return Err(ReleaseError::Conflict(format!(
                "asset '{}' already_exists on {}",
                name, tag
            )));
        }
        let asset = new_asset(asset_id, &tag, name, data.len());
        target.assets.push(asset.clone());
        st.blobs.insert(asset_id, data);
        st.uploads += 1;
        Ok(asset)
    }

    fn delete_asset(&self, asset_id: u64) -> Result<()> {
        self.check_online("deleting asset")?;
        let mut st = self.write();
        let mut removed = false;
        for rel in st.releases.iter_mut() {
            let before = rel.assets.len();
            rel.assets.retain(|a| a.id != asset_id);
            removed |= rel.assets.len() != before;
        }
        st.blobs.remove(&asset_id);
        if removed {
            Ok(())
        } else {
            Err(ReleaseError::NotFound(format!("asset id {}", asset_id)))
        }
    }

    fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        self.check_online("downloading asset")?;
        if asset.browser_download_url.is_none() {
            return Err(ReleaseError::NotFound(format!(
                "download URL for asset '{}'",
                asset.name
            )));
        }
        let mut st = self.write();
        st.downloads += 1;
        if st.fail_downloads {
            return Err(ReleaseError::Transport {
                what: format!("downloading asset '{}'", asset.name),
                status: None,
                detail: "connection reset mid-stream".to_string(),
            });
        }
        st.blobs
            .get(&asset.id)
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound(format!("asset '{}'", asset.name)))
    }
}
