//! Release API abstraction.
//!
//! [`ReleaseApi`] is the seam between the addressing/restore logic and the
//! remote service. Required methods are the raw Releases REST calls. The
//! composite operations (`ensure_release`, clobbering upload,
//! `delete_asset_if_exists`) are provided methods, so every backend gets the
//! same semantics.
//!
//! | Backend | Module |
//! |---------|--------|
//! | GitHub REST over HTTPS | [`github`](crate::github) |
//! | In-process store | [`memory`](crate::memory) |
//!
//! Calls are blocking and single-attempt. Retry policy belongs to callers.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ReleaseError, Result};
use crate::models::{Asset, Release};

pub trait ReleaseApi: Send + Sync {
    /// `GET /releases/tags/{tag}`. `NotFound` if the tag is absent.
    fn get_release_by_tag(&self, tag: &str) -> Result<Release>;

    /// `GET /releases/latest` (newest non-draft, non-prerelease release).
    fn get_latest_release(&self) -> Result<Release>;

    /// `GET /releases?per_page=&page=`, newest first. `page` starts at 1.
    fn list_releases(&self, per_page: u32, page: u32) -> Result<Vec<Release>>;

    /// `POST /releases` as a published, non-prerelease release.
    fn create_release(&self, tag: &str, title: &str, notes: &str) -> Result<Release>;

    fn list_assets(&self, release_id: u64) -> Result<Vec<Asset>>;

    /// Upload raw bytes. `Conflict` if the name is taken on that release.
    fn upload_asset_bytes(&self, release: &Release, name: &str, data: Vec<u8>) -> Result<Asset>;

    fn delete_asset(&self, asset_id: u64) -> Result<()>;

    /// Fetch via the asset's direct download URL.
    fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>>;

    /// Get-or-create.
    fn ensure_release(&self, tag: &str, title: &str, notes: &str) -> Result<Release> {
        match self.get_release_by_tag(tag) {
            Ok(rel) => Ok(rel),
            Err(err) if err.is_not_found() => {
                info!(tag, "creating release");
                self.create_release(tag, title, notes)
            }
            Err(err) => Err(err),
        }
    }

    /// Asset list of `release`, refetched when the payload came without one.
    fn assets_of(&self, release: &Release) -> Result<Vec<Asset>> {
        if release.assets.is_empty() {
            self.list_assets(release.id)
        } else {
            Ok(release.assets.clone())
        }
    }

    /// Upload a file as `asset_name`.
    ///
    /// With `clobber`, an existing asset of the same name is deleted first.
    /// Without it, an existing name is a `Conflict`.
    fn upload_asset(
        &self,
        release: &Release,
        file_path: &Path,
        asset_name: &str,
        clobber: bool,
    ) -> Result<Asset> {
        let data = std::fs::read(file_path).map_err(|e| ReleaseError::io(file_path, e))?;
        let existing = self
            .assets_of(release)?
            .into_iter()
            .find(|a| a.name == asset_name);
        if let Some(asset) = existing {
            if !clobber {
                return Err(ReleaseError::Conflict(format!(
                    "asset '{}' already exists on release {}",
                    asset_name, release.tag_name
                )));
            }
            debug!(asset = asset_name, id = asset.id, "replacing existing asset");
            self.delete_asset(asset.id)?;
        }
        let asset = self.upload_asset_bytes(release, asset_name, data)?;
        info!(
            tag = %release.tag_name,
            asset = %asset.name,
            size = asset.size,
            "uploaded asset"
        );
        Ok(asset)
    }

    /// Delete `asset_name` from `release`. Returns whether anything was removed.
    fn delete_asset_if_exists(&self, release: &Release, asset_name: &str) -> Result<bool> {
        let found = self
            .assets_of(release)?
            .into_iter()
            .find(|a| a.name == asset_name);
        match found {
            Some(asset) => match self.delete_asset(asset.id) {
                Ok(()) => Ok(true),
                Err(err) if err.is_not_found() => Ok(false),
                Err(err) => Err(err),
            },
            None => Ok(false),
        }
    }
}

impl<T: ReleaseApi + ?Sized> ReleaseApi for std::sync::Arc<T> {
    fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        (**self).get_release_by_tag(tag)
    }
    fn get_latest_release(&self) -> Result<Release> {
        (**self).get_latest_release()
    }
    fn list_releases(&self, per_page: u32, page: u32) -> Result<Vec<Release>> {
        (**self).list_releases(per_page, page)
    }
    fn create_release(&self, tag: &str, title: &str, notes: &str) -> Result<Release> {
        (**self).create_release(tag, title, notes)
    }
    fn list_assets(&self, release_id: u64) -> Result<Vec<Asset>> {
        (**self).list_assets(release_id)
    }
    fn upload_asset_bytes(&self, release: &Release, name: &str, data: Vec<u8>) -> Result<Asset> {
        (**self).upload_asset_bytes(release, name, data)
    }
    fn delete_asset(&self, asset_id: u64) -> Result<()> {
        (**self).delete_asset(asset_id)
    }
    fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        (**self).download_asset(asset)
    }
}

impl<T: ReleaseApi + ?Sized> ReleaseApi for Box<T> {
    fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        (**self).get_release_by_tag(tag)
    }
    fn get_latest_release(&self) -> Result<Release> {
        (**self).get_latest_release()
    }
    fn list_releases(&self, per_page: u32, page: u32) -> Result<Vec<Release>> {
        (**self).list_releases(per_page, page)
    }
    fn create_release(&self, tag: &str, title: &str, notes: &str) -> Result<Release> {
        (**self).create_release(tag, title, notes)
    }
    fn list_assets(&self, release_id: u64) -> Result<Vec<Asset>> {
        (**self).list_assets(release_id)
    }
    fn upload_asset_bytes(&self, release: &Release, name: &str, data: Vec<u8>) -> Result<Asset> {
        (**self).upload_asset_bytes(release, name, data)
    }
    fn delete_asset(&self, asset_id: u64) -> Result<()> {
        (**self).delete_asset(asset_id)
    }
    fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        (**self).download_asset(asset)
    }
}
