//! Sequential release addressing and restore.
//!
//! [`SequentialReleaseManager`] layers the `{prefix}-{n}` tag scheme from
//! [`tags`](crate::tags) over a [`ReleaseApi`] backend. It publishes
//! numbered releases and restores them into a destination directory.
//!
//! # Restore sequence (index)
//!
//! ```text
//! select asset → download bytes → validate every entry
//!     → extract into sibling staging dir → verify / move-up chunks.jsonl
//!     → clean dest (optional) → move staged tree into dest
//! ```
//!
//! The destination is touched only after the new content has been fully
//! downloaded, validated and verified, so a failed restore leaves the
//! previous artifact intact. Restore never writes `.ready`; that is the
//! orchestrator's NormalizeReady step.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ReleaseError, Result};
use crate::extract;
use crate::models::{ArtifactClass, Asset, Release, RestoreResult};
use crate::readiness::{CHUNKS_FILE, READY_FILE};
use crate::release_api::ReleaseApi;
use crate::restore_meta::META_FILE;
use crate::tags::{TagKind, TagScheme, DEFAULT_SEQUENTIAL_MAX};

pub const DEFAULT_SCAN_PER_PAGE: u32 = 100;
pub const INDEX_ASSET: &str = "index.tar.gz";
pub const PROMPTS_STEM: &str = "prompts";

pub struct SequentialReleaseManager<A: ReleaseApi> {
    api: A,
    scan_per_page: u32,
    sequential_max: u64,
    index_prefix: String,
    prompts_prefix: String,
}

impl<A: ReleaseApi> SequentialReleaseManager<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            scan_per_page: DEFAULT_SCAN_PER_PAGE,
            sequential_max: DEFAULT_SEQUENTIAL_MAX,
            index_prefix: ArtifactClass::Index.default_prefix().to_string(),
            prompts_prefix: ArtifactClass::Prompts.default_prefix().to_string(),
        }
    }

    pub fn with_sequential_max(mut self, max: u64) -> Self {
        self.sequential_max = max;
        self
    }

    pub fn with_scan_per_page(mut self, per_page: u32) -> Self {
        self.scan_per_page = per_page.clamp(1, 100);
        self
    }

    pub fn with_prefix(mut self, class: ArtifactClass, prefix: impl Into<String>) -> Self {
        match class {
            ArtifactClass::Index => self.index_prefix = prefix.into(),
            ArtifactClass::Prompts => self.prompts_prefix = prefix.into(),
        }
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn prefix_for(&self, class: ArtifactClass) -> &str {
        match class {
            ArtifactClass::Index => &self.index_prefix,
            ArtifactClass::Prompts => &self.prompts_prefix,
        }
    }

    pub fn scheme(&self, prefix: &str) -> TagScheme {
        TagScheme::new(prefix).with_sequential_max(self.sequential_max)
    }

    fn recent_releases(&self) -> Result<Vec<Release>> {
        self.api.list_releases(self.scan_per_page, 1)
    }

    pub fn next_number(&self, prefix: &str) -> Result<u64> {
        let releases = self.recent_releases()?;
        Ok(self
            .scheme(prefix)
            .next_number(releases.iter().map(|r| r.tag_name.as_str())))
    }

    pub fn find_latest_by_number(&self, prefix: &str) -> Result<Option<Release>> {
        let releases = self.recent_releases()?;
        Ok(self.scheme(prefix).latest(&releases).cloned())
    }

    /// The repository's latest release, when it belongs to `prefix`.
    ///
    /// `/releases/latest` is repository-wide, so a newer release of another
    /// class can shadow this one. Such a release is ignored in favour of the
    /// numbered scan. The `{prefix}-latest` alias counts as belonging.
    pub fn latest_via_endpoint(&self, prefix: &str) -> Result<Option<Release>> {
        let release = match self.api.get_latest_release() {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let scheme = self.scheme(prefix);
        if scheme.classify(&release.tag_name) != TagKind::Unrelated
            || release.tag_name == scheme.latest_alias()
        {
            return Ok(Some(release));
        }
        debug!(tag = %release.tag_name, prefix, "latest release belongs to another class");
        self.find_latest_by_number(prefix)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Publish
    // ═══════════════════════════════════════════════════════════════════

    pub fn create_index_release(
        &self,
        archive: &Path,
        title: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(String, Release)> {
        self.create_numbered_release(ArtifactClass::Index, archive, None, title, notes)
    }

    pub fn create_prompts_release(
        &self,
        yaml_path: &Path,
        title: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(String, Release)> {
        self.create_numbered_release(ArtifactClass::Prompts, yaml_path, None, title, notes)
    }

    /// Publish `file` under the next `{prefix}-{n}` tag, clobbering any
    /// same-named asset left by an earlier attempt at that tag.
    pub fn create_numbered_release(
        &self,
        class: ArtifactClass,
        file: &Path,
        asset_name: Option<&str>,
        title: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(String, Release)> {
        let prefix = self.prefix_for(class).to_string();
        let n = self.next_number(&prefix)?;
        let tag = self.scheme(&prefix).tag_for(n);
        let title = title
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} Release {}", capitalize(class.label()), n));
        let notes = notes
            .map(str::to_string)
            .unwrap_or_else(|| format!("Sequential {} release #{}", class.label(), n));
        let release = self.publish_to_tag(&tag, file, asset_name, &title, &notes)?;
        Ok((tag, release))
    }

    /// Upload `file` to a fixed tag (e.g. `index-latest`), creating the
    /// release if needed. Returns the refreshed release.
    pub fn publish_to_tag(
        &self,
        tag: &str,
        file: &Path,
        asset_name: Option<&str>,
        title: &str,
        notes: &str,
    ) -> Result<Release> {
        let name = match asset_name {
            Some(n) => n.to_string(),
            None => file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    ReleaseError::Config(format!("no file name in {}", file.display()))
                })?,
        };
        let release = self.api.ensure_release(tag, title, notes)?;
        self.api.upload_asset(&release, file, &name, true)?;
        info!(tag, asset = %name, "published release asset");
        self.api.get_release_by_tag(tag)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Restore
    // ═══════════════════════════════════════════════════════════════════

    pub fn restore_latest_index(&self, dest: &Path, clean_dest: bool) -> Result<RestoreResult> {
        let release = self.latest_or_not_found(&self.index_prefix)?;
        self.restore_index_from_release(&release, dest, clean_dest)
    }

    pub fn restore_latest_prompts(&self, dest: &Path) -> Result<RestoreResult> {
        let release = self.latest_or_not_found(&self.prompts_prefix)?;
        self.restore_prompts_from_release(&release, dest)
    }

    fn latest_or_not_found(&self, prefix: &str) -> Result<Release> {
        self.find_latest_by_number(prefix)?
            .ok_or_else(|| ReleaseError::NotFound(format!("no '{}-*' release", prefix)))
    }

    /// Restore a specific release of the given class.
    pub fn restore_from_release(
        &self,
        class: ArtifactClass,
        release: &Release,
        dest: &Path,
    ) -> Result<RestoreResult> {
        match class {
            ArtifactClass::Index => self.restore_index_from_release(release, dest, true),
            ArtifactClass::Prompts => self.restore_prompts_from_release(release, dest),
        }
    }

    pub fn restore_index_from_release(
        &self,
        release: &Release,
        dest: &Path,
        clean_dest: bool,
    ) -> Result<RestoreResult> {
        let assets = self.api.assets_of(release)?;
        let asset = select_index_asset(&assets).ok_or_else(|| {
            ReleaseError::NotFound(format!(
                "no index archive asset on release '{}'",
                release.tag_name
            ))
        })?;
        info!(tag = %release.tag_name, asset = %asset.name, "downloading index archive");
        let bytes = self.api.download_asset(asset)?;
        extract::validate_archive(&asset.name, &bytes)?;

        let resolved = resolve_dest(dest)?;
        let dest = resolved.as_path();
        let parent = dest.parent().ok_or_else(|| {
            ReleaseError::Config(format!("cannot restore into {}", dest.display()))
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".restore-")
            .tempdir_in(parent)
            .map_err(|e| ReleaseError::io(parent, e))?;

        let listing = extract::extract_bytes_to(staging.path(), &asset.name, &bytes)?;
        let moved_up = ensure_chunks_at_root(staging.path(), &asset.name)?;
        // Readiness and restore metadata are granted locally, never shipped.
        for name in [READY_FILE, META_FILE] {
            remove_if_exists(&staging.path().join(name))?;
        }

        if clean_dest {
            clean_dir(dest)?;
        }
        move_children(staging.path(), dest)?;

        let mut detail = format!(
            "restored {} files from {} ({} bytes)",
            listing.files.len(),
            asset.name,
            bytes.len()
        );
        if let Some(sub) = moved_up {
            detail.push_str(&format!("; moved contents of '{}' up", sub));
        }
        info!(tag = %release.tag_name, dest = %dest.display(), "index restored");
        Ok(RestoreResult {
            tag: release.tag_name.clone(),
            release_id: release.id,
            asset_name: asset.name.clone(),
            detail,
        })
    }

    pub fn restore_prompts_from_release(
        &self,
        release: &Release,
        dest: &Path,
    ) -> Result<RestoreResult> {
        let assets = self.api.assets_of(release)?;
        let asset = select_prompts_asset(&assets).ok_or_else(|| {
            ReleaseError::NotFound(format!(
                "no prompts asset (.yaml/.yml/.json) on release '{}'",
                release.tag_name
            ))
        })?;
        let bytes = self.api.download_asset(asset)?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ReleaseError::RestoreVerification(format!(
                "prompts asset '{}' is empty",
                asset.name
            )));
        }
        let ext = extension_of(&asset.name);
        if ext == "json" && serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
            return Err(ReleaseError::RestoreVerification(format!(
                "prompts asset '{}' is not valid JSON",
                asset.name
            )));
        }

        std::fs::create_dir_all(dest).map_err(|e| ReleaseError::io(dest, e))?;
        let canonical = format!("{}.{}", PROMPTS_STEM, ext);
        let target = dest.join(&canonical);
        let mut tmp = tempfile::Builder::new()
            .prefix(".prompts-")
            .tempfile_in(dest)
            .map_err(|e| ReleaseError::io(dest, e))?;
        std::io::Write::write_all(&mut tmp, &bytes).map_err(|e| ReleaseError::io(&target, e))?;
        tmp.persist(&target)
            .map_err(|e| ReleaseError::io(&target, e.error))?;

        for other in ArtifactClass::Prompts.content_files() {
            if *other != canonical {
                remove_if_exists(&dest.join(other))?;
            }
        }

        info!(tag = %release.tag_name, file = %target.display(), "prompts restored");
        Ok(RestoreResult {
            tag: release.tag_name.clone(),
            release_id: release.id,
            asset_name: asset.name.clone(),
            detail: format!("wrote {} ({} bytes)", canonical, bytes.len()),
        })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn extension_of(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".yml") {
        "yml"
    } else if lower.ends_with(".json") {
        "json"
    } else {
        "yaml"
    }
}

/// `index.tar.gz`, then `index*.tar.gz`, then any `.zip`, then any tarball.
pub fn select_index_asset(assets: &[Asset]) -> Option<&Asset> {
    let lower = |a: &Asset| a.name.to_ascii_lowercase();
    assets
        .iter()
        .find(|a| a.name == INDEX_ASSET)
        .or_else(|| {
            assets.iter().find(|a| {
                let n = lower(a);
                n.starts_with("index") && n.ends_with(".tar.gz")
            })
        })
        .or_else(|| assets.iter().find(|a| lower(a).ends_with(".zip")))
        .or_else(|| {
            assets.iter().find(|a| {
                let n = lower(a);
                n.ends_with(".tar.gz") || n.ends_with(".tgz")
            })
        })
}

/// `.yaml`/`.yml` before `.json`.
pub fn select_prompts_asset(assets: &[Asset]) -> Option<&Asset> {
    let has_ext = |a: &Asset, exts: &[&str]| {
        let n = a.name.to_ascii_lowercase();
        exts.iter().any(|e| n.ends_with(e))
    };
    assets
        .iter()
        .find(|a| has_ext(a, &[".yaml", ".yml"]))
        .or_else(|| assets.iter().find(|a| has_ext(a, &[".json"])))
}

/// Create `dest` and return its canonical path.
///
/// Staging directories and lock files live next to the destination, so a
/// relative `dest` such as `.` or `sub/..` must be resolved before taking
/// its parent. Otherwise they land inside the directory being replaced.
pub(crate) fn resolve_dest(dest: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest).map_err(|e| ReleaseError::io(dest, e))?;
    std::fs::canonicalize(dest).map_err(|e| ReleaseError::io(dest, e))
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Make sure `chunks.jsonl` sits directly under `root`.
///
/// If it only exists inside exactly one first-level subdirectory, that
/// subdirectory's contents are moved up. Several candidate subdirectories
/// are ambiguous and fail verification. Returns the subdirectory name when
/// a move happened.
pub fn ensure_chunks_at_root(root: &Path, archive: &str) -> Result<Option<String>> {
    if is_non_empty_file(&root.join(CHUNKS_FILE)) {
        return Ok(None);
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(|e| ReleaseError::io(root, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && is_non_empty_file(&p.join(CHUNKS_FILE)))
        .collect();
    candidates.sort();

    let sub = match candidates.len() {
        0 => {
            return Err(ReleaseError::RestoreVerification(format!(
                "{} not found at the root of {} or one level down",
                CHUNKS_FILE, archive
            )))
        }
        1 => candidates.remove(0),
        _ => {
            let names: Vec<String> = candidates
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            return Err(ReleaseError::RestoreVerification(format!(
                "{} has {} in several subdirectories ({}); refusing to guess",
                archive,
                CHUNKS_FILE,
                names.join(", ")
            )));
        }
    };

    let sub_name = sub
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!(subdir = %sub_name, "moving nested index contents up");
    // Rename first so a child sharing the subdirectory's name can move up.
    let holding = root.join(format!(".moveup-{}", sub_name));
    std::fs::rename(&sub, &holding).map_err(|e| ReleaseError::io(&sub, e))?;
    move_children(&holding, root)?;
    std::fs::remove_dir_all(&holding).map_err(|e| ReleaseError::io(&holding, e))?;

    if !is_non_empty_file(&root.join(CHUNKS_FILE)) {
        return Err(ReleaseError::RestoreVerification(format!(
            "{} still missing after moving up '{}'",
            CHUNKS_FILE, sub_name
        )));
    }
    Ok(Some(sub_name))
}

/// Remove everything inside `dir`: directories first, then files.
/// A missing `dir` is fine.
pub fn clean_dir(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ReleaseError::io(dir, e)),
    };
    let (mut dirs, mut files) = (Vec::new(), Vec::new());
    for entry in entries {
        let entry = entry.map_err(|e| ReleaseError::io(dir, e))?;
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            dirs.push(path);
        } else {
            files.push(path);
        }
    }
    for path in dirs {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ReleaseError::io(&path, e)),
        }
    }
    for path in files {
        remove_if_exists(&path)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ReleaseError::io(path, e)),
    }
}

/// Move every child of `from` into `to`, replacing same-named entries.
fn move_children(from: &Path, to: &Path) -> Result<()> {
    let entries = std::fs::read_dir(from).map_err(|e| ReleaseError::io(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ReleaseError::io(from, e))?;
        let target = to.join(entry.file_name());
        if target.is_dir() && !target.is_symlink() {
            std::fs::remove_dir_all(&target).map_err(|e| ReleaseError::io(&target, e))?;
        } else if target.exists() || target.is_symlink() {
            std::fs::remove_file(&target).map_err(|e| ReleaseError::io(&target, e))?;
        }
        std::fs::rename(entry.path(), &target).map_err(|e| ReleaseError::io(&target, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryReleases;
    use std::fs;
    use std::io::Write;

    fn asset(name: &str) -> Asset {
        serde_json::from_value(serde_json::json!({"id": 1, "name": name})).unwrap()
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in entries {
            w.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            w.write_all(data.as_bytes()).unwrap();
        }
        w.finish().unwrap().into_inner()
    }

    #[test]
    fn index_asset_preference() {
        let assets = vec![asset("other.zip"), asset("index-v2.tar.gz"), asset("index.tar.gz")];
        assert_eq!(select_index_asset(&assets).unwrap().name, "index.tar.gz");
        let assets = vec![asset("other.zip"), asset("index-v2.tar.gz")];
        assert_eq!(select_index_asset(&assets).unwrap().name, "index-v2.tar.gz");
        let assets = vec![asset("notes.txt"), asset("bundle.zip")];
        assert_eq!(select_index_asset(&assets).unwrap().name, "bundle.zip");
        assert!(select_index_asset(&[asset("notes.txt")]).is_none());
    }

    #[test]
    fn prompts_asset_preference() {
        let assets = vec![asset("prompts.json"), asset("prompts.yml")];
        assert_eq!(select_prompts_asset(&assets).unwrap().name, "prompts.yml");
        let assets = vec![asset("prompts.json")];
        assert_eq!(select_prompts_asset(&assets).unwrap().name, "prompts.json");
        assert!(select_prompts_asset(&[asset("index.zip")]).is_none());
    }

    #[test]
    fn next_number_and_latest_from_remote() {
        let api = InMemoryReleases::new();
        for tag in ["index-1", "index-2", "index-5", "prompts-9", "index-1700000000"] {
            api.publish(tag, vec![]);
        }
        let mgr = SequentialReleaseManager::new(api);
        assert_eq!(mgr.next_number("index").unwrap(), 6);
        assert_eq!(mgr.next_number("prompts").unwrap(), 10);
        assert_eq!(mgr.next_number("other").unwrap(), 1);
        assert_eq!(
            mgr.find_latest_by_number("index").unwrap().unwrap().tag_name,
            "index-5"
        );
        assert!(mgr.find_latest_by_number("other").unwrap().is_none());
    }

    #[test]
    fn latest_endpoint_keeps_own_class_and_alias() {
        let api = InMemoryReleases::new();
        api.publish("index-3", vec![]);
        let mgr = SequentialReleaseManager::new(api);
        assert_eq!(
            mgr.latest_via_endpoint("index").unwrap().unwrap().tag_name,
            "index-3"
        );
        mgr.api().publish("index-latest", vec![]);
        assert_eq!(
            mgr.latest_via_endpoint("index").unwrap().unwrap().tag_name,
            "index-latest"
        );
        mgr.api().publish("prompts-1", vec![]);
        assert_eq!(
            mgr.latest_via_endpoint("index").unwrap().unwrap().tag_name,
            "index-3"
        );
        assert!(mgr.latest_via_endpoint("models").unwrap().is_none());
    }

    #[test]
    fn create_index_release_numbers_and_uploads() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("index.zip");
        fs::write(&archive, zip_bytes(&[("chunks.jsonl", "{}\n")])).unwrap();

        let mgr = SequentialReleaseManager::new(InMemoryReleases::new());
        let (tag, rel) = mgr.create_index_release(&archive, None, None).unwrap();
        assert_eq!(tag, "index-1");
        assert_eq!(rel.name.as_deref(), Some("Index Release 1"));
        assert_eq!(rel.assets[0].name, "index.zip");
        let (tag, _) = mgr.create_index_release(&archive, Some("t"), None).unwrap();
        assert_eq!(tag, "index-2");
    }

    #[test]
    fn publish_to_fixed_tag_clobbers() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("prompts.yaml");
        fs::write(&file, "v: 1\n").unwrap();
        let mgr = SequentialReleaseManager::new(InMemoryReleases::new());
        mgr.publish_to_tag("prompts-latest", &file, None, "t", "n").unwrap();
        fs::write(&file, "v: 2\n").unwrap();
        let rel = mgr
            .publish_to_tag("prompts-latest", &file, None, "t", "n")
            .unwrap();
        assert_eq!(rel.assets.len(), 1);
        assert_eq!(mgr.api().download_asset(&rel.assets[0]).unwrap(), b"v: 2\n");
    }

    #[test]
    fn restore_moves_nested_chunks_up() {
        let api = InMemoryReleases::new();
        api.publish(
            "index-1",
            vec![(
                "index.zip",
                zip_bytes(&[("foo/chunks.jsonl", "{\"a\":1}\n"), ("foo/manifest.json", "{}")]),
            )],
        );
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("persist");
        let mgr = SequentialReleaseManager::new(api);
        let res = mgr.restore_latest_index(&dest, true).unwrap();
        assert_eq!(res.tag, "index-1");
        assert!(dest.join("chunks.jsonl").is_file());
        assert!(dest.join("manifest.json").is_file());
        assert!(!dest.join("foo").exists());
        assert!(res.detail.contains("foo"));
        assert!(!crate::readiness::is_ready(&dest));
    }

    #[test]
    fn restore_without_chunks_fails_verification_and_keeps_dest() {
        let api = InMemoryReleases::new();
        api.publish("index-1", vec![("index.zip", zip_bytes(&[("readme.txt", "hi")]))]);
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("persist");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("chunks.jsonl"), "old\n").unwrap();

        let mgr = SequentialReleaseManager::new(api);
        let err = mgr.restore_latest_index(&dest, true).unwrap_err();
        assert!(matches!(err, ReleaseError::RestoreVerification(_)));
        assert_eq!(fs::read_to_string(dest.join("chunks.jsonl")).unwrap(), "old\n");
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".restore-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn restore_strips_shipped_sentinel() {
        let api = InMemoryReleases::new();
        api.publish(
            "index-1",
            vec![("index.zip", zip_bytes(&[("chunks.jsonl", "{}\n"), (".ready", "ready")]))],
        );
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SequentialReleaseManager::new(api);
        mgr.restore_latest_index(tmp.path(), true).unwrap();
        assert!(!tmp.path().join(".ready").exists());
    }

    #[test]
    fn move_up_refuses_ambiguous_subdirectories() {
        let api = InMemoryReleases::new();
        api.publish(
            "index-1",
            vec![(
                "index.zip",
                zip_bytes(&[("a/chunks.jsonl", "{}\n"), ("b/chunks.jsonl", "{}\n")]),
            )],
        );
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("persist");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("chunks.jsonl"), "old\n").unwrap();

        let err = SequentialReleaseManager::new(api)
            .restore_latest_index(&dest, true)
            .unwrap_err();
        assert!(matches!(err, ReleaseError::RestoreVerification(ref m) if m.contains("a, b")));
        assert_eq!(fs::read_to_string(dest.join("chunks.jsonl")).unwrap(), "old\n");
    }

    #[test]
    fn move_up_ignores_subdirectories_without_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("assets")).unwrap();
        fs::write(tmp.path().join("assets/logo.txt"), "x").unwrap();
        fs::create_dir_all(tmp.path().join("index")).unwrap();
        fs::write(tmp.path().join("index/chunks.jsonl"), "{}\n").unwrap();

        let moved = ensure_chunks_at_root(tmp.path(), "index.zip").unwrap();
        assert_eq!(moved.as_deref(), Some("index"));
        assert!(tmp.path().join("chunks.jsonl").is_file());
        assert!(tmp.path().join("assets/logo.txt").is_file());
    }

    #[test]
    fn restore_through_dotted_dest_stages_outside_it() {
        let api = InMemoryReleases::new();
        api.publish("index-1", vec![("index.zip", zip_bytes(&[("chunks.jsonl", "new\n")]))]);
        let tmp = tempfile::tempdir().unwrap();
        let persist = tmp.path().join("persist");
        fs::create_dir_all(persist.join("sub")).unwrap();
        fs::write(persist.join("chunks.jsonl"), "old\n").unwrap();

        let mgr = SequentialReleaseManager::new(api);
        mgr.restore_latest_index(&persist.join("sub").join(".."), true)
            .unwrap();
        assert_eq!(fs::read_to_string(persist.join("chunks.jsonl")).unwrap(), "new\n");
        let names: Vec<String> = fs::read_dir(&persist)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chunks.jsonl".to_string()]);
    }

    #[test]
    fn clean_dir_tolerates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        clean_dir(&tmp.path().join("nope")).unwrap();
        fs::create_dir_all(tmp.path().join("d/sub")).unwrap();
        fs::write(tmp.path().join("d/sub/x"), "x").unwrap();
        fs::write(tmp.path().join("d/y"), "y").unwrap();
        clean_dir(&tmp.path().join("d")).unwrap();
        assert_eq!(fs::read_dir(tmp.path().join("d")).unwrap().count(), 0);
    }

    #[test]
    fn prompts_restore_uses_canonical_name() {
        let api = InMemoryReleases::new();
        api.publish("prompts-1", vec![("my-prompts.yml", b"modes: {}\n".to_vec())]);
        api.publish("prompts-2", vec![("prompts.json", b"{\"modes\":{}}".to_vec())]);
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("prompts.yaml"), "stale").unwrap();
        let mgr = SequentialReleaseManager::new(api);
        let res = mgr.restore_latest_prompts(tmp.path()).unwrap();
        assert_eq!(res.tag, "prompts-2");
        assert!(tmp.path().join("prompts.json").is_file());
        assert!(!tmp.path().join("prompts.yaml").exists());
    }

    #[test]
    fn prompts_restore_rejects_bad_json() {
        let api = InMemoryReleases::new();
        api.publish("prompts-1", vec![("prompts.json", b"{not json".to_vec())]);
        let tmp = tempfile::tempdir().unwrap();
        let err = SequentialReleaseManager::new(api)
            .restore_latest_prompts(tmp.path())
            .unwrap_err();
        assert!(matches!(err, ReleaseError::RestoreVerification(_)));
    }

    #[test]
    fn restore_with_no_release_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = SequentialReleaseManager::new(InMemoryReleases::new())
            .restore_latest_index(tmp.path(), true)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
