use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use maic_artifacts::cache::{Clock, TtlCache};
use maic_artifacts::memory::InMemoryReleases;
use maic_artifacts::packager::{self, ArchiveFormat};
use maic_artifacts::readiness;
use maic_artifacts::restore_meta::{self, RestoreMeta};
use maic_artifacts::sequential::SequentialReleaseManager;
use maic_artifacts::{
    ArtifactClass, Asset, Release, ReleaseApi, ReleaseError, RestoreOrchestrator, RestoreOutcome,
};

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        w.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        w.write_all(data).unwrap();
    }
    w.finish().unwrap().into_inner()
}

fn index_zip(marker: &str) -> Vec<u8> {
    let line = format!("{{\"id\":\"{}\"}}\n", marker);
    zip_of(&[("chunks.jsonl", line.as_bytes())])
}

fn chunks_lines(n: usize) -> String {
    (0..n)
        .map(|i| format!("{{\"id\":{},\"text\":\"chunk {}\"}}\n", i, i))
        .collect()
}

fn index_orchestrator(
    api: Arc<InMemoryReleases>,
    dest: &Path,
) -> RestoreOrchestrator<Arc<InMemoryReleases>> {
    RestoreOrchestrator::new(
        SequentialReleaseManager::new(api),
        ArtifactClass::Index,
        dest,
    )
}

struct ManualClock(AtomicI64);

impl ManualClock {
    fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap()
    }
}

/// Backend whose every call is rejected by the rate limiter.
struct RateLimited;

impl RateLimited {
    fn err(what: &str) -> ReleaseError {
        ReleaseError::RateLimit {
            what: what.to_string(),
            reset_at: DateTime::from_timestamp(1_900_000_000, 0),
        }
    }
}

impl ReleaseApi for RateLimited {
    fn get_release_by_tag(&self, _tag: &str) -> maic_artifacts::Result<Release> {
        Err(Self::err("get release"))
    }
    fn get_latest_release(&self) -> maic_artifacts::Result<Release> {
        Err(Self::err("get latest"))
    }
    fn list_releases(&self, _per_page: u32, _page: u32) -> maic_artifacts::Result<Vec<Release>> {
        Err(Self::err("listing releases"))
    }
    fn create_release(&self, _t: &str, _n: &str, _b: &str) -> maic_artifacts::Result<Release> {
        Err(Self::err("create release"))
    }
    fn list_assets(&self, _id: u64) -> maic_artifacts::Result<Vec<Asset>> {
        Err(Self::err("list assets"))
    }
    fn upload_asset_bytes(
        &self,
        _release: &Release,
        _name: &str,
        _data: Vec<u8>,
    ) -> maic_artifacts::Result<Asset> {
        Err(Self::err("upload"))
    }
    fn delete_asset(&self, _id: u64) -> maic_artifacts::Result<()> {
        Err(Self::err("delete"))
    }
    fn download_asset(&self, _asset: &Asset) -> maic_artifacts::Result<Vec<u8>> {
        Err(Self::err("download"))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_second_boot_does_not_download_again() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    let api = Arc::new(InMemoryReleases::new());
    api.publish_with_id(42, "index-1", vec![("index.zip", index_zip("a"))]);

    let mut orch = index_orchestrator(api.clone(), &dest);
    match orch.run() {
        RestoreOutcome::Restored(result) => assert_eq!(result.release_id, 42),
        other => panic!("expected restored, got {:?}", other),
    }
    assert_eq!(restore_meta::load(&dest).unwrap().release_id, Some(42));
    assert!(readiness::is_ready(&dest));
    assert_eq!(api.download_count(), 1);

    let outcome = orch.run();
    assert_eq!(
        outcome,
        RestoreOutcome::AlreadyLatest {
            tag: Some("index-1".into()),
            release_id: Some(42),
        }
    );
    assert_eq!(api.download_count(), 1);

    // A fresh orchestrator (next process) reaches the same decision.
    let mut next_boot = index_orchestrator(api.clone(), &dest);
    assert!(matches!(next_boot.run(), RestoreOutcome::AlreadyLatest { .. }));
    assert_eq!(api.download_count(), 1);
}

#[test]
fn test_failed_download_preserves_previous_artifact() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("chunks.jsonl"), "{\"id\":\"old\"}\n").unwrap();
    assert!(readiness::mark_ready(&dest));
    restore_meta::save(&dest, &RestoreMeta::new("index-1", 1)).unwrap();

    let api = Arc::new(InMemoryReleases::new());
    api.publish_with_id(2, "index-2", vec![("index.zip", index_zip("new"))]);
    api.fail_downloads(true);

    let outcome = index_orchestrator(api.clone(), &dest).run();
    assert!(outcome.is_failed(), "got {:?}", outcome);
    assert_eq!(api.download_count(), 1);

    assert_eq!(
        fs::read_to_string(dest.join("chunks.jsonl")).unwrap(),
        "{\"id\":\"old\"}\n"
    );
    assert_eq!(fs::read_to_string(dest.join(".ready")).unwrap(), "ready");
    assert!(readiness::is_ready(&dest));
    assert_eq!(restore_meta::load(&dest).unwrap().release_id, Some(1));

    // No staging directories are left next to the destination.
    let leftovers: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".restore-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_restore_through_parent_component_replaces_prior_copy() {
    let tmp = TempDir::new().unwrap();
    let persist = tmp.path().join("persist");
    fs::create_dir_all(persist.join("work")).unwrap();
    fs::write(persist.join("chunks.jsonl"), "{\"id\":\"old\"}\n").unwrap();
    assert!(readiness::mark_ready(&persist));
    restore_meta::save(&persist, &RestoreMeta::new("index-1", 1)).unwrap();

    let api = Arc::new(InMemoryReleases::new());
    api.publish_with_id(2, "index-2", vec![("index.zip", index_zip("new"))]);

    // `persist/work/..` names `persist`, but its lexical parent is inside it.
    let dest = persist.join("work").join("..");
    let outcome = index_orchestrator(api, &dest).run();
    assert!(
        matches!(outcome, RestoreOutcome::Restored(ref r) if r.release_id == 2),
        "got {:?}",
        outcome
    );
    assert!(fs::read_to_string(persist.join("chunks.jsonl"))
        .unwrap()
        .contains("new"));
    assert!(readiness::is_ready(&persist));
    assert_eq!(restore_meta::load(&persist).unwrap().release_id, Some(2));
    let leftovers: Vec<_> = fs::read_dir(&persist)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with(".restore-") || name.ends_with(".lock")
        })
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_newer_remote_replaces_local_copy() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    let api = Arc::new(InMemoryReleases::new());
    api.publish("index-1", vec![("index.zip", index_zip("one"))]);

    let mut orch = index_orchestrator(api.clone(), &dest);
    assert!(matches!(orch.run(), RestoreOutcome::Restored(_)));
    fs::write(dest.join("stale.txt"), "left from index-1").unwrap();

    let newer = api.publish("index-2", vec![("index.zip", index_zip("two"))]);
    match orch.run() {
        RestoreOutcome::Restored(result) => {
            assert_eq!(result.tag, "index-2");
            assert_eq!(result.release_id, newer.id);
        }
        other => panic!("expected restored, got {:?}", other),
    }
    assert!(fs::read_to_string(dest.join("chunks.jsonl"))
        .unwrap()
        .contains("two"));
    assert!(!dest.join("stale.txt").exists());
    assert!(readiness::is_ready(&dest));
}

#[test]
fn test_unready_local_copy_is_restored_even_when_meta_matches() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    let api = Arc::new(InMemoryReleases::new());
    let rel = api.publish("index-1", vec![("index.zip", index_zip("a"))]);

    fs::create_dir_all(&dest).unwrap();
    restore_meta::save(&dest, &RestoreMeta::new("index-1", rel.id)).unwrap();

    assert!(matches!(
        index_orchestrator(api.clone(), &dest).run(),
        RestoreOutcome::Restored(_)
    ));
    assert_eq!(api.download_count(), 1);
}

#[test]
fn test_rate_limit_during_check_is_failed_with_retry_hint() {
    let tmp = TempDir::new().unwrap();
    let mut orch = RestoreOrchestrator::new(
        SequentialReleaseManager::new(RateLimited),
        ArtifactClass::Index,
        tmp.path().join("persist"),
    );
    match orch.run() {
        RestoreOutcome::Failed { retry_after, .. } => {
            assert_eq!(retry_after, DateTime::from_timestamp(1_900_000_000, 0));
        }
        other => panic!("expected failed, got {:?}", other),
    }
}

#[test]
fn test_offline_remote_with_empty_dest_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    let api = Arc::new(InMemoryReleases::new());
    api.set_offline(true);
    let outcome = index_orchestrator(api, &dest).run();
    assert!(matches!(outcome, RestoreOutcome::Skipped { .. }));
    assert!(!readiness::is_ready(&dest));
}

#[test]
fn test_prompts_class_restores_and_marks_ready() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("prompts");
    let api = Arc::new(InMemoryReleases::new());
    api.publish(
        "prompts-1",
        vec![
            ("prompts.json", b"{\"a\": 1}".to_vec()),
            ("prompts.yaml", b"greeting: hello\n".to_vec()),
        ],
    );

    let mut orch = RestoreOrchestrator::new(
        SequentialReleaseManager::new(api.clone()),
        ArtifactClass::Prompts,
        &dest,
    );
    assert!(matches!(orch.run(), RestoreOutcome::Restored(_)));
    assert_eq!(
        fs::read_to_string(dest.join("prompts.yaml")).unwrap(),
        "greeting: hello\n"
    );
    assert!(!dest.join("prompts.json").exists());
    assert!(readiness::is_ready_with(
        &dest,
        ArtifactClass::Prompts.content_files()
    ));
    assert!(matches!(orch.run(), RestoreOutcome::AlreadyLatest { .. }));
}

#[test]
fn test_cached_remote_identity_expires() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    let api = Arc::new(InMemoryReleases::new());
    api.publish("index-1", vec![("index.zip", index_zip("one"))]);

    let clock = Arc::new(ManualClock(AtomicI64::new(1_700_000_000)));
    let mut orch = index_orchestrator(api.clone(), &dest)
        .with_cache(TtlCache::with_clock(Duration::seconds(60), clock.clone()));
    assert!(matches!(orch.run(), RestoreOutcome::Restored(_)));

    api.publish("index-2", vec![("index.zip", index_zip("two"))]);

    // Within the TTL the cached index-1 identity is reused.
    clock.advance(30);
    assert!(matches!(orch.run(), RestoreOutcome::AlreadyLatest { .. }));
    assert_eq!(api.download_count(), 1);

    clock.advance(31);
    match orch.run() {
        RestoreOutcome::Restored(result) => assert_eq!(result.tag, "index-2"),
        other => panic!("expected restored, got {:?}", other),
    }
    assert_eq!(api.download_count(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
// Publish and restore
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_nested_chunks_are_moved_to_root() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("persist");
    let api = InMemoryReleases::new();
    api.publish(
        "index-1",
        vec![(
            "index.zip",
            zip_of(&[
                ("foo/chunks.jsonl", b"{\"id\":1}\n"),
                ("foo/manifest.json", b"{}"),
            ]),
        )],
    );

    let manager = SequentialReleaseManager::new(api);
    manager.restore_latest_index(&dest, true).unwrap();
    assert!(dest.join("chunks.jsonl").is_file());
    assert!(dest.join("manifest.json").is_file());
    assert!(!dest.join("foo").exists());
}

#[test]
fn test_pack_publish_restore_is_byte_identical() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    let chunks = chunks_lines(10);
    let manifest = "{\"version\": 3, \"files\": [\"chunks.jsonl\"]}";
    fs::write(src.join("chunks.jsonl"), &chunks).unwrap();
    fs::write(src.join("manifest.json"), manifest).unwrap();

    let archive = tmp.path().join("out").join("index.zip");
    fs::create_dir_all(archive.parent().unwrap()).unwrap();
    packager::pack(&src, &archive, ArchiveFormat::Zip).unwrap();

    let api = Arc::new(InMemoryReleases::new());
    let manager = SequentialReleaseManager::new(api.clone());
    let (tag, release) = manager.create_index_release(&archive, None, None).unwrap();
    assert_eq!(tag, "index-1");
    assert_eq!(release.name.as_deref(), Some("Index Release 1"));
    assert!(release.asset_named("index.zip").is_some());

    let dest = tmp.path().join("fresh");
    let result = manager.restore_latest_index(&dest, true).unwrap();
    assert_eq!(result.tag, "index-1");
    assert_eq!(fs::read_to_string(dest.join("chunks.jsonl")).unwrap(), chunks);
    assert_eq!(fs::read_to_string(dest.join("manifest.json")).unwrap(), manifest);

    // Restore alone does not grant readiness.
    assert!(!readiness::is_ready(&dest));
    assert!(readiness::mark_ready(&dest));
    assert!(readiness::is_ready(&dest));
}

#[test]
fn test_tar_gz_publish_restores() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("chunks.jsonl"), chunks_lines(3)).unwrap();
    fs::write(src.join("sub").join("extra.txt"), "extra").unwrap();

    let archive = tmp.path().join("index.tar.gz");
    packager::pack(&src, &archive, ArchiveFormat::TarGz).unwrap();

    let manager = SequentialReleaseManager::new(InMemoryReleases::new());
    manager.create_index_release(&archive, None, None).unwrap();
    let dest = tmp.path().join("dest");
    let result = manager.restore_latest_index(&dest, true).unwrap();
    assert_eq!(result.asset_name, "index.tar.gz");
    assert_eq!(fs::read_to_string(dest.join("sub/extra.txt")).unwrap(), "extra");
}

#[test]
fn test_sequential_prompts_publishes() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("prompts.yaml");
    fs::write(&file, "v: 1\n").unwrap();

    let manager = SequentialReleaseManager::new(InMemoryReleases::new());
    let (first, _) = manager.create_prompts_release(&file, None, None).unwrap();
    fs::write(&file, "v: 2\n").unwrap();
    let (second, _) = manager.create_prompts_release(&file, None, None).unwrap();
    assert_eq!(first, "prompts-1");
    assert_eq!(second, "prompts-2");

    let latest = manager.find_latest_by_number("prompts").unwrap().unwrap();
    assert_eq!(latest.tag_name, "prompts-2");

    let dest = tmp.path().join("restored");
    manager.restore_latest_prompts(&dest).unwrap();
    assert_eq!(fs::read_to_string(dest.join("prompts.yaml")).unwrap(), "v: 2\n");
}

#[test]
fn test_numbering_ignores_legacy_timestamp_tags() {
    let api = InMemoryReleases::new();
    api.publish("index-1700000000", vec![("index.zip", index_zip("legacy"))]);
    api.publish("index-3", vec![("index.zip", index_zip("three"))]);
    let manager = SequentialReleaseManager::new(api);
    assert_eq!(manager.next_number("index").unwrap(), 4);
    let latest = manager.find_latest_by_number("index").unwrap().unwrap();
    assert_eq!(latest.tag_name, "index-3");
}
