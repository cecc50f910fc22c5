//! Boot-time restore decision and execution.
//!
//! One [`RestoreOrchestrator::run`] walks this state machine for one
//! artifact class and destination directory:
//!
//! ```text
//! Start → CheckLocal → CheckRemote ─┬─ query failed / no release ──→ Skipped
//!                                   ├─ local ready + meta matches ──→ AlreadyLatest
//!                                   └─ otherwise → Restoring ─┬─ error ──→ Failed
//!                                                             └─ NormalizeReady → Restored
//! ```
//!
//! `run` never returns an error. Every failure becomes a
//! [`RestoreOutcome`] the host can render. Restoring uses exactly the
//! release identified during CheckRemote, so the saved metadata always
//! describes the bytes on disk.
//!
//! When locking is enabled, an exclusive advisory lock on
//! `<parent>/.<dest-name>.lock` is held from Restoring through
//! NormalizeReady.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::error::{ReleaseError, Result};
use crate::models::{ArtifactClass, Release, RemoteIdentity, RestoreResult};
use crate::progress::{RestoreEvent, RestoreReporter, SilentProgress};
use crate::readiness;
use crate::release_api::ReleaseApi;
use crate::restore_meta::{self, RestoreMeta};
use crate::sequential::{resolve_dest, SequentialReleaseManager};

/// How CheckRemote finds the release to compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLookup {
    /// Highest `{prefix}-{n}` tag.
    Sequential,
    /// `GET /releases/latest`.
    LatestEndpoint,
    /// A fixed tag such as `index-latest`.
    Tag(String),
}

impl std::str::FromStr for RemoteLookup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(tag) = s.strip_prefix("tag:") {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err("lookup 'tag:' needs a tag name".to_string());
            }
            return Ok(RemoteLookup::Tag(tag.to_string()));
        }
        match s {
            "sequential" => Ok(RemoteLookup::Sequential),
            "latest-endpoint" | "latest" => Ok(RemoteLookup::LatestEndpoint),
            other => Err(format!(
                "unknown lookup '{}'. Must be sequential, latest-endpoint or tag:<name>.",
                other
            )),
        }
    }
}

/// Terminal state of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RestoreOutcome {
    Skipped {
        reason: String,
    },
    AlreadyLatest {
        tag: Option<String>,
        release_id: Option<u64>,
    },
    Restored(RestoreResult),
    Failed {
        reason: String,
        retry_after: Option<DateTime<Utc>>,
    },
}

impl RestoreOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RestoreOutcome::Skipped { .. } => "skipped",
            RestoreOutcome::AlreadyLatest { .. } => "already-latest",
            RestoreOutcome::Restored(_) => "restored",
            RestoreOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RestoreOutcome::Failed { .. })
    }

    pub fn detail(&self) -> String {
        match self {
            RestoreOutcome::Skipped { reason } => reason.clone(),
            RestoreOutcome::AlreadyLatest { tag, release_id } => match (tag, release_id) {
                (Some(t), Some(id)) => format!("{} (#{})", t, id),
                (Some(t), None) => t.clone(),
                (None, Some(id)) => format!("#{}", id),
                (None, None) => String::new(),
            },
            RestoreOutcome::Restored(r) => format!("{} (#{}): {}", r.tag, r.release_id, r.detail),
            RestoreOutcome::Failed {
                reason,
                retry_after,
            } => match retry_after {
                Some(ts) => format!("{} (retry after {})", reason, ts.format("%Y-%m-%dT%H:%M:%SZ")),
                None => reason.clone(),
            },
        }
    }

    fn failed(err: &ReleaseError) -> Self {
        RestoreOutcome::Failed {
            reason: err.to_string(),
            retry_after: err.retry_after(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AlreadyLatest,
    Restore,
}

/// The Decide step: skip only when the local copy is ready and the stored
/// metadata names the remote release.
pub fn decide(local_ready: bool, stored: Option<&RestoreMeta>, remote: &RemoteIdentity) -> Decision {
    match stored {
        Some(meta) if local_ready && meta.matches(remote) => Decision::AlreadyLatest,
        _ => Decision::Restore,
    }
}

pub struct RestoreOrchestrator<A: ReleaseApi, C: Clock = SystemClock> {
    manager: Option<SequentialReleaseManager<A>>,
    class: ArtifactClass,
    dest: PathBuf,
    lookup: RemoteLookup,
    reporter: Box<dyn RestoreReporter>,
    cache: Option<TtlCache<Release, C>>,
    lock: bool,
}

impl<A: ReleaseApi> RestoreOrchestrator<A, SystemClock> {
    pub fn new(
        manager: SequentialReleaseManager<A>,
        class: ArtifactClass,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self::build(Some(manager), class, dest.into())
    }

    /// An orchestrator with no remote configured. Runs end in Skipped.
    pub fn without_remote(class: ArtifactClass, dest: impl Into<PathBuf>) -> Self {
        Self::build(None, class, dest.into())
    }

    fn build(
        manager: Option<SequentialReleaseManager<A>>,
        class: ArtifactClass,
        dest: PathBuf,
    ) -> Self {
        Self {
            manager,
            class,
            dest,
            lookup: RemoteLookup::Sequential,
            reporter: Box::new(SilentProgress),
            cache: None,
            lock: true,
        }
    }
}

impl<A: ReleaseApi, C: Clock> RestoreOrchestrator<A, C> {
    pub fn with_lookup(mut self, lookup: RemoteLookup) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn RestoreReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Remember the remote release for the cache's TTL between runs.
    pub fn with_cache<C2: Clock>(self, cache: TtlCache<Release, C2>) -> RestoreOrchestrator<A, C2> {
        RestoreOrchestrator {
            manager: self.manager,
            class: self.class,
            dest: self.dest,
            lookup: self.lookup,
            reporter: self.reporter,
            cache: Some(cache),
            lock: self.lock,
        }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn class(&self) -> ArtifactClass {
        self.class
    }

    pub fn manager(&self) -> Option<&SequentialReleaseManager<A>> {
        self.manager.as_ref()
    }

    /// Run the state machine once.
    pub fn run(&mut self) -> RestoreOutcome {
        let class = self.class;
        let content_files = class.content_files();

        // CheckLocal
        let local_ready = readiness::is_ready_with(&self.dest, content_files);
        let stored = restore_meta::load(&self.dest);
        self.reporter.report(RestoreEvent::CheckLocal {
            class,
            ready: local_ready,
            stored: stored.as_ref().map(|m| RemoteIdentity {
                tag: m.tag.clone(),
                release_id: m.release_id,
            }),
        });

        // CheckRemote
        let (release, cached) = match self.check_remote() {
            Ok(Some(found)) => found,
            Ok(None) => {
                return self.finish(RestoreOutcome::Skipped {
                    reason: "no matching release on the remote".to_string(),
                });
            }
            Err(RemoteUnavailable::NotConfigured) => {
                return self.finish(RestoreOutcome::Skipped {
                    reason: "no remote repository configured".to_string(),
                });
            }
            Err(RemoteUnavailable::Error(err)) => {
                let outcome = match err {
                    ReleaseError::RateLimit { .. } => RestoreOutcome::failed(&err),
                    _ => RestoreOutcome::Skipped {
                        reason: format!("cannot determine remote release: {}", err),
                    },
                };
                return self.finish(outcome);
            }
        };
        let remote = release.identity();
        self.reporter.report(RestoreEvent::CheckRemote {
            class,
            remote: Some(remote.clone()),
            cached,
        });

        // Decide
        let decision = decide(local_ready, stored.as_ref(), &remote);
        self.reporter.report(RestoreEvent::Decision {
            class,
            action: match decision {
                Decision::AlreadyLatest => "already-latest".to_string(),
                Decision::Restore => format!("restore {}", release.tag_name),
            },
        });
        if decision == Decision::AlreadyLatest {
            return self.finish(RestoreOutcome::AlreadyLatest {
                tag: remote.tag,
                release_id: remote.release_id,
            });
        }

        // Restoring → NormalizeReady
        let outcome = match self.restore_locked(&release) {
            Ok(result) => RestoreOutcome::Restored(result),
            Err(err) => {
                if let Some(cache) = self.cache.as_mut() {
                    cache.invalidate();
                }
                RestoreOutcome::failed(&err)
            }
        };
        self.finish(outcome)
    }

    fn check_remote(&mut self) -> std::result::Result<Option<(Release, bool)>, RemoteUnavailable> {
        let Some(manager) = self.manager.as_ref() else {
            return Err(RemoteUnavailable::NotConfigured);
        };
        if let Some(release) = self.cache.as_ref().and_then(|c| c.get()) {
            debug!(tag = %release.tag_name, "using cached remote release");
            return Ok(Some((release, true)));
        }
        let found = match &self.lookup {
            RemoteLookup::Sequential => {
                manager.find_latest_by_number(manager.prefix_for(self.class))
            }
            RemoteLookup::LatestEndpoint => {
                manager.latest_via_endpoint(manager.prefix_for(self.class))
            }
            RemoteLookup::Tag(tag) => not_found_as_none(manager.api().get_release_by_tag(tag)),
        }
        .map_err(RemoteUnavailable::Error)?;
        if let (Some(cache), Some(release)) = (self.cache.as_mut(), found.as_ref()) {
            cache.put(release.clone());
        }
        Ok(found.map(|r| (r, false)))
    }

    fn restore_locked(&self, release: &Release) -> Result<RestoreResult> {
        let manager = self
            .manager
            .as_ref()
            .ok_or_else(|| ReleaseError::Config("no remote repository configured".to_string()))?;
        let _guard = if self.lock {
            Some(DestLock::acquire(&self.dest)?)
        } else {
            None
        };

        self.reporter.report(RestoreEvent::Restoring {
            class: self.class,
            tag: release.tag_name.clone(),
        });
        let result = manager.restore_from_release(self.class, release, &self.dest)?;

        let ready =
            readiness::mark_ready_if_content_exists_with(&self.dest, self.class.content_files());
        self.reporter.report(RestoreEvent::NormalizeReady {
            class: self.class,
            ready,
        });
        if !ready {
            warn!(dest = %self.dest.display(), "restored content but could not mark ready");
        }
        if let Err(err) = restore_meta::save(&self.dest, &RestoreMeta::new(&result.tag, result.release_id)) {
            warn!(%err, "failed to persist restore metadata; next boot will restore again");
        }
        Ok(result)
    }

    fn finish(&self, outcome: RestoreOutcome) -> RestoreOutcome {
        match &outcome {
            RestoreOutcome::Failed { reason, .. } => {
                warn!(class = %self.class, dest = %self.dest.display(), reason = %reason, "restore failed")
            }
            other => info!(
                class = %self.class,
                dest = %self.dest.display(),
                state = other.label(),
                "restore check finished"
            ),
        }
        self.reporter.report(RestoreEvent::Terminal {
            class: self.class,
            state: outcome.label().to_string(),
            detail: outcome.detail(),
        });
        outcome
    }
}

enum RemoteUnavailable {
    NotConfigured,
    Error(ReleaseError),
}

fn not_found_as_none(res: Result<Release>) -> Result<Option<Release>> {
    match res {
        Ok(r) => Ok(Some(r)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Exclusive advisory lock next to the destination directory.
struct DestLock {
    file: File,
    path: PathBuf,
}

impl DestLock {
    fn lock_path(dest: &Path) -> Result<PathBuf> {
        let resolved = resolve_dest(dest)?;
        match (resolved.parent(), resolved.file_name()) {
            (Some(parent), Some(name)) => {
                Ok(parent.join(format!(".{}.lock", name.to_string_lossy())))
            }
            _ => Err(ReleaseError::Config(format!(
                "cannot lock {}: no parent directory",
                resolved.display()
            ))),
        }
    }

    fn acquire(dest: &Path) -> Result<Self> {
        let path = Self::lock_path(dest)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ReleaseError::io(&path, e))?;
        file.lock_exclusive()
            .map_err(|e| ReleaseError::io(&path, e))?;
        debug!(path = %path.display(), "acquired restore lock");
        Ok(Self { file, path })
    }
}

impl Drop for DestLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!(path = %self.path.display(), %err, "failed to release restore lock");
        }
    }
}
