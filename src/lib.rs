//! # MAIC Artifacts
//!
//! Publish and restore versioned index and prompt artifacts through a
//! release-hosting service, and decide at boot whether the local copy is
//! already current.
//!
//! Artifacts are directories (an index with `chunks.jsonl` at its root) or
//! single files (`prompts.yaml`). They are packed into archives, uploaded
//! as assets of sequentially tagged releases (`index-1`, `index-2`, ...),
//! and restored with safe extraction into a destination directory that is
//! only declared usable once a `.ready` sentinel has been written.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  Packager  │──▶│  Sequential  │──▶│    ReleaseApi    │
//! │ zip/tar.gz │   │   Manager    │   │ GitHub / memory  │
//! └────────────┘   └──────┬───────┘   └──────────────────┘
//!                         │
//!            ┌────────────┴───────────┐
//!            ▼                        ▼
//!     ┌─────────────┐         ┌──────────────┐
//!     │ Orchestrator│────────▶│  Readiness   │
//!     │ boot check  │         │ .ready/probe │
//!     └─────────────┘         └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! maic-artifacts pack --src ./persist --out ./index.tar.gz
//! maic-artifacts publish --mode index --src ./persist
//! maic-artifacts restore --mode index --dest ~/.maic/persist
//! maic-artifacts status --mode index
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Releases, assets, artifact classes |
//! | [`error`] | Release and restore error taxonomy |
//! | [`readiness`] | `.ready` sentinel and health probe |
//! | [`packager`] | Deterministic zip / tar.gz packing |
//! | [`extract`] | Safe archive validation and extraction |
//! | [`tags`] | Sequential tag scheme |
//! | [`release_api`] | Release backend trait |
//! | [`github`] | GitHub Releases REST client |
//! | [`memory`] | In-memory release backend |
//! | [`sequential`] | Numbered publish and restore |
//! | [`restore_meta`] | Record of the last restored release |
//! | [`cache`] | TTL cache with injectable clock |
//! | [`progress`] | Restore progress reporters |
//! | [`orchestrator`] | Boot-time restore state machine |

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod github;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod packager;
pub mod progress;
pub mod readiness;
pub mod release_api;
pub mod restore_meta;
pub mod sequential;
pub mod tags;

pub use error::{ReleaseError, Result};
pub use models::{ArtifactClass, Asset, Release, RemoteIdentity, RestoreResult};
pub use orchestrator::{RemoteLookup, RestoreOrchestrator, RestoreOutcome};
pub use release_api::ReleaseApi;
