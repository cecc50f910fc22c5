//! # MAIC Artifacts CLI (`maic-artifacts`)
//!
//! Packs, publishes and restores index and prompt artifacts stored as
//! release assets, and inspects the local copy.
//!
//! ## Usage
//!
//! ```bash
//! maic-artifacts --config ./maic.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `maic-artifacts pack` | Package a directory into a zip or tar.gz |
//! | `maic-artifacts publish` | Upload an artifact as the next numbered release (or to a fixed tag) |
//! | `maic-artifacts restore` | Run the boot-time restore check for one artifact class |
//! | `maic-artifacts verify` | Restore the latest index and check it is usable |
//! | `maic-artifacts status` | Report local readiness and the last restored release |
//! | `maic-artifacts latest` | Show the latest release and the next sequential tag |
//!
//! ## Exit codes
//!
//! `restore` exits 1 only when the outcome is `failed`. `verify` exits
//! 0 on success, 1 when the restore did not happen, 2 when `chunks.jsonl`
//! is missing or empty, and 3 when `.ready` is not exactly `ready`.
//!
//! ## Examples
//!
//! ```bash
//! # Pack and publish the local index as index-<n+1>
//! maic-artifacts publish --mode index --src ~/.maic/persist
//!
//! # Re-point the latest alias
//! maic-artifacts publish --mode index --src ~/.maic/persist --tag index-latest
//!
//! # Boot check with JSON output
//! maic-artifacts restore --mode index --json
//!
//! # Verbose logging
//! MAIC_LOG=maic_artifacts=debug maic-artifacts restore --mode prompts
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use maic_artifacts::cache::TtlCache;
use maic_artifacts::config::{self, Config};
use maic_artifacts::github::GitHubReleases;
use maic_artifacts::packager::{self, ArchiveFormat, PackOptions, WalkdirLister};
use maic_artifacts::progress::ProgressMode;
use maic_artifacts::readiness::{self, CANONICAL_TOKEN, CHUNKS_FILE};
use maic_artifacts::restore_meta;
use maic_artifacts::sequential::SequentialReleaseManager;
use maic_artifacts::{ArtifactClass, RestoreOrchestrator, RestoreOutcome};

/// Log filter environment variable.
const LOG_ENV: &str = "MAIC_LOG";

/// MAIC artifact store: sequentially tagged index and prompt releases with
/// safe restore and a `.ready` sentinel.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults with no remote configured.
#[derive(Parser)]
#[command(name = "maic-artifacts", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./maic.toml")]
    config: PathBuf,

    /// Debug-level logging for this crate (overridden by `MAIC_LOG`)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a directory into an archive.
    ///
    /// Every regular file under `--src` is stored with its relative path.
    /// The output archive is never included in itself. The SHA-256 of the
    /// result is printed.
    Pack {
        /// Directory to package.
        #[arg(long)]
        src: PathBuf,
        /// Output archive path.
        #[arg(long)]
        out: PathBuf,
        /// Archive format (`zip` or `tar.gz`). Inferred from `--out` when omitted.
        #[arg(long)]
        format: Option<ArchiveFormat>,
        /// Leave out archives already present in the tree.
        #[arg(long)]
        skip_archives: bool,
        /// Glob patterns to leave out (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },

    /// Publish an artifact as a release.
    ///
    /// Without `--tag`, the next `{prefix}-{n}` tag is created. With
    /// `--tag`, the asset is uploaded to that fixed tag, replacing an
    /// existing asset of the same name.
    Publish {
        /// Artifact class: `index` or `prompts`.
        #[arg(long)]
        mode: ArtifactClass,
        /// Index directory (packed first) or an existing archive / prompts file.
        #[arg(long)]
        src: PathBuf,
        /// Fixed tag to publish to (e.g., `index-latest`).
        #[arg(long)]
        tag: Option<String>,
        /// Asset name. Defaults to the file name.
        #[arg(long)]
        asset: Option<String>,
        /// Archive format when packing a directory.
        #[arg(long, default_value = "tar.gz")]
        format: ArchiveFormat,
        /// Release title.
        #[arg(long)]
        title: Option<String>,
        /// Release notes.
        #[arg(long)]
        notes: Option<String>,
    },

    /// Restore the latest artifact if the local copy is stale.
    ///
    /// Prints the terminal state (`restored`, `already-latest`, `skipped`
    /// or `failed`). Progress goes to stderr.
    Restore {
        /// Artifact class: `index` or `prompts`.
        #[arg(long)]
        mode: ArtifactClass,
        /// Destination directory. Defaults to the configured one.
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
        /// Progress output: `off`, `human` or `json`. Defaults to human on a terminal.
        #[arg(long, value_parser = parse_progress)]
        progress: Option<ProgressMode>,
    },

    /// Restore the latest index and verify it is ready.
    Verify {
        /// Repository as `owner/name`. Defaults to the configured one.
        #[arg(long)]
        repo: Option<String>,
        /// Destination directory.
        #[arg(long, default_value = "tmp_ready")]
        dest: PathBuf,
    },

    /// Show local readiness and the last restored release.
    Status {
        /// Artifact class: `index` or `prompts`.
        #[arg(long, default_value = "index")]
        mode: ArtifactClass,
        /// Directory to inspect. Defaults to the configured one.
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Show the latest numbered release and the next tag.
    Latest {
        /// Artifact class: `index` or `prompts`.
        #[arg(long, default_value = "index")]
        mode: ArtifactClass,
    },
}

/// Parse a `--progress` value.
fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => Err(format!(
            "unknown progress mode '{}'. Must be off, human or json.",
            other
        )),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "maic_artifacts=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Build the sequential manager for the configured remote, if any.
fn build_manager(cfg: &Config) -> Result<Option<SequentialReleaseManager<GitHubReleases>>> {
    let Some(gh) = cfg.github_config(cfg.token_from_env())? else {
        return Ok(None);
    };
    let client = GitHubReleases::new(gh)?;
    let index = cfg.class_settings(ArtifactClass::Index)?;
    let prompts = cfg.class_settings(ArtifactClass::Prompts)?;
    Ok(Some(
        SequentialReleaseManager::new(client)
            .with_sequential_max(cfg.tags.sequential_max)
            .with_scan_per_page(cfg.tags.scan_per_page)
            .with_prefix(ArtifactClass::Index, index.prefix)
            .with_prefix(ArtifactClass::Prompts, prompts.prefix),
    ))
}

fn require_manager(cfg: &Config) -> Result<SequentialReleaseManager<GitHubReleases>> {
    match build_manager(cfg)? {
        Some(m) => Ok(m),
        None => bail!(
            "no repository configured: set [github].repo or {}",
            config::REPO_ENV
        ),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Pack {
        src,
        out,
        format,
        skip_archives,
        exclude,
    } = &cli.command
    {
        return run_pack(src, out, *format, *skip_archives, exclude.clone());
    }

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Pack { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Publish {
            mode,
            src,
            tag,
            asset,
            format,
            title,
            notes,
        } => {
            run_publish(
                &cfg,
                mode,
                &src,
                tag.as_deref(),
                asset.as_deref(),
                format,
                title.as_deref(),
                notes.as_deref(),
            )?;
        }
        Commands::Restore {
            mode,
            dest,
            json,
            progress,
        } => {
            let outcome = run_restore(&cfg, mode, dest, progress)?;
            if json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else {
                let detail = outcome.detail();
                if detail.is_empty() {
                    println!("{}", outcome.label());
                } else {
                    println!("{}  {}", outcome.label(), detail);
                }
            }
            if outcome.is_failed() {
                std::process::exit(1);
            }
        }
        Commands::Verify { repo, dest } => {
            cfg.apply_repo_override(repo);
            let code = run_verify(&cfg, &config::expand_tilde(&dest))?;
            std::process::exit(code);
        }
        Commands::Status { mode, dest } => {
            run_status(&cfg, mode, dest)?;
        }
        Commands::Latest { mode } => {
            run_latest(&cfg, mode)?;
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════

fn run_pack(
    src: &Path,
    out: &Path,
    format: Option<ArchiveFormat>,
    skip_archives: bool,
    exclude_globs: Vec<String>,
) -> Result<()> {
    let format = match format.or_else(|| ArchiveFormat::from_path(out)) {
        Some(f) => f,
        None => bail!(
            "cannot infer archive format from {}; pass --format",
            out.display()
        ),
    };
    let opts = PackOptions {
        skip_existing_archives: skip_archives,
        exclude_globs,
    };
    let output = packager::pack_with(&WalkdirLister::default(), src, out, format, &opts)
        .with_context(|| format!("Failed to pack {}", src.display()))?;
    println!(
        "{}  {} entries  {} bytes  sha256:{}",
        output.path.display(),
        output.entries,
        output.size,
        output.sha256
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_publish(
    cfg: &Config,
    mode: ArtifactClass,
    src: &Path,
    tag: Option<&str>,
    asset: Option<&str>,
    format: ArchiveFormat,
    title: Option<&str>,
    notes: Option<&str>,
) -> Result<()> {
    let manager = require_manager(cfg)?;

    // The staging dir must outlive the upload.
    let (file, _staging) = if src.is_dir() {
        if mode != ArtifactClass::Index {
            bail!("--src for prompts must be a file, got directory {}", src.display());
        }
        let settings = cfg.class_settings(mode)?;
        let dir = tempfile::tempdir().context("Failed to create staging directory")?;
        let archive = dir.path().join(format!("index.{}", format.extension()));
        let opts = PackOptions {
            skip_existing_archives: true,
            exclude_globs: settings.exclude_globs,
        };
        let output = packager::pack_with(&WalkdirLister::default(), src, &archive, format, &opts)
            .with_context(|| format!("Failed to pack {}", src.display()))?;
        eprintln!(
            "packed {} entries ({} bytes, sha256:{})",
            output.entries, output.size, output.sha256
        );
        (output.path, Some(dir))
    } else if src.is_file() {
        (src.to_path_buf(), None)
    } else {
        bail!("source not found: {}", src.display());
    };

    let release = match tag {
        Some(tag) => {
            let title = title.unwrap_or(tag);
            let notes = notes.unwrap_or("");
            manager.publish_to_tag(tag, &file, asset, title, notes)?
        }
        None => manager.create_numbered_release(mode, &file, asset, title, notes)?.1,
    };
    println!("{}  (#{})", release.tag_name, release.id);
    for a in &release.assets {
        println!("  {}  {} bytes", a.name, a.size);
    }
    Ok(())
}

fn run_restore(
    cfg: &Config,
    mode: ArtifactClass,
    dest: Option<PathBuf>,
    progress: Option<ProgressMode>,
) -> Result<RestoreOutcome> {
    let settings = cfg.class_settings(mode)?;
    let dest = dest
        .map(|d| config::expand_tilde(&d))
        .unwrap_or(settings.dest);
    let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

    let mut orch = match build_manager(cfg)? {
        Some(manager) => RestoreOrchestrator::new(manager, mode, dest),
        None => RestoreOrchestrator::<GitHubReleases>::without_remote(mode, dest),
    }
    .with_lookup(settings.lookup)
    .with_lock(cfg.boot.lock)
    .with_reporter(reporter);
    if cfg.boot.remote_cache_ttl_secs > 0 {
        let ttl = chrono::Duration::seconds(cfg.boot.remote_cache_ttl_secs as i64);
        orch = orch.with_cache(TtlCache::new(ttl));
    }
    Ok(orch.run())
}

fn run_verify(cfg: &Config, dest: &Path) -> Result<i32> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let outcome = run_restore(cfg, ArtifactClass::Index, Some(dest.to_path_buf()), None)?;
    match &outcome {
        RestoreOutcome::Restored(_) | RestoreOutcome::AlreadyLatest { .. } => {}
        other => {
            println!("[restore] {}: {}", other.label(), other.detail());
            return Ok(1);
        }
    }

    let chunks = dest.join(CHUNKS_FILE);
    let chunks_ok = std::fs::metadata(&chunks)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !chunks_ok {
        println!("[verify] {} missing or empty", CHUNKS_FILE);
        return Ok(2);
    }
    let ready = readiness::read_ready_file(dest);
    if ready != CANONICAL_TOKEN {
        println!(
            "[verify] .ready != '{}' (got: '{}')",
            CANONICAL_TOKEN,
            if ready.is_empty() { "EMPTY" } else { ready.as_str() }
        );
        return Ok(3);
    }
    println!("[ok] restored to {} and READY", dest.display());
    Ok(0)
}

fn run_status(cfg: &Config, mode: ArtifactClass, dest: Option<PathBuf>) -> Result<()> {
    let dest = match dest {
        Some(d) => config::expand_tilde(&d),
        None => cfg.class_settings(mode)?.dest,
    };
    let meta = restore_meta::load(&dest);
    let report = match mode {
        ArtifactClass::Index => serde_json::to_value(readiness::probe(&dest))?,
        ArtifactClass::Prompts => {
            let content = readiness::find_content_file(&dest, mode.content_files());
            serde_json::json!({
                "dir": dest,
                "content_file": content,
                "ready_value": readiness::read_ready_file(&dest),
                "ok": readiness::is_ready_with(&dest, mode.content_files()),
            })
        }
    };
    let status = serde_json::json!({
        "class": mode,
        "probe": report,
        "restored": meta,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn run_latest(cfg: &Config, mode: ArtifactClass) -> Result<()> {
    let manager = require_manager(cfg)?;
    let prefix = manager.prefix_for(mode).to_string();
    match manager.find_latest_by_number(&prefix)? {
        Some(release) => {
            println!("latest: {}  (#{})", release.tag_name, release.id);
            for a in &release.assets {
                println!("  {}  {} bytes", a.name, a.size);
            }
        }
        None => println!("latest: none"),
    }
    let next = manager.next_number(&prefix)?;
    println!("next:   {}", manager.scheme(&prefix).tag_for(next));
    Ok(())
}
