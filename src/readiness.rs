//! On-disk readiness protocol for artifact directories.
//!
//! A directory is usable only when both signals agree:
//!
//! 1. the content file (`chunks.jsonl` for the index class) exists and is
//!    non-empty, and
//! 2. the `.ready` sentinel exists and normalizes to an accepted token.
//!
//! Normalization strips a UTF-8 BOM and surrounding whitespace and
//! lowercases. The canonical token is `ready`. The legacy values `ok`,
//! `true`, `1`, `on`, `yes`, `y`, `green` are still accepted on read, but
//! [`mark_ready`] always writes `ready`.
//!
//! Checks are fail-soft: a missing directory, an unreadable file or a
//! failed write shows up as "not ready" rather than an error.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

pub const READY_FILE: &str = ".ready";
pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const CANONICAL_TOKEN: &str = "ready";

const ACCEPTED_TOKENS: &[&str] = &["ready", "ok", "true", "1", "on", "yes", "y", "green"];

/// Lines of `chunks.jsonl` sampled by [`probe`].
const PROBE_SAMPLE_LINES: usize = 200;
/// Maximum tolerated share of malformed sampled lines.
const PROBE_MAX_MALFORMED_RATIO: f64 = 0.02;

/// Normalize raw sentinel bytes: decode lossily, drop BOMs, trim, lowercase.
pub fn normalize_token(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace('\u{feff}', "")
        .trim()
        .to_lowercase()
}

/// Returns `true` if the raw sentinel content means "ready".
pub fn is_ready_text(raw: &[u8]) -> bool {
    let norm = normalize_token(raw);
    ACCEPTED_TOKENS.contains(&norm.as_str())
}

pub fn ready_file_of(dir: &Path) -> PathBuf {
    dir.join(READY_FILE)
}

/// Read and normalize the sentinel. Empty string if missing or unreadable.
pub fn read_ready_file(dir: &Path) -> String {
    match std::fs::read(ready_file_of(dir)) {
        Ok(bytes) => normalize_token(&bytes),
        Err(_) => String::new(),
    }
}

fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// First of `content_files` that exists under `dir` with size > 0.
pub fn find_content_file(dir: &Path, content_files: &[&str]) -> Option<PathBuf> {
    content_files
        .iter()
        .map(|name| dir.join(name))
        .find(|p| non_empty_file(p))
}

/// Index-class readiness: non-empty `chunks.jsonl` and a truthy sentinel.
pub fn is_ready(dir: &Path) -> bool {
    is_ready_with(dir, &[CHUNKS_FILE])
}

/// Readiness for an arbitrary set of candidate content files.
pub fn is_ready_with(dir: &Path, content_files: &[&str]) -> bool {
    if find_content_file(dir, content_files).is_none() {
        return false;
    }
    match std::fs::read(ready_file_of(dir)) {
        Ok(bytes) => is_ready_text(&bytes),
        Err(_) => false,
    }
}

/// Write the canonical `ready` token, creating `dir` if needed.
///
/// Idempotent. Returns `false` (after logging) if the write failed.
pub fn mark_ready(dir: &Path) -> bool {
    let path = ready_file_of(dir);
    let result = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&path, CANONICAL_TOKEN.as_bytes()));
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "marked artifact directory ready");
            true
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to write ready sentinel");
            false
        }
    }
}

/// Mark ready only when the index content file is non-empty.
pub fn mark_ready_if_content_exists(dir: &Path) -> bool {
    mark_ready_if_content_exists_with(dir, &[CHUNKS_FILE])
}

pub fn mark_ready_if_content_exists_with(dir: &Path, content_files: &[&str]) -> bool {
    if find_content_file(dir, content_files).is_some() {
        mark_ready(dir)
    } else {
        false
    }
}

/// Lightweight health report for an index directory.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub dir: PathBuf,
    pub content_exists: bool,
    pub content_size: u64,
    pub ready_exists: bool,
    /// Normalized sentinel text, empty when absent.
    pub ready_value: String,
    pub json_sampled: usize,
    pub json_malformed: usize,
    pub json_ok: bool,
    pub ok: bool,
}

/// Inspect `dir` without modifying it.
///
/// Samples the first lines of the content file and checks that they parse
/// as JSON. A small malformed share is tolerated.
pub fn probe(dir: &Path) -> ProbeReport {
    let content = dir.join(CHUNKS_FILE);
    let meta = std::fs::metadata(&content).ok().filter(|m| m.is_file());
    let content_exists = meta.is_some();
    let content_size = meta.map(|m| m.len()).unwrap_or(0);
    let ready_exists = ready_file_of(dir).is_file();
    let ready_value = read_ready_file(dir);

    let (json_sampled, json_malformed) = if content_exists {
        sample_jsonl(&content)
    } else {
        (0, 0)
    };
    let json_ok = json_malformed == 0
        || (json_sampled > 0
            && (json_malformed as f64 / json_sampled as f64) <= PROBE_MAX_MALFORMED_RATIO);

    let ok = content_exists
        && content_size > 0
        && ACCEPTED_TOKENS.contains(&ready_value.as_str())
        && json_ok;

    ProbeReport {
        dir: dir.to_path_buf(),
        content_exists,
        content_size,
        ready_exists,
        ready_value,
        json_sampled,
        json_malformed,
        json_ok,
        ok,
    }
}

fn sample_jsonl(path: &Path) -> (usize, usize) {
    use std::io::{BufRead, BufReader};

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return (0, 0),
    };
    let mut sampled = 0;
    let mut malformed = 0;
    for line in BufReader::new(file).lines().take(PROBE_SAMPLE_LINES) {
        let Ok(line) = line else {
            malformed += 1;
            sampled += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        sampled += 1;
        if serde_json::from_str::<serde_json::Value>(line).is_err() {
            malformed += 1;
        }
    }
    (sampled, malformed)
}
