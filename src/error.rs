//! Error taxonomy for the release core.
//!
//! Every fallible operation in the release client, the sequential manager,
//! the packager and the extractor returns [`ReleaseError`]. Only the
//! [`orchestrator`](crate::orchestrator) converts these into a non-failing
//! terminal state.
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | [`Config`](ReleaseError::Config) | owner/repo missing or malformed |
//! | [`Auth`](ReleaseError::Auth) | HTTP 401, or 403 without a rate-limit signal |
//! | [`RateLimit`](ReleaseError::RateLimit) | 403/429 carrying a rate-limit signal |
//! | [`NotFound`](ReleaseError::NotFound) | tag, release, asset or download URL absent |
//! | [`Conflict`](ReleaseError::Conflict) | asset name already taken on a release |
//! | [`Transport`](ReleaseError::Transport) | network failure, timeout, 5xx, other statuses |
//! | [`SafeExtractViolation`](ReleaseError::SafeExtractViolation) | archive entry is absolute or escapes via `..` |
//! | [`RestoreVerification`](ReleaseError::RestoreVerification) | extraction done but the content file is missing |
//!
//! Messages never include the auth token. The HTTP layer builds them from
//! the request description and a truncated response body only.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Result alias used across the release core.
pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication rejected (HTTP {status}) for {what}")]
    Auth { status: u16, what: String },

    #[error("rate limited while {what}{}", reset_hint(.reset_at))]
    RateLimit {
        what: String,
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport error while {what}: {detail}")]
    Transport {
        what: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("unsafe archive entry '{entry}' in {archive}")]
    SafeExtractViolation { archive: String, entry: String },

    #[error("restore verification failed: {0}")]
    RestoreVerification(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn reset_hint(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(ts) => format!(" (resets at {})", ts.format("%Y-%m-%dT%H:%M:%SZ")),
        None => String::new(),
    }
}

impl ReleaseError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReleaseError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReleaseError::NotFound(_))
    }

    /// Reset time hint carried by a rate-limit error.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        match self {
            ReleaseError::RateLimit { reset_at, .. } => *reset_at,
            _ => None,
        }
    }
}

impl From<zip::result::ZipError> for ReleaseError {
    fn from(err: zip::result::ZipError) -> Self {
        ReleaseError::Archive(err.to_string())
    }
}

impl From<walkdir::Error> for ReleaseError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        match err.into_io_error() {
            Some(source) => ReleaseError::Io { path, source },
            None => ReleaseError::Archive(format!("filesystem loop at {}", path.display())),
        }
    }
}
