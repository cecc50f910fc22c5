//! Restore progress reporting.
//!
//! The orchestrator emits one [`RestoreEvent`] per state transition so a
//! host can show what the boot check is doing. Progress goes to **stderr**
//! so stdout stays parseable for scripts.
//!
//! | Mode | Reporter | Output |
//! |------|----------|--------|
//! | off | [`SilentProgress`] | nothing |
//! | human | [`StderrProgress`] | `restore index  check-remote  index-7 (#42)` |
//! | json | [`JsonProgress`] | one JSON object per line |

use std::io::{IsTerminal, Write};

use serde::Serialize;

use crate::models::{ArtifactClass, RemoteIdentity};

/// A single state transition of the restore state machine.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum RestoreEvent {
    CheckLocal {
        class: ArtifactClass,
        ready: bool,
        stored: Option<RemoteIdentity>,
    },
    CheckRemote {
        class: ArtifactClass,
        remote: Option<RemoteIdentity>,
        cached: bool,
    },
    Decision {
        class: ArtifactClass,
        action: String,
    },
    Restoring {
        class: ArtifactClass,
        tag: String,
    },
    NormalizeReady {
        class: ArtifactClass,
        ready: bool,
    },
    Terminal {
        class: ArtifactClass,
        state: String,
        detail: String,
    },
}

/// Receives restore progress. Implementations must not fail.
pub trait RestoreReporter: Send + Sync {
    fn report(&self, event: RestoreEvent);
}

fn identity_label(id: &Option<RemoteIdentity>) -> String {
    match id {
        Some(RemoteIdentity {
            tag: Some(tag),
            release_id: Some(rid),
        }) => format!("{} (#{})", tag, rid),
        Some(RemoteIdentity { tag: Some(tag), .. }) => tag.clone(),
        Some(RemoteIdentity {
            release_id: Some(rid),
            ..
        }) => format!("#{}", rid),
        _ => "-".to_string(),
    }
}

/// Human-friendly lines on stderr.
pub struct StderrProgress;

impl StderrProgress {
    fn line(event: &RestoreEvent) -> String {
        match event {
            RestoreEvent::CheckLocal {
                class,
                ready,
                stored,
            } => format!(
                "restore {}  check-local  ready={} stored={}\n",
                class,
                ready,
                identity_label(stored)
            ),
            RestoreEvent::CheckRemote {
                class,
                remote,
                cached,
            } => format!(
                "restore {}  check-remote  {}{}\n",
                class,
                identity_label(remote),
                if *cached { " (cached)" } else { "" }
            ),
            RestoreEvent::Decision { class, action } => {
                format!("restore {}  decide  {}\n", class, action)
            }
            RestoreEvent::Restoring { class, tag } => {
                format!("restore {}  restoring  {}\n", class, tag)
            }
            RestoreEvent::NormalizeReady { class, ready } => {
                format!("restore {}  normalize-ready  ready={}\n", class, ready)
            }
            RestoreEvent::Terminal {
                class,
                state,
                detail,
            } => {
                if detail.is_empty() {
                    format!("restore {}  {}\n", class, state)
                } else {
                    format!("restore {}  {}  {}\n", class, state, detail)
                }
            }
        }
    }
}

impl RestoreReporter for StderrProgress {
    fn report(&self, event: RestoreEvent) {
        let line = Self::line(&event);
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RestoreReporter for JsonProgress {
    fn report(&self, event: RestoreEvent) {
        let mut obj = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(_) => return,
        };
        if let Some(map) = obj.as_object_mut() {
            map.insert("event".to_string(), serde_json::json!("restore"));
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct SilentProgress;

impl RestoreReporter for SilentProgress {
    fn report(&self, _event: RestoreEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RestoreReporter> {
        match self {
            ProgressMode::Off => Box::new(SilentProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl<R: RestoreReporter + ?Sized> RestoreReporter for Box<R> {
    fn report(&self, event: RestoreEvent) {
        (**self).report(event)
    }
}

impl<R: RestoreReporter + ?Sized> RestoreReporter for std::sync::Arc<R> {
    fn report(&self, event: RestoreEvent) {
        (**self).report(event)
    }
}
