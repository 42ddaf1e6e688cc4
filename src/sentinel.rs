// src/sentinel.rs

//! Per-application sentinel files.
//!
//! Two files under the application root carry externally-signalled intent:
//!
//! - `tmp/restart.txt`: a change in its modification time requests a pool
//!   restart (mtime-based trigger).
//! - `tmp/always_restart.txt`: its mere existence puts the pool in run-once
//!   mode (existence-based trigger).
//!
//! Stat failures are treated as "file absent", never surfaced to callers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::watch;
use tracing::debug;

use crate::fs::FileSystem;

/// Restart trigger file, relative to the application root.
pub const RESTART_SENTINEL: &str = "tmp/restart.txt";

/// Run-once trigger file, relative to the application root.
pub const RUN_ONCE_SENTINEL: &str = "tmp/always_restart.txt";

/// What the tracker last saw when it stat'ed the restart sentinel.
///
/// `Never` and `Absent` are deliberately distinct: the first-ever observation
/// of an existing file has nothing to compare against and must not trigger,
/// while a file that appears after being observed absent is a real change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    Never,
    Absent,
    SeenAt(SystemTime),
}

/// Mtime-based restart request tracker.
#[derive(Debug)]
pub struct RestartSentinel {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    last: Observation,
}

impl RestartSentinel {
    pub fn new(root: &Path, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: root.join(RESTART_SENTINEL),
            fs,
            last: Observation::Never,
        }
    }

    /// Stat the sentinel and report whether a restart was requested since the
    /// previous check.
    ///
    /// The stored observation always updates as a side effect, regardless of
    /// the verdict.
    pub fn check(&mut self) -> bool {
        match self.fs.modified(&self.path) {
            Err(_) => {
                self.last = Observation::Absent;
                false
            }
            Ok(mtime) => {
                let changed = match self.last {
                    Observation::Never => false,
                    Observation::Absent => true,
                    Observation::SeenAt(prev) => prev != mtime,
                };
                self.last = Observation::SeenAt(mtime);
                changed
            }
        }
    }

    /// Forget everything observed so far (used when the pool is torn down).
    pub fn reset(&mut self) {
        self.last = Observation::Never;
    }
}

/// Existence check for the run-once sentinel, coalescing concurrent callers.
///
/// Request bursts would otherwise issue one filesystem stat per request; all
/// callers that arrive while a check is in flight subscribe to that check's
/// result over a `watch` channel instead.
#[derive(Debug, Clone)]
pub struct RunOnceGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    inflight: Mutex<Option<watch::Receiver<Option<bool>>>>,
}

impl RunOnceGate {
    pub fn new(root: &Path, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                path: root.join(RUN_ONCE_SENTINEL),
                fs,
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Whether the run-once sentinel currently exists.
    ///
    /// At most one filesystem check is in flight at a time; concurrent
    /// callers share its result.
    pub async fn refresh(&self) -> bool {
        let mut rx = {
            let mut inflight = self.inner.inflight.lock().unwrap();
            match inflight.as_ref() {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx.clone());

                    let inner = Arc::clone(&self.inner);
                    tokio::task::spawn_blocking(move || {
                        let on = inner.fs.exists(&inner.path);
                        debug!(path = %inner.path.display(), run_once = on, "run-once sentinel checked");
                        // Clear before publishing so late subscribers start a
                        // fresh check instead of reading a stale result.
                        *inner.inflight.lock().unwrap() = None;
                        let _ = tx.send(Some(on));
                    });

                    rx
                }
            }
        };

        match rx.wait_for(|v| v.is_some()).await {
            Ok(value) => (*value).unwrap_or(false),
            Err(_) => false,
        }
    }
}
