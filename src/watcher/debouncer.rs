//! Debouncing of raw file change signals.
//!
//! Editors often save through a temp file and a rename, which shows up as a
//! handful of raw notifications within a few milliseconds. The first signal
//! for a path opens a fixed window; signals arriving while it is open are
//! absorbed. When the window closes the caller re-stats the file and asks
//! [`Debouncer::observe`] whether the modification time actually moved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Default quiet period after the first raw signal.
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Coalesces raw signals per path and filters out metadata-only churn.
#[derive(Debug)]
pub struct Debouncer {
    /// Open windows: path -> time of the first signal.
    pending: HashMap<PathBuf, Instant>,
    /// Last modification time that produced (or seeded) an event.
    last_seen: HashMap<PathBuf, SystemTime>,
    /// Window length.
    duration: Duration,
}

impl Debouncer {
    /// Create a new debouncer with the given window in milliseconds.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            last_seen: HashMap::new(),
            duration: Duration::from_millis(debounce_ms),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Record the modification time observed when the watch started.
    pub fn seed(&mut self, path: PathBuf, modified: Option<SystemTime>) {
        match modified {
            Some(time) => {
                self.last_seen.insert(path, time);
            }
            None => {
                self.last_seen.remove(&path);
            }
        }
    }

    /// Drop the remembered modification time for a path that is no longer
    /// watched. An open window is left alone and fires as a no-op.
    pub fn forget(&mut self, path: &Path) {
        self.last_seen.remove(path);
    }

    /// Record a raw signal.
    ///
    /// Returns `true` if this signal opened a new window, `false` if it was
    /// absorbed by one already pending.
    pub fn record(&mut self, path: PathBuf) -> bool {
        self.record_at(path, Instant::now())
    }

    pub fn record_at(&mut self, path: PathBuf, now: Instant) -> bool {
        if self.pending.contains_key(&path) {
            return false;
        }
        self.pending.insert(path, now);
        true
    }

    /// Take all paths whose window has elapsed.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        self.take_ready_at(Instant::now())
    }

    pub fn take_ready_at(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready = Vec::new();

        self.pending.retain(|path, opened| {
            if now.duration_since(*opened) >= self.duration {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });

        ready
    }

    /// Compare a fresh modification time against the last one seen.
    ///
    /// Returns `true` (and remembers `modified`) only if it is strictly newer.
    pub fn observe(&mut self, path: &Path, modified: SystemTime) -> bool {
        match self.last_seen.get(path) {
            Some(last) if modified <= *last => false,
            _ => {
                self.last_seen.insert(path.to_path_buf(), modified);
                true
            }
        }
    }

    /// Check if there are any open windows.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[allow(dead_code)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}
