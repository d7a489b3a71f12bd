//! The watch event loop.
//!
//! Every raw OS notification and every registry lifecycle change arrives as a
//! [`WatchSignal`] on one queue. The dispatcher feeds them through the
//! [`Debouncer`], re-stats files whose window closed, and calls
//! [`WatchRegistry::notify_modified`] when the modification time moved.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::backend::{NotifyBackend, SignalSink, WatchBackend, WatchSignal};
use super::debouncer::{DEFAULT_DEBOUNCE_MS, Debouncer};
use super::error::WatchError;
use super::registry::WatchRegistry;

/// Default capacity of the signal queue.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// Drives debouncing and change fan-out for a [`WatchRegistry`].
pub struct WatchDispatcher {
    registry: Arc<WatchRegistry>,
    debouncer: Debouncer,
    signals: mpsc::Receiver<WatchSignal>,
    tick: Duration,
}

impl WatchDispatcher {
    /// Create a builder for configuring the dispatcher.
    pub fn builder() -> WatchDispatcherBuilder {
        WatchDispatcherBuilder::new()
    }

    /// Shared handle to the registry this dispatcher serves.
    pub fn registry(&self) -> Arc<WatchRegistry> {
        self.registry.clone()
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        crate::log_event!(
            "dispatcher",
            "started",
            "debounce: {}ms",
            self.debouncer.duration().as_millis()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::log_event!("dispatcher", "stopped");
                    break;
                }

                signal = self.signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => {
                        crate::debug_event!("dispatcher", "signal queue closed");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if self.debouncer.has_pending() {
                        self.flush_ready().await;
                    }
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: WatchSignal) {
        match signal {
            WatchSignal::Started { path, modified } => {
                self.debouncer.seed(path, modified);
            }
            WatchSignal::Changed(path) => {
                if self.debouncer.record(path.clone()) {
                    crate::debug_event!("dispatcher", "window opened", "{}", path.display());
                }
            }
            WatchSignal::Stopped(path) => {
                self.debouncer.forget(&path);
            }
        }
    }

    async fn flush_ready(&mut self) {
        for path in self.debouncer.take_ready() {
            self.settle(path).await;
        }
    }

    /// Re-stat a file whose window closed and notify if it really changed.
    async fn settle(&mut self, path: PathBuf) {
        let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                // Usually an atomic save in progress; the file comes back
                crate::debug_event!("dispatcher", "stat failed", "{}: {e}", path.display());
                return;
            }
        };

        if !self.debouncer.observe(&path, modified) {
            crate::debug_event!("dispatcher", "unchanged", "{}", path.display());
            return;
        }

        let delivered = self.registry.notify_modified(&path, modified);
        crate::log_event!(
            "dispatcher",
            "changed",
            "{} ({delivered} subscribers)",
            path.display()
        );
    }
}

/// Builder for constructing a [`WatchDispatcher`] and its registry.
pub struct WatchDispatcherBuilder {
    backend: Option<Arc<dyn WatchBackend>>,
    debounce_ms: u64,
    signal_capacity: usize,
}

impl WatchDispatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            backend: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }

    /// Set the watch backend (defaults to [`NotifyBackend`]).
    pub fn backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the debounce window in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the signal queue capacity.
    pub fn signal_capacity(mut self, capacity: usize) -> Self {
        self.signal_capacity = capacity;
        self
    }

    /// Build the dispatcher together with a fresh registry.
    pub fn build(self) -> Result<WatchDispatcher, WatchError> {
        if self.signal_capacity == 0 {
            return Err(WatchError::ConfigError {
                reason: "watch.signal_capacity must be positive".to_string(),
            });
        }

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(NotifyBackend::new()));
        let (sink, signals) = SignalSink::channel(self.signal_capacity);
        let registry = Arc::new(WatchRegistry::new(backend, sink));

        // Poll often enough that a window closes close to its deadline
        let tick = Duration::from_millis((self.debounce_ms / 4).clamp(5, 50));

        Ok(WatchDispatcher {
            registry,
            debouncer: Debouncer::new(self.debounce_ms),
            signals,
            tick,
        })
    }
}

impl Default for WatchDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
