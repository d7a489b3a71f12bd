//! OS-level watch backends and the signal queue they feed.
//!
//! A backend starts one watch per file and hands back a [`WatchHandle`].
//! Dropping the handle stops the watch. Raw notifications never touch the
//! registry directly; they are pushed into a [`SignalSink`] and picked up by
//! the dispatcher loop.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::error::WatchError;

/// Messages consumed by the dispatcher loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// A watch was established; `modified` is the snapshot taken at start.
    Started {
        path: PathBuf,
        modified: Option<SystemTime>,
    },
    /// Something happened to the file (raw, not debounced).
    Changed(PathBuf),
    /// The last subscriber left and the watch was released.
    Stopped(PathBuf),
}

/// Sending half of the signal queue.
///
/// Sends never block: OS callbacks and registry operations both run on
/// threads that must not wait. A full queue drops the signal, which is
/// harmless because a pending window for that path already exists.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tx: mpsc::Sender<WatchSignal>,
}

impl SignalSink {
    /// Create a bounded signal queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WatchSignal>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn changed(&self, path: &Path) {
        self.push(WatchSignal::Changed(path.to_path_buf()));
    }

    pub fn started(&self, path: &Path, modified: Option<SystemTime>) {
        self.push(WatchSignal::Started {
            path: path.to_path_buf(),
            modified,
        });
    }

    pub fn stopped(&self, path: &Path) {
        self.push(WatchSignal::Stopped(path.to_path_buf()));
    }

    fn push(&self, signal: WatchSignal) {
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                crate::debug_event!("watcher", "signal dropped", "queue full: {signal:?}");
            }
            Err(TrySendError::Closed(_)) => {
                crate::debug_event!("watcher", "signal dropped", "dispatcher gone");
            }
        }
    }
}

/// A live OS watch. Dropping it stops the watch.
pub trait WatchHandle: Send {
    /// The file this handle watches.
    fn path(&self) -> &Path;
}

impl fmt::Debug for dyn WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("path", &self.path())
            .finish()
    }
}

/// Starts OS-level watches for single files.
pub trait WatchBackend: Send + Sync {
    /// Start watching `path`, reporting raw changes into `sink`.
    fn start(&self, path: &Path, sink: SignalSink) -> Result<Box<dyn WatchHandle>, WatchError>;
}

/// Backend built on `notify::RecommendedWatcher`.
///
/// The watch is placed on the parent directory (non-recursive) and events are
/// filtered by file path. Linux inotify drops a file watch when the inode is
/// replaced, which is how most editors save; a directory watch survives it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

struct NotifyHandle {
    path: PathBuf,
    _watcher: notify::RecommendedWatcher,
}

impl WatchHandle for NotifyHandle {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NotifyHandle {
    fn drop(&mut self) {
        crate::debug_event!("watcher", "unwatched", "{}", self.path.display());
    }
}

impl WatchBackend for NotifyBackend {
    fn start(&self, path: &Path, sink: SignalSink) -> Result<Box<dyn WatchHandle>, WatchError> {
        let target = path.to_path_buf();
        let parent = path
            .parent()
            .ok_or_else(|| WatchError::WatchStartFailed {
                path: target.clone(),
                reason: "cannot watch a filesystem root".to_string(),
            })?
            .to_path_buf();

        let filter_target = target.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if is_content_event(&event.kind)
                        && event.paths.iter().any(|p| p == &filter_target)
                    {
                        sink.changed(&filter_target);
                    }
                }
                Err(e) => {
                    tracing::warn!("[watcher] file watch error: {e}");
                }
            }
        })
        .map_err(|e| WatchError::from_notify(&target, e))?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::from_notify(&target, e))?;

        crate::debug_event!("watcher", "watching", "{}", target.display());

        Ok(Box::new(NotifyHandle {
            path: target,
            _watcher: watcher,
        }))
    }
}

/// Access events (open/close/read) never change content.
fn is_content_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Backend double that counts starts and stops.

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailMode {
        None,
        StartFailed,
        Exhausted,
    }

    #[derive(Debug, Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail: AtomicBool,
        exhausted: AtomicBool,
    }

    /// Counts watch starts and stops; can be told to fail.
    #[derive(Debug, Clone, Default)]
    pub struct CountingBackend {
        counters: Arc<Counters>,
    }

    impl CountingBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn starts(&self) -> usize {
            self.counters.starts.load(Ordering::SeqCst)
        }

        pub fn stops(&self) -> usize {
            self.counters.stops.load(Ordering::SeqCst)
        }

        pub fn live(&self) -> usize {
            self.starts() - self.stops()
        }

        pub fn set_fail(&self, mode: FailMode) {
            self.counters
                .fail
                .store(mode == FailMode::StartFailed, Ordering::SeqCst);
            self.counters
                .exhausted
                .store(mode == FailMode::Exhausted, Ordering::SeqCst);
        }
    }

    struct CountingHandle {
        path: PathBuf,
        counters: Arc<Counters>,
    }

    impl WatchHandle for CountingHandle {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for CountingHandle {
        fn drop(&mut self) {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl WatchBackend for CountingBackend {
        fn start(
            &self,
            path: &Path,
            _sink: SignalSink,
        ) -> Result<Box<dyn WatchHandle>, WatchError> {
            if self.counters.exhausted.load(Ordering::SeqCst) {
                return Err(WatchError::ResourceExhausted {
                    path: path.to_path_buf(),
                    reason: "watch limit reached".to_string(),
                });
            }
            if self.counters.fail.load(Ordering::SeqCst) {
                return Err(WatchError::WatchStartFailed {
                    path: path.to_path_buf(),
                    reason: "permission denied".to_string(),
                });
            }
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingHandle {
                path: path.to_path_buf(),
                counters: self.counters.clone(),
            }))
        }
    }
}
