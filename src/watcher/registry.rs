//! Registry of watched files and their subscribers.
//!
//! One entry per canonical path, holding the OS watch (if it could be
//! started) and the channels of every session viewing that file. An entry
//! exists exactly as long as it has at least one subscriber.
//!
//! All operations take the single registry lock for their full duration and
//! never await while holding it, so a subscriber set can never be observed
//! out of step with its watch handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::broadcast::{BroadcastChannel, BroadcastMessage, ChannelId, Delivery};

use super::backend::{SignalSink, WatchBackend, WatchHandle};
use super::error::WatchError;

/// How a subscription was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The file has a live OS watch.
    Watching,
    /// The OS watch could not be started. The subscription stands, but no
    /// reload will fire until a later subscription restarts the watch.
    Degraded,
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStatus {
    pub path: PathBuf,
    pub subscribers: usize,
    pub watching: bool,
    pub last_modified: Option<SystemTime>,
}

struct WatchEntry {
    /// `None` while degraded.
    handle: Option<Box<dyn WatchHandle>>,
    subscribers: HashMap<ChannelId, BroadcastChannel>,
    last_modified: Option<SystemTime>,
}

/// Map from canonical file path to its watch and subscribers.
pub struct WatchRegistry {
    entries: Mutex<HashMap<PathBuf, WatchEntry>>,
    backend: Arc<dyn WatchBackend>,
    sink: SignalSink,
}

impl WatchRegistry {
    /// Create an empty registry starting watches through `backend`.
    pub fn new(backend: Arc<dyn WatchBackend>, sink: SignalSink) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            backend,
            sink,
        }
    }

    /// Queue that OS callbacks and lifecycle messages are written to.
    pub fn signal_sink(&self) -> SignalSink {
        self.sink.clone()
    }

    /// Subscribe `channel` to `path` and send it `connected`.
    ///
    /// `path` must already be validated and canonical. A failed watch start is
    /// not fatal (see [`SubscribeOutcome::Degraded`]) unless the OS is out of
    /// watch resources, in which case nothing is recorded.
    pub fn subscribe(
        &self,
        path: &Path,
        channel: BroadcastChannel,
    ) -> Result<SubscribeOutcome, WatchError> {
        let mut entries = self.entries.lock();
        let id = channel.id();

        // A channel follows one file at a time
        self.detach_everywhere(&mut entries, id);

        let outcome = match entries.get_mut(path) {
            Some(entry) if entry.handle.is_some() => SubscribeOutcome::Watching,
            Some(entry) => {
                // Explicit resubscription is the only retry path
                let modified = modified_time(path);
                match self.start_watch(path, modified)? {
                    Some(handle) => {
                        entry.handle = Some(handle);
                        entry.last_modified = modified;
                        SubscribeOutcome::Watching
                    }
                    None => SubscribeOutcome::Degraded,
                }
            }
            None => {
                let modified = modified_time(path);
                let handle = self.start_watch(path, modified)?;
                let outcome = if handle.is_some() {
                    SubscribeOutcome::Watching
                } else {
                    SubscribeOutcome::Degraded
                };
                entries.insert(
                    path.to_path_buf(),
                    WatchEntry {
                        handle,
                        subscribers: HashMap::new(),
                        last_modified: modified,
                    },
                );
                crate::log_event!("registry", "added", "{}", path.display());
                outcome
            }
        };

        if let Err(e) = channel.send(BroadcastMessage::Connected) {
            crate::debug_event!("registry", "connect failed", "{id}: {e}");
            self.teardown_if_empty(&mut entries, path);
            return Err(e);
        }

        if let Some(entry) = entries.get_mut(path) {
            entry.subscribers.insert(id, channel);
            crate::debug_event!(
                "registry",
                "subscribed",
                "{id} -> {} ({} total)",
                path.display(),
                entry.subscribers.len()
            );
        }

        Ok(outcome)
    }

    /// Remove a channel from a path. Returns whether it was subscribed.
    ///
    /// Unknown paths and channels are a no-op.
    pub fn unsubscribe(&self, path: &Path, id: ChannelId) -> bool {
        let mut entries = self.entries.lock();

        let removed = match entries.get_mut(path) {
            Some(entry) => match entry.subscribers.remove(&id) {
                Some(channel) => {
                    channel.close();
                    true
                }
                None => false,
            },
            None => false,
        };

        if removed {
            crate::debug_event!("registry", "unsubscribed", "{id} <- {}", path.display());
            self.teardown_if_empty(&mut entries, path);
        }

        removed
    }

    /// Push `reload` to every subscriber of `path`.
    ///
    /// Channels whose write fails are dropped after the fan-out; the rest
    /// still receive the message. Returns the number of live deliveries.
    pub fn notify(&self, path: &Path) -> usize {
        self.fan_out(path, None)
    }

    /// Like [`notify`](Self::notify), also recording the modification time
    /// that triggered it.
    pub fn notify_modified(&self, path: &Path, modified: SystemTime) -> usize {
        self.fan_out(path, Some(modified))
    }

    fn fan_out(&self, path: &Path, modified: Option<SystemTime>) -> usize {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(path) else {
            crate::debug_event!("registry", "no subscribers", "{}", path.display());
            return 0;
        };

        if modified.is_some() {
            entry.last_modified = modified;
        }

        let (delivered, dead) = deliver(&entry.subscribers, BroadcastMessage::Reload);
        for id in &dead {
            if let Some(channel) = entry.subscribers.remove(id) {
                crate::debug_event!("registry", "dropped dead channel", "{id}");
                channel.close();
            }
        }

        self.teardown_if_empty(&mut entries, path);
        delivered
    }

    /// Ping every open channel. Failed pings count as disconnects.
    pub fn keepalive(&self) -> usize {
        let mut entries = self.entries.lock();
        let mut delivered = 0;
        let mut emptied = Vec::new();

        for (path, entry) in entries.iter_mut() {
            let (ok, dead) = deliver(&entry.subscribers, BroadcastMessage::Keepalive);
            delivered += ok;
            for id in &dead {
                if let Some(channel) = entry.subscribers.remove(id) {
                    crate::debug_event!("registry", "keepalive failed", "{id}");
                    channel.close();
                }
            }
            if entry.subscribers.is_empty() {
                emptied.push(path.clone());
            }
        }

        for path in emptied {
            self.teardown_if_empty(&mut entries, &path);
        }

        delivered
    }

    /// Release every watch and channel.
    pub fn shutdown(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();

        for (path, entry) in entries.drain() {
            for (_, channel) in entry.subscribers {
                channel.close();
            }
            drop(entry.handle);
            self.sink.stopped(&path);
        }

        crate::log_event!("registry", "shutdown", "released {count} watches");
    }

    /// Number of watched files.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn subscriber_count(&self, path: &Path) -> usize {
        self.entries
            .lock()
            .get(path)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Whether `path` has a live OS watch.
    pub fn is_watching(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .get(path)
            .is_some_and(|entry| entry.handle.is_some())
    }

    /// Status of every entry, sorted by path.
    pub fn snapshot(&self) -> Vec<WatchStatus> {
        let entries = self.entries.lock();
        let mut statuses: Vec<WatchStatus> = entries
            .iter()
            .map(|(path, entry)| WatchStatus {
                path: path.clone(),
                subscribers: entry.subscribers.len(),
                watching: entry.handle.is_some(),
                last_modified: entry.last_modified,
            })
            .collect();
        statuses.sort_by(|a, b| a.path.cmp(&b.path));
        statuses
    }

    /// Start an OS watch. `Ok(None)` means degraded; only resource
    /// exhaustion is returned as an error.
    fn start_watch(
        &self,
        path: &Path,
        modified: Option<SystemTime>,
    ) -> Result<Option<Box<dyn WatchHandle>>, WatchError> {
        match self.backend.start(path, self.sink.clone()) {
            Ok(handle) => {
                self.sink.started(path, modified);
                crate::log_event!("registry", "watching", "{}", path.display());
                Ok(Some(handle))
            }
            Err(e @ WatchError::ResourceExhausted { .. }) => {
                tracing::error!("[registry] {e}");
                Err(e)
            }
            Err(e) => {
                tracing::warn!("[registry] {e}; live reload disabled until resubscribe");
                Ok(None)
            }
        }
    }

    fn detach_everywhere(&self, entries: &mut HashMap<PathBuf, WatchEntry>, id: ChannelId) {
        let previous: Vec<PathBuf> = entries
            .iter_mut()
            .filter_map(|(path, entry)| {
                entry.subscribers.remove(&id).map(|channel| {
                    channel.close();
                    path.clone()
                })
            })
            .collect();

        for path in previous {
            crate::debug_event!("registry", "replaced", "{id} left {}", path.display());
            self.teardown_if_empty(entries, &path);
        }
    }

    fn teardown_if_empty(&self, entries: &mut HashMap<PathBuf, WatchEntry>, path: &Path) {
        let empty = entries
            .get(path)
            .is_some_and(|entry| entry.subscribers.is_empty());
        if !empty {
            return;
        }

        if let Some(entry) = entries.remove(path) {
            // Dropping the handle stops the OS watch
            drop(entry.handle);
            self.sink.stopped(path);
            crate::log_event!("registry", "removed", "{}", path.display());
        }
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

/// A subscription that unsubscribes itself when dropped.
///
/// The HTTP layer keeps one alive inside each event stream, so a client
/// disconnect (the stream being dropped) removes the channel promptly.
#[derive(Debug)]
pub struct Subscription {
    registry: Arc<WatchRegistry>,
    path: PathBuf,
    id: ChannelId,
    outcome: SubscribeOutcome,
}

impl Subscription {
    /// Subscribe `channel` to `path` and tie the subscription's lifetime to
    /// the returned value.
    pub fn attach(
        registry: Arc<WatchRegistry>,
        path: PathBuf,
        channel: BroadcastChannel,
    ) -> Result<Self, WatchError> {
        let id = channel.id();
        let outcome = registry.subscribe(&path, channel)?;
        Ok(Self {
            registry,
            path,
            id,
            outcome,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel_id(&self) -> ChannelId {
        self.id
    }

    pub fn outcome(&self) -> SubscribeOutcome {
        self.outcome
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.path, self.id);
    }
}

fn deliver(
    subscribers: &HashMap<ChannelId, BroadcastChannel>,
    message: BroadcastMessage,
) -> (usize, Vec<ChannelId>) {
    let mut delivered = 0;
    let mut dead = Vec::new();

    for (id, channel) in subscribers {
        match channel.send(message) {
            Ok(Delivery::Sent | Delivery::Coalesced) => delivered += 1,
            Ok(Delivery::Skipped) => {}
            Err(_) => dead.push(*id),
        }
    }

    (delivered, dead)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::backend::WatchSignal;
    use crate::watcher::backend::test_support::{CountingBackend, FailMode};
    use tokio::sync::mpsc;

    fn registry() -> (WatchRegistry, CountingBackend, mpsc::Receiver<WatchSignal>) {
        let backend = CountingBackend::new();
        let (sink, rx) = SignalSink::channel(64);
        (
            WatchRegistry::new(Arc::new(backend.clone()), sink),
            backend,
            rx,
        )
    }

    #[test]
    fn test_subscribe_sends_connected_and_starts_one_watch() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/a.md");

        let (c1, mut rx1) = BroadcastChannel::open(8);
        let (c2, mut rx2) = BroadcastChannel::open(8);

        assert_eq!(registry.subscribe(path, c1).unwrap(), SubscribeOutcome::Watching);
        assert_eq!(registry.subscribe(path, c2).unwrap(), SubscribeOutcome::Watching);

        assert_eq!(rx1.try_recv().unwrap(), BroadcastMessage::Connected);
        assert_eq!(rx2.try_recv().unwrap(), BroadcastMessage::Connected);
        assert_eq!(backend.starts(), 1);
        assert_eq!(registry.subscriber_count(path), 2);
    }

    #[test]
    fn test_existence_invariant_over_sequence() {
        let (registry, backend, _rx) = registry();
        let a = Path::new("/docs/a.md");
        let b = Path::new("/docs/b.md");

        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for path in [a, a, b, a] {
            let (channel, rx) = BroadcastChannel::open(4);
            ids.push((path, channel.id()));
            receivers.push(rx);
            registry.subscribe(path, channel).unwrap();
            assert!(registry.contains(path));
        }

        // Remove in an interleaved order, checking presence == count > 0
        for (path, id) in [ids[1], ids[2], ids[0], ids[3]] {
            registry.unsubscribe(path, id);
            for p in [a, b] {
                assert_eq!(registry.contains(p), registry.subscriber_count(p) > 0);
            }
        }

        assert!(registry.is_empty());
        assert_eq!(backend.starts(), backend.stops());
        assert_eq!(backend.starts(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/a.md");
        let (channel, _rx1) = BroadcastChannel::open(4);
        let id = channel.id();

        // Never subscribed
        assert!(!registry.unsubscribe(path, id));

        registry.subscribe(path, channel).unwrap();
        assert!(registry.unsubscribe(path, id));
        assert!(!registry.unsubscribe(path, id));
        assert!(!registry.unsubscribe(Path::new("/nowhere.md"), id));

        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_fan_out_isolates_dead_channel() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/a.md");

        let (a, rx_a) = BroadcastChannel::open(4);
        let (b, mut rx_b) = BroadcastChannel::open(4);
        let a_id = a.id();
        registry.subscribe(path, a).unwrap();
        registry.subscribe(path, b).unwrap();

        drop(rx_a);
        assert_eq!(registry.notify(path), 1);

        assert_eq!(rx_b.try_recv().unwrap(), BroadcastMessage::Connected);
        assert_eq!(rx_b.try_recv().unwrap(), BroadcastMessage::Reload);
        assert_eq!(registry.subscriber_count(path), 1);
        assert!(!registry.unsubscribe(path, a_id));
        assert_eq!(backend.live(), 1);
    }

    #[test]
    fn test_notify_with_all_channels_dead_tears_down() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/a.md");
        let (a, rx_a) = BroadcastChannel::open(4);
        registry.subscribe(path, a).unwrap();

        drop(rx_a);
        assert_eq!(registry.notify(path), 0);
        assert!(!registry.contains(path));
        assert_eq!(backend.starts(), backend.stops());
    }

    #[test]
    fn test_notify_unknown_path_is_noop() {
        let (registry, _backend, _rx) = registry();
        assert_eq!(registry.notify(Path::new("/docs/none.md")), 0);
    }

    #[test]
    fn test_watch_failure_is_degraded_and_retried_on_resubscribe() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/locked.md");
        backend.set_fail(FailMode::StartFailed);

        let (a, mut rx_a) = BroadcastChannel::open(4);
        assert_eq!(registry.subscribe(path, a).unwrap(), SubscribeOutcome::Degraded);
        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Connected);
        assert!(registry.contains(path));
        assert!(!registry.is_watching(path));

        backend.set_fail(FailMode::None);
        let (b, _rx_b) = BroadcastChannel::open(4);
        assert_eq!(registry.subscribe(path, b).unwrap(), SubscribeOutcome::Watching);
        assert!(registry.is_watching(path));
        assert_eq!(backend.starts(), 1);
    }

    #[test]
    fn test_resource_exhaustion_records_nothing() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/a.md");
        backend.set_fail(FailMode::Exhausted);

        let (a, mut rx_a) = BroadcastChannel::open(4);
        assert!(matches!(
            registry.subscribe(path, a),
            Err(WatchError::ResourceExhausted { .. })
        ));
        assert!(!registry.contains(path));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_not_recorded() {
        let (registry, backend, _rx) = registry();
        let path = Path::new("/docs/a.md");
        let (a, rx_a) = BroadcastChannel::open(4);
        drop(rx_a);

        assert!(matches!(
            registry.subscribe(path, a),
            Err(WatchError::ChannelClosed)
        ));
        assert!(!registry.contains(path));
        assert_eq!(backend.starts(), backend.stops());
    }

    #[test]
    fn test_keepalive_pings_and_prunes() {
        let (registry, backend, _rx) = registry();
        let a_path = Path::new("/docs/a.md");
        let b_path = Path::new("/docs/b.md");

        let (a, mut rx_a) = BroadcastChannel::open(4);
        let (b, rx_b) = BroadcastChannel::open(4);
        registry.subscribe(a_path, a).unwrap();
        registry.subscribe(b_path, b).unwrap();
        drop(rx_b);

        assert_eq!(registry.keepalive(), 1);
        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Connected);
        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Keepalive);
        assert!(!registry.contains(b_path));
        assert_eq!(backend.live(), 1);
    }

    #[test]
    fn test_stalled_client_still_gets_reload() {
        let (registry, _backend, _rx) = registry();
        let path = Path::new("/docs/a.md");
        let (a, mut rx_a) = BroadcastChannel::open(2);
        registry.subscribe(path, a).unwrap();

        // The client reads nothing while pings pile up
        for _ in 0..5 {
            registry.keepalive();
        }
        assert_eq!(registry.notify(path), 1);
        assert_eq!(registry.notify(path), 1);

        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Connected);
        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Reload);
        assert!(rx_a.try_recv().is_err());
        assert!(registry.contains(path));
    }

    #[test]
    fn test_skipped_ping_is_not_counted() {
        let (registry, _backend, _rx) = registry();
        let path = Path::new("/docs/a.md");
        let (a, mut rx_a) = BroadcastChannel::open(2);
        registry.subscribe(path, a).unwrap();

        assert_eq!(registry.keepalive(), 0);
        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Connected);
        assert_eq!(registry.keepalive(), 1);
        assert_eq!(rx_a.try_recv().unwrap(), BroadcastMessage::Keepalive);
    }

    #[test]
    fn test_lifecycle_signals() {
        let (registry, _backend, mut signals) = registry();
        let path = Path::new("/docs/a.md");
        let (a, _rx_a) = BroadcastChannel::open(4);
        let id = a.id();

        registry.subscribe(path, a).unwrap();
        registry.unsubscribe(path, id);

        assert!(matches!(
            signals.try_recv().unwrap(),
            WatchSignal::Started { .. }
        ));
        assert_eq!(
            signals.try_recv().unwrap(),
            WatchSignal::Stopped(path.to_path_buf())
        );
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (registry, backend, _rx) = registry();
        let mut receivers = Vec::new();
        for name in ["/docs/a.md", "/docs/b.md", "/docs/c.md"] {
            let (channel, rx) = BroadcastChannel::open(4);
            receivers.push(rx);
            registry.subscribe(Path::new(name), channel).unwrap();
        }

        registry.shutdown();
        assert!(registry.is_empty());
        assert_eq!(backend.starts(), 3);
        assert_eq!(backend.stops(), 3);

        // Receivers see end-of-stream after draining `connected`
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), BroadcastMessage::Connected);
            assert!(matches!(
                rx.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            ));
        }
    }

    #[test]
    fn test_subscription_guard_unsubscribes_on_drop() {
        let (registry, backend, _rx) = registry();
        let registry = Arc::new(registry);
        let path = PathBuf::from("/docs/a.md");
        let (channel, _rx_c) = BroadcastChannel::open(4);

        let subscription = Subscription::attach(registry.clone(), path.clone(), channel).unwrap();
        assert_eq!(subscription.outcome(), SubscribeOutcome::Watching);
        assert!(registry.contains(&path));

        drop(subscription);
        assert!(!registry.contains(&path));
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_snapshot_reports_entries() {
        let (registry, backend, _rx) = registry();
        backend.set_fail(FailMode::StartFailed);
        let (a, _rx_a) = BroadcastChannel::open(4);
        registry.subscribe(Path::new("/docs/z.md"), a).unwrap();
        backend.set_fail(FailMode::None);
        let (b, _rx_b) = BroadcastChannel::open(4);
        registry.subscribe(Path::new("/docs/a.md"), b).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, PathBuf::from("/docs/a.md"));
        assert!(snapshot[0].watching);
        assert!(!snapshot[1].watching);
        assert_eq!(snapshot[1].subscribers, 1);
    }
}
