//! Periodic keepalive pings for every open channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::watcher::WatchRegistry;

/// Default interval between pings.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Pings every subscribed channel on a fixed interval so idle connections are
/// not cut by proxies. A failed ping removes the channel like a disconnect.
#[derive(Debug)]
pub struct KeepaliveTicker {
    registry: Arc<WatchRegistry>,
    period: Duration,
}

impl KeepaliveTicker {
    pub fn new(registry: Arc<WatchRegistry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; channels just got `connected`
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::debug_event!("keepalive", "stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let pinged = self.registry.keepalive();
                    tracing::trace!("[keepalive] pinged {pinged} channels");
                }
            }
        }
    }
}
