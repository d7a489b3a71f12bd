//! Per-subscriber push channels.
//!
//! A [`BroadcastChannel`] is the sending half of a bounded queue whose
//! receiving half is turned into an SSE response by the HTTP layer. The
//! registry owns the sending half; dropping it ends the response stream.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::watcher::WatchError;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Messages pushed to a browser session. Tag only: the client always
/// re-fetches the file instead of receiving a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMessage {
    Connected,
    Reload,
    Keepalive,
}

impl BroadcastMessage {
    /// The literal token carried by data frames.
    pub fn token(&self) -> &'static str {
        match self {
            BroadcastMessage::Connected => "connected",
            BroadcastMessage::Reload => "reload",
            BroadcastMessage::Keepalive => "keepalive",
        }
    }

    /// Keepalives are sent as SSE comments and ignored by `EventSource`.
    pub fn is_comment(&self) -> bool {
        matches!(self, BroadcastMessage::Keepalive)
    }

    /// Exact bytes of this message on the wire. Keepalive is an empty
    /// comment.
    pub fn frame(&self) -> String {
        if self.is_comment() {
            ":\n\n".to_string()
        } else {
            format!("data: {}\n\n", self.token())
        }
    }
}

/// Result of a successful [`BroadcastChannel::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the client.
    Sent,
    /// Reload not queued because an unread `reload` already fills the queue.
    Coalesced,
    /// Not queued: only the slot kept for `reload` was left.
    Skipped,
}

/// Sending half of a subscriber's push connection.
///
/// The last free slot of the queue is kept for `reload`. Other messages are
/// skipped rather than take it, so whenever the queue is full the message
/// that filled it is an unread `reload` and a further one can be coalesced.
/// Every send happens under the registry lock, so the capacity check and the
/// write cannot interleave with another sender.
#[derive(Debug)]
pub struct BroadcastChannel {
    id: ChannelId,
    tx: mpsc::Sender<BroadcastMessage>,
}

impl BroadcastChannel {
    /// Open a channel with room for `capacity` undelivered messages (at
    /// least two: one for `connected`, one kept for `reload`).
    pub fn open(capacity: usize) -> (Self, mpsc::Receiver<BroadcastMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(2));
        (
            Self {
                id: ChannelId::next(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Write a message without blocking.
    ///
    /// Fails only when the receiving side is gone, which callers treat as a
    /// client disconnect.
    pub fn send(&self, message: BroadcastMessage) -> Result<Delivery, WatchError> {
        if self.tx.is_closed() {
            return Err(WatchError::ChannelClosed);
        }

        if message != BroadcastMessage::Reload && self.tx.capacity() <= 1 {
            crate::debug_event!("channel", "skipped", "{} {}", self.id, message.token());
            return Ok(Delivery::Skipped);
        }

        match self.tx.try_send(message) {
            Ok(()) => Ok(Delivery::Sent),
            Err(TrySendError::Full(_)) => {
                crate::debug_event!("channel", "coalesced", "{} {}", self.id, message.token());
                Ok(Delivery::Coalesced)
            }
            Err(TrySendError::Closed(_)) => Err(WatchError::ChannelClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Release the channel; the receiving stream ends once drained.
    pub fn close(self) {
        crate::debug_event!("channel", "closed", "{}", self.id);
    }
}
