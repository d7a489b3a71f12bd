//! Push channels to browser sessions.
//!
//! Each session gets a [`BroadcastChannel`]; the registry writes
//! [`BroadcastMessage`]s into it and the [`KeepaliveTicker`] pings it.

mod channel;
mod keepalive;

pub use channel::{BroadcastChannel, BroadcastMessage, ChannelId, Delivery};
pub use keepalive::{DEFAULT_KEEPALIVE_SECS, KeepaliveTicker};
