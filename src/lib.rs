//! Live reload for local text files.
//!
//! Browser sessions subscribe to a file over Server-Sent Events and receive a
//! `reload` message whenever the file's content changes on disk. One OS watch
//! is kept per file no matter how many sessions are subscribed.

pub mod logging;

pub mod broadcast;
pub mod cli;
pub mod config;
#[cfg(feature = "http-server")]
pub mod server;
pub mod watcher;

pub use broadcast::{BroadcastChannel, BroadcastMessage, ChannelId, KeepaliveTicker};
pub use config::Settings;
pub use watcher::{
    PathError, SubscribeOutcome, Subscription, WatchDispatcher, WatchError, WatchRegistry,
};
