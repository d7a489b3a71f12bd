//! Per-file watch registry with debounced change fan-out.
//!
//! # Architecture
//!
//! ```text
//! subscribe ──> path_guard::validate ──> WatchRegistry ──> WatchBackend
//!                                            ^                 │ (one OS watch per file)
//!                                            │                 v
//!                      notify_modified  WatchDispatcher <── SignalSink
//!                                            │
//!                                        Debouncer
//! ```

pub(crate) mod backend;
mod debouncer;
mod dispatcher;
mod error;
pub mod path_guard;
mod registry;

pub use backend::{NotifyBackend, SignalSink, WatchBackend, WatchHandle, WatchSignal};
pub use debouncer::{DEFAULT_DEBOUNCE_MS, Debouncer};
pub use dispatcher::{DEFAULT_SIGNAL_CAPACITY, WatchDispatcher, WatchDispatcherBuilder};
pub use error::{PathError, WatchError};
pub use registry::{SubscribeOutcome, Subscription, WatchRegistry, WatchStatus};
