//! Error types for path validation and the watch registry.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watch and channel operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot watch path {path}: {reason}")]
    WatchStartFailed { path: PathBuf, reason: String },

    /// The OS refused to hand out another watch (e.g. inotify limit).
    #[error("Watch resources exhausted for {path}: {reason}")]
    ResourceExhausted { path: PathBuf, reason: String },

    /// The file vanished between a change notification and the re-read.
    #[error("Cannot read {path}: {reason}")]
    StaleRead { path: PathBuf, reason: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Failed to load config: {reason}")]
    ConfigError { reason: String },
}

impl WatchError {
    /// Classify a `notify` failure raised while watching `path`.
    pub fn from_notify(path: impl Into<PathBuf>, e: notify::Error) -> Self {
        let path = path.into();
        match e.kind {
            notify::ErrorKind::MaxFilesWatch => WatchError::ResourceExhausted {
                path,
                reason: e.to_string(),
            },
            _ => WatchError::WatchStartFailed {
                path,
                reason: e.to_string(),
            },
        }
    }
}

/// Reasons a requested path is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Empty path")]
    Empty,

    #[error("Cannot resolve {path}: {reason}")]
    Unresolvable { path: PathBuf, reason: String },

    #[error("{path} is outside of {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("{path} is not a regular file")]
    NotAFile { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_limit_maps_to_resource_exhausted() {
        let err = WatchError::from_notify(
            "/tmp/a.md",
            notify::Error::new(notify::ErrorKind::MaxFilesWatch),
        );
        assert!(matches!(err, WatchError::ResourceExhausted { .. }));

        let err = WatchError::from_notify("/tmp/a.md", notify::Error::path_not_found());
        assert!(matches!(err, WatchError::WatchStartFailed { .. }));
    }
}
