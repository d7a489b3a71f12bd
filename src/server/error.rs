//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::watcher::{PathError, WatchError};

/// Errors surfaced to HTTP clients.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Missing `path` query parameter")]
    MissingPath,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::MissingPath | ServeError::Path(PathError::Empty) => {
                StatusCode::BAD_REQUEST
            }
            ServeError::Path(PathError::OutsideRoot { .. }) => StatusCode::FORBIDDEN,
            ServeError::Path(PathError::Unresolvable { .. } | PathError::NotAFile { .. }) => {
                StatusCode::NOT_FOUND
            }
            ServeError::Watch(WatchError::StaleRead { .. }) => StatusCode::NOT_FOUND,
            ServeError::Watch(WatchError::ResourceExhausted { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServeError::Watch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("[http] {self}");
        } else {
            crate::debug_event!("http", "rejected", "{status}: {self}");
        }
        (status, self.to_string()).into_response()
    }
}
