//! HTTP surface: SSE event stream, file content and status.

mod error;
pub mod http_server;

pub use error::ServeError;
pub use http_server::{AppState, read_document, router, serve_http, serve_until};
