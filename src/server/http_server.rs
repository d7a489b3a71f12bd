//! HTTP server exposing the push channel and file content.
//!
//! Routes:
//! - `GET /api/events?path=..`: SSE stream (`connected`, `reload`, keepalive)
//! - `GET /api/file?path=..`: current file content as text
//! - `GET /api/status`: watched files and subscriber counts
//! - `GET /health`
//!
//! `path` is URL-decoded once by the query extractor and then validated. When
//! it is omitted the server's default file is used.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{BroadcastChannel, BroadcastMessage, KeepaliveTicker};
use crate::config::Settings;
use crate::watcher::{Subscription, WatchDispatcher, WatchError, WatchRegistry, path_guard};

use super::error::ServeError;

/// Shared state for all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    registry: Arc<WatchRegistry>,
    root: Option<PathBuf>,
    default_file: Option<PathBuf>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(
        registry: Arc<WatchRegistry>,
        root: Option<PathBuf>,
        default_file: Option<PathBuf>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            registry,
            root,
            default_file,
            channel_capacity,
        }
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Validate the requested path (or fall back to the default file) and
    /// confirm it names an existing regular file.
    fn resolve(&self, requested: Option<&str>) -> Result<PathBuf, ServeError> {
        let raw = match requested {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.default_file.clone().ok_or(ServeError::MissingPath)?,
        };

        let canonical = path_guard::validate(&raw, self.root.as_deref())?;
        path_guard::ensure_regular_file(&canonical)?;
        Ok(canonical)
    }
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    path: Option<String>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", get(events_handler))
        .route("/api/file", get(file_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServeError> {
    let path = state.resolve(query.path.as_deref())?;

    let (channel, rx) = BroadcastChannel::open(state.channel_capacity);
    let subscription = Subscription::attach(state.registry.clone(), path, channel)?;
    crate::log_event!(
        "http",
        "subscribed",
        "{} {}",
        subscription.channel_id(),
        subscription.path().display()
    );

    // The subscription lives inside the stream; when the client goes away
    // axum drops the stream and the channel is unsubscribed
    let stream = ReceiverStream::new(rx).map(move |message| {
        let _held = &subscription;
        Ok(to_event(message))
    });

    Ok(Sse::new(stream))
}

fn to_event(message: BroadcastMessage) -> Event {
    if message.is_comment() {
        Event::DEFAULT_KEEP_ALIVE
    } else {
        Event::default().data(message.token())
    }
}

async fn file_handler(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ServeError> {
    let path = state.resolve(query.path.as_deref())?;
    let content = read_document(&path).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        content,
    ))
}

/// Read the current text of a watched file.
pub async fn read_document(path: &Path) -> Result<String, WatchError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| WatchError::StaleRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let files: Vec<serde_json::Value> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|status| {
            serde_json::json!({
                "path": status.path.display().to_string(),
                "subscribers": status.subscribers,
                "watching": status.watching,
                "last_modified": status
                    .last_modified
                    .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
            })
        })
        .collect();

    Json(serde_json::json!({
        "count": files.len(),
        "files": files,
    }))
}

/// Run the live-reload server until Ctrl-C or SIGTERM.
///
/// `files` must already be validated; the first one is served when a request
/// carries no `path`.
pub async fn serve_http(settings: Settings, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let bind = settings.server.bind.clone();
    crate::log_event!("http", "starting", "{bind}");

    let dispatcher = WatchDispatcher::builder()
        .debounce_ms(settings.watch.debounce_ms)
        .signal_capacity(settings.watch.signal_capacity)
        .build()?;
    let registry = dispatcher.registry();

    let ct = CancellationToken::new();

    tokio::spawn(dispatcher.run(ct.child_token()));

    let ticker = KeepaliveTicker::new(
        registry.clone(),
        Duration::from_secs(settings.watch.keepalive_secs.max(1)),
    );
    tokio::spawn(ticker.run(ct.child_token()));

    let state = AppState::new(
        registry.clone(),
        settings.root.clone(),
        files.first().cloned(),
        settings.watch.channel_capacity,
    );

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    let local = listener.local_addr()?;
    crate::log_event!("http", "listening", "http://{local}");
    for file in &files {
        crate::log_event!("http", "serving", "{}", file.display());
    }
    if let Some(root) = &settings.root {
        crate::log_event!("http", "confined to", "{}", root.display());
    }

    serve_until(listener, state, ct, shutdown_signal()).await?;
    crate::log_event!("http", "stopped");
    Ok(())
}

/// Serve until `shutdown` resolves or the server fails, then cancel `ct` and
/// release every watch in the state's registry.
pub async fn serve_until<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    ct: CancellationToken,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let shutdown_registry = registry.clone();
    let shutdown_ct = ct.clone();

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            crate::log_event!("http", "shutting down");
            shutdown_ct.cancel();
            // Ends every open event stream so graceful shutdown can finish
            shutdown_registry.shutdown();
        })
        .await;

    // Nothing may outlive the server holding an OS watch, even on error
    ct.cancel();
    registry.shutdown();
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[http] failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("[http] failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
