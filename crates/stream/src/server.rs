//! HTTP server exposing the store to concurrent readers.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use livetail_viewer::{VIEW_PREFIX, serve_viewer};
use serde::Deserialize;
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, trace, warn};

use crate::{
    session::{SessionError, SessionReader},
    stats::StatsCollector,
    store::{GrowingStore, StoreError},
    types::{CONTENT_LENGTH_HEADER, ServerOptions, parse_offset},
};

/// How long cancelled sessions get to unwind once the grace period is over.
const SESSION_DRAIN: Duration = Duration::from_secs(1);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<GrowingStore>,
    pub options: ServerOptions,
    pub stats: Arc<StatsCollector>,
    /// Parent token of every streaming session
    pub sessions: CancellationToken,
}

impl AppState {
    pub fn new(store: Arc<GrowingStore>, options: ServerOptions) -> Self {
        let stats = StatsCollector::new(options.probe_addr, options.probe_timeout);
        Self {
            store,
            options,
            stats: Arc::new(stats),
            sessions: CancellationToken::new(),
        }
    }
}

/// Query parameters for `GET /content`.
#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub offset: Option<String>,
}

/// Failures of a `/content` request before streaming starts.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid offset")]
    InvalidOffset,

    #[error("Offset {offset} is beyond the end of the content ({size} bytes)")]
    OffsetBeyondEnd { offset: u64, size: u64 },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Error seeking file: {0}")]
    Store(#[from] StoreError),
}

impl From<SessionError> for ContentError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::OffsetOutOfRange { offset, size } => {
                ContentError::OffsetBeyondEnd { offset, size }
            }
            SessionError::Cancelled => ContentError::ShuttingDown,
            SessionError::Store(e) => ContentError::Store(e),
        }
    }
}

impl IntoResponse for ContentError {
    fn into_response(self) -> Response {
        let status = match &self {
            ContentError::InvalidOffset | ContentError::OffsetBeyondEnd { .. } => {
                StatusCode::BAD_REQUEST
            }
            ContentError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ContentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(error = %self, "Failed to start content stream");
        } else {
            debug!(error = %self, "Rejected content request");
        }

        (status, self.to_string()).into_response()
    }
}

/// Create the router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/", get(|| async { Redirect::temporary(VIEW_PREFIX) }))
        .route("/content", get(handle_content))
        .route("/stats", get(handle_stats))
        .route(VIEW_PREFIX, get(serve_viewer))
        .route("/view/{*path}", get(serve_viewer))
        .layer(cors)
        .with_state(state)
}

/// GET /content - Stream the store from `offset` to its current end
async fn handle_content(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
) -> Result<Response, ContentError> {
    let offset = query
        .offset
        .as_deref()
        .and_then(parse_offset)
        .ok_or(ContentError::InvalidOffset)?;

    if state.sessions.is_cancelled() {
        return Err(ContentError::ShuttingDown);
    }

    let size = state.store.size();
    let cancel = state.sessions.child_token();
    let session = SessionReader::new(state.store.clone(), offset, cancel.clone())?;
    debug!(offset, size, "Starting content stream");

    let body = Body::from_stream(content_stream(
        session,
        cancel,
        state.options.chunk_size,
        state.options.write_buffer_size,
    ));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
            (
                HeaderName::from_static(CONTENT_LENGTH_HEADER),
                HeaderValue::from(size),
            ),
        ],
        body,
    )
        .into_response())
}

/// Drain a session into response chunks.
///
/// Reads `chunk_size` bytes at a time on the blocking pool and hands them
/// out once `write_buffer_size` bytes are pending. Ends after flushing when
/// the session catches up, and immediately when `cancel` fires. Dropping the
/// stream (the client went away) cancels `cancel`.
fn content_stream(
    session: SessionReader,
    cancel: CancellationToken,
    chunk_size: usize,
    write_buffer_size: usize,
) -> impl Stream<Item = Result<Bytes, io::Error>> {
    let guard = cancel.drop_guard();
    let limit = write_buffer_size.max(1);

    async_stream::stream! {
        let _guard = guard;
        let mut session = session;
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut pending = BytesMut::with_capacity(limit);

        loop {
            if session.is_cancelled() {
                debug!(offset = session.offset(), emitted = session.emitted(), "Content stream cancelled");
                break;
            }

            let filled = tokio::task::spawn_blocking(move || {
                let result = fill_pending(&mut session, &mut chunk, &mut pending, limit);
                (session, chunk, pending, result)
            })
            .await;

            let (returned, buffer, mut filled_pending, result) = match filled {
                Ok(filled) => filled,
                Err(e) => {
                    warn!(error = %e, "Content read task failed");
                    yield Err(io::Error::other(e));
                    break;
                }
            };
            session = returned;
            chunk = buffer;

            match result {
                Ok(caught_up) => {
                    if !filled_pending.is_empty() {
                        trace!(bytes = filled_pending.len(), offset = session.offset(), "Flushing content");
                        yield Ok(filled_pending.split().freeze());
                    }
                    if caught_up {
                        debug!(
                            start = session.start(),
                            offset = session.offset(),
                            emitted = session.emitted(),
                            "Content stream caught up"
                        );
                        break;
                    }
                }
                Err(SessionError::Cancelled) => {
                    debug!(offset = session.offset(), "Content stream cancelled");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, offset = session.offset(), "Error reading file");
                    yield Err(io::Error::other(e));
                    break;
                }
            }
            pending = filled_pending;
        }
    }
}

/// Read chunks into `pending` until it holds `limit` bytes or the session
/// catches up. Returns whether it caught up.
///
/// Blocks on the store's lock for one chunk at a time.
fn fill_pending(
    session: &mut SessionReader,
    chunk: &mut [u8],
    pending: &mut BytesMut,
    limit: usize,
) -> Result<bool, SessionError> {
    while pending.len() < limit {
        let progress = session.next(chunk)?;
        if progress.done {
            return Ok(true);
        }
        pending.extend_from_slice(&chunk[..progress.read]);
    }
    Ok(false)
}

/// GET /stats - Host resource usage and connectivity
async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.collect().await)
}

/// Error types for the server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("Server error: {0}")]
    Serve(#[source] io::Error),

    #[error("Server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A running HTTP server.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    sessions: CancellationToken,
    grace: Duration,
    task: JoinHandle<io::Result<()>>,
}

impl Server {
    /// Bind to the configured host and port and start serving.
    pub async fn bind(state: AppState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(state.options.bind_addr())
            .await
            .map_err(ServerError::Bind)?;
        Self::serve(listener, state)
    }

    /// Start serving on an already bound listener.
    pub fn serve(listener: TcpListener, state: AppState) -> Result<Self, ServerError> {
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;
        let shutdown = CancellationToken::new();
        let sessions = state.sessions.clone();
        let grace = state.options.shutdown_grace;

        let router = create_router(state);
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!(addr = %local_addr, "Server started");

        Ok(Self {
            local_addr,
            shutdown,
            sessions,
            grace,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Requests still running after the grace period have their sessions
    /// cancelled; the server task is aborted if they still do not finish.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        info!("Shutting down server...");
        self.shutdown.cancel();

        let joined = match timeout(self.grace, &mut self.task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "In-flight requests still running, cancelling sessions"
                );
                self.sessions.cancel();
                match timeout(SESSION_DRAIN, &mut self.task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("Server did not stop, aborting");
                        self.task.abort();
                        return Ok(());
                    }
                }
            }
        };

        joined?.map_err(ServerError::Serve)?;
        info!("Server gracefully stopped");
        Ok(())
    }
}

/// Bind a server for `store` with the given options.
pub async fn start_server(
    store: Arc<GrowingStore>,
    options: ServerOptions,
) -> Result<Server, ServerError> {
    Server::bind(AppState::new(store, options)).await
}
