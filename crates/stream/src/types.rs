//! Core types for the livetail server.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::Serialize;

/// Header carrying the store size observed when a `/content` request started.
pub const CONTENT_LENGTH_HEADER: &str = "x-content-length";

/// Default size of a single positional read issued by a session.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// Default size of the per-response write buffer.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Default size of the ingestion buffer (1 MiB).
///
/// Bounds the delay between bytes arriving on the input and becoming
/// visible to readers.
pub const DEFAULT_INGEST_BUFFER_SIZE: usize = 1024 * 1024;

/// Where the bytes of a store live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreOrigin {
    /// A file path given by the user. Survives the process.
    Named { path: PathBuf },
    /// A temporary file created for this run. Removed on close.
    Ephemeral { path: PathBuf },
}

impl StoreOrigin {
    /// Filesystem path of the backing file.
    pub fn path(&self) -> &PathBuf {
        match self {
            StoreOrigin::Named { path } | StoreOrigin::Ephemeral { path } => path,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, StoreOrigin::Ephemeral { .. })
    }
}

impl std::fmt::Display for StoreOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreOrigin::Named { path } => write!(f, "{}", path.display()),
            StoreOrigin::Ephemeral { path } => write!(f, "{} (temporary)", path.display()),
        }
    }
}

/// Progress reported by a single session read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    /// Bytes copied into the caller's buffer
    pub read: usize,
    /// Whether the session has caught up with the store's current size
    pub done: bool,
}

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 for auto-assign)
    pub port: u16,
    /// Bytes requested from the store per session read
    pub chunk_size: usize,
    /// Bytes buffered per response before they are handed to the client
    pub write_buffer_size: usize,
    /// Bytes read from the input per ingestion step
    pub ingest_buffer_size: usize,
    /// How long in-flight requests may keep running after shutdown starts
    pub shutdown_grace: Duration,
    /// Address dialed to decide whether the host has connectivity
    pub probe_addr: SocketAddr,
    /// How long the connectivity probe may take
    pub probe_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            ingest_buffer_size: DEFAULT_INGEST_BUFFER_SIZE,
            shutdown_grace: Duration::from_secs(5),
            probe_addr: SocketAddr::from(([8, 8, 8, 8], 53)),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl ServerOptions {
    /// Address string the listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a raw `offset` query value.
///
/// Only non-negative base-10 integers are accepted.
pub fn parse_offset(raw: &str) -> Option<u64> {
    let value: i64 = raw.parse().ok()?;
    u64::try_from(value).ok()
}
