//! livetail server
//!
//! Serves one continuously growing file to many concurrent HTTP readers. A
//! single ingestor appends bytes read from an input stream; every reader
//! streams forward from its own offset.
//!
//! # Features
//!
//! - **Growing store**: append-only file with positional reads, so readers at
//!   different offsets never interfere
//! - **Late joiners**: start reading at any offset up to the current size
//! - **Ingestion**: a tracked task copies standard input (or any `AsyncRead`)
//!   into the store in 1 MiB steps
//! - **Cancellation**: a disconnected client's session stops at its next read
//! - **Graceful shutdown**: in-flight reads get a grace period before they
//!   are cancelled
//!
//! # Example
//!
//! ```rust,no_run
//! use livetail_stream::{GrowingStore, Ingestor, ServerOptions, start_server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ServerOptions::default();
//!     let store = GrowingStore::open(None)?;
//!
//!     let ingest = Ingestor::new(store.clone(), options.ingest_buffer_size)
//!         .spawn(tokio::io::stdin());
//!     let server = start_server(store.clone(), options.clone()).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     ingest.shutdown(options.shutdown_grace).await;
//!     store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Protocol
//!
//! ## Reading
//!
//! ```text
//! GET /content?offset=6 HTTP/1.1
//!
//! Response: 200 OK
//! Content-Type: text/plain
//! X-Content-Length: 11
//!
//! world
//! ```
//!
//! The response ends once the reader has caught up with the store. Clients
//! follow the file by issuing a new request from the offset they reached.
//! Missing, negative or non-numeric offsets, and offsets past the end, are
//! answered with `400 Bad Request`.
//!
//! ## Viewer and statistics
//!
//! `GET /view` serves a browser page that follows the file. `GET /stats`
//! returns `{"memory": "41.20%", "cpu": "3.10%", "internet": "Connected"}`.

pub mod ingest;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use ingest::{IngestError, IngestHandle, IngestOutcome, IngestReport, Ingestor};
pub use server::{AppState, ContentError, Server, ServerError, create_router, start_server};
pub use session::{SessionError, SessionReader};
pub use stats::{Connectivity, StatsCollector, SystemStats};
pub use store::{GrowingStore, StoreError};
pub use types::{ReadProgress, ServerOptions, StoreOrigin};
