//! Ingestion of an external byte source into the store.
//!
//! A single task owns the input and is the only writer of the store, so
//! appends are naturally linearized.

use std::{io, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::{GrowingStore, StoreError};

/// Pause after a transient input error before reading again.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

/// Error types that end ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read input: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to store input: {0}")]
    Store(#[from] StoreError),

    #[error("Ingestion task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How an ingestion run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestOutcome {
    #[default]
    EndOfInput,
    Cancelled,
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Bytes appended to the store
    pub bytes: u64,
    /// Number of appends
    pub chunks: u64,
    /// Recoverable read errors that were skipped
    pub transient_errors: u64,
    pub outcome: IngestOutcome,
}

/// Copies an input stream into a [`GrowingStore`].
pub struct Ingestor {
    store: Arc<GrowingStore>,
    buffer_size: usize,
}

impl Ingestor {
    pub fn new(store: Arc<GrowingStore>, buffer_size: usize) -> Self {
        Self {
            store,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Pump `source` into the store until end of input, a fatal error, or
    /// cancellation.
    ///
    /// Transient read errors are logged and skipped. A failed append is
    /// fatal; the store keeps every byte appended before it.
    pub async fn run<R>(
        &self,
        mut source: R,
        cancel: CancellationToken,
    ) -> Result<IngestReport, IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];
        let mut report = IngestReport::default();

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(bytes = report.bytes, "Ingestion cancelled");
                    report.outcome = IngestOutcome::Cancelled;
                    return Ok(report);
                }
                read = source.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    info!(
                        bytes = report.bytes,
                        chunks = report.chunks,
                        "End of input reached"
                    );
                    report.outcome = IngestOutcome::EndOfInput;
                    return Ok(report);
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    let store = self.store.clone();
                    let size = tokio::task::spawn_blocking(move || store.append(&chunk))
                        .await?
                        .inspect_err(|e| error!(error = %e, "Failed to append input"))?;

                    report.bytes += n as u64;
                    report.chunks += 1;
                    debug!(bytes = n, size, "Ingested chunk");
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Transient error reading input");
                    report.transient_errors += 1;
                    tokio::time::sleep(TRANSIENT_BACKOFF).await;
                }
                Err(e) => {
                    error!(error = %e, "Fatal error reading input");
                    return Err(IngestError::Read(e));
                }
            }
        }
    }

    /// Run the ingestor on its own task.
    pub fn spawn<R>(self, source: R) -> IngestHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(source, token).await });

        IngestHandle { cancel, task }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// A running ingestion task.
#[derive(Debug)]
pub struct IngestHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<IngestReport, IngestError>>,
}

impl IngestHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end on its own.
    pub async fn join(self) -> Result<IngestReport, IngestError> {
        self.task.await?
    }

    /// Cancel the task and wait for it for at most `grace`.
    ///
    /// Returns `None` if the task had to be aborted.
    pub async fn shutdown(mut self, grace: Duration) -> Option<Result<IngestReport, IngestError>> {
        self.cancel.cancel();

        match timeout(grace, &mut self.task).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => Some(Err(e.into())),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Ingestion did not stop in time, aborting"
                );
                self.task.abort();
                None
            }
        }
    }
}
