use std::{io, path::PathBuf, time::Duration};

use anyhow::Context;
use console::style;
use livetail_stream::{
    GrowingStore, IngestHandle, IngestOutcome, Ingestor, ServerOptions, start_server,
    types::{DEFAULT_CHUNK_SIZE, DEFAULT_INGEST_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE},
};
use tracing::{info, warn};

use crate::{
    network::{advertised_addr, view_url},
    qr::render_qr,
};

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct RunCommand {
    /// Path to the file to be served (a temporary file is used when omitted)
    #[arg(long, short = 'f', env = "LIVETAIL_FILE")]
    pub file: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "LIVETAIL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to run the server on (0 picks a free port)
    #[arg(long, short = 'p', env = "LIVETAIL_PORT", default_value = "0")]
    pub port: u16,

    /// Bytes read from the file per step of a response
    #[arg(long, env = "LIVETAIL_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Bytes buffered per response before they are sent
    #[arg(long, env = "LIVETAIL_WRITE_BUFFER_SIZE", default_value_t = DEFAULT_WRITE_BUFFER_SIZE)]
    pub write_buffer_size: usize,

    /// Bytes read from standard input per append
    #[arg(long, env = "LIVETAIL_INGEST_BUFFER_SIZE", default_value_t = DEFAULT_INGEST_BUFFER_SIZE)]
    pub ingest_buffer_size: usize,

    /// Seconds in-flight requests may run after a shutdown signal
    #[arg(long, env = "LIVETAIL_SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace_secs: u64,

    /// Serve the file as is, without reading standard input
    #[arg(long)]
    pub no_ingest: bool,
}

impl RunCommand {
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host.clone(),
            port: self.port,
            chunk_size: self.chunk_size,
            write_buffer_size: self.write_buffer_size,
            ingest_buffer_size: self.ingest_buffer_size,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            ..Default::default()
        }
    }

    pub async fn execute(&self) -> anyhow::Result<()> {
        let options = self.server_options();

        let store = GrowingStore::open(self.file.as_deref()).context("Error initializing file")?;

        let ingest = (!self.no_ingest).then(|| {
            Ingestor::new(store.clone(), options.ingest_buffer_size).spawn(tokio::io::stdin())
        });

        let server = start_server(store.clone(), options.clone())
            .await
            .context("Failed to start server")?;

        let url = view_url(advertised_addr(server.local_addr()));
        info!(url = %url, "Server started");

        println!();
        println!("{}", style("livetail").green());
        println!("{} {}", style("File").dim(), store.origin());
        println!("{} {}", style("View").dim(), style(&url).cyan());
        println!();
        match render_qr(&url) {
            Ok(code) => {
                println!("Scan the QR code below to open the viewer:");
                println!("{code}");
            }
            Err(e) => warn!(error = %e, "Failed to render QR code"),
        }
        println!("{}", style("Press Ctrl+C to stop").dim());
        println!();

        shutdown_signal()
            .await
            .context("Failed to listen for shutdown signals")?;
        info!("Shutdown signal received");

        let served = server.shutdown().await;

        if let Some(ingest) = ingest {
            stop_ingest(ingest, options.shutdown_grace).await;
        }

        store.close().context("Failed to close file")?;
        served.context("Server forced to shutdown")?;

        Ok(())
    }
}

async fn stop_ingest(ingest: IngestHandle, grace: Duration) {
    match ingest.shutdown(grace).await {
        Some(Ok(report)) => {
            let ended = match report.outcome {
                IngestOutcome::EndOfInput => "end of input",
                IngestOutcome::Cancelled => "shutdown",
            };
            info!(
                bytes = report.bytes,
                chunks = report.chunks,
                transient_errors = report.transient_errors,
                "Ingestion stopped by {ended}"
            );
        }
        Some(Err(e)) => warn!(error = %e, "Ingestion had failed"),
        None => warn!("Ingestion aborted"),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser, Debug)]
    struct TestOpts {
        #[clap(flatten)]
        run: RunCommand,
    }

    #[test]
    fn test_defaults() {
        let opts = TestOpts::try_parse_from(["livetail"]).unwrap();
        let options = opts.run.server_options();

        assert_eq!(opts.run.file, None);
        assert!(!opts.run.no_ingest);
        assert_eq!(options.host, "0.0.0.0");
        assert_eq!(options.port, 0);
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(options.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_flags() {
        let opts = TestOpts::try_parse_from([
            "livetail",
            "--file",
            "/tmp/build.log",
            "--port",
            "8080",
            "--shutdown-grace-secs",
            "1",
            "--no-ingest",
        ])
        .unwrap();
        let options = opts.run.server_options();

        assert_eq!(opts.run.file, Some(PathBuf::from("/tmp/build.log")));
        assert!(opts.run.no_ingest);
        assert_eq!(options.port, 8080);
        assert_eq!(options.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(TestOpts::try_parse_from(["livetail", "--port", "-1"]).is_err());
    }
}
