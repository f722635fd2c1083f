use std::{path::Path, process};

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod network;
mod qr;
mod run;

#[derive(Parser, Debug)]
#[clap(author, version, about = "livetail - share a growing file with any browser on the network", long_about = None)]
struct Opts {
    #[clap(flatten)]
    run: run::RunCommand,
}

#[tokio::main]
async fn main() {
    // Load environment variables before parsing so they can feed options
    load_env_file(Path::new("."));

    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    init_tracing();

    // Exit explicitly: a stdin read still blocked in the runtime's blocking
    // pool would otherwise keep the process alive.
    match opts.run.execute().await {
        Ok(()) => process::exit(0),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

/// Filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "info,livetail_stream=debug";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load environment variables from a .env file in `dir`
fn load_env_file(dir: &Path) {
    let env_file_path = dir.join(".env");

    match dotenvy::from_path(&env_file_path) {
        Ok(_) => {
            eprintln!("✓ Loaded environment from {}", env_file_path.display());
        }
        Err(e) if e.not_found() => {
            // .env file not found is fine, just continue silently
        }
        Err(e) => {
            eprintln!(
                "Warning: Failed to load .env file at {}: {}",
                env_file_path.display(),
                e
            );
        }
    }
}
