//! quarantine-server: remote file signature scan and quarantine
//!
//! A peer opens a TCP connection, sends one request and receives one
//! response:
//! - `commands` describes the available commands
//! - `CheckLocalFile` reports every offset of a hex signature in a file
//! - `QuarantineLocalFile` moves a file into the quarantine directory
//!
//! Features:
//! - Admission control: over the handler ceiling, connections get a busy error
//! - Graceful shutdown on Ctrl+C, draining in-flight requests
//! - Configuration via CLI arguments or a TOML / JSON file

mod config;
mod dispatcher;
mod handler;
mod protocol;
mod quarantine;
mod registry;
mod scanner;
mod server;

use config::Config;
use server::Server;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_handlers = config.max_handlers,
        workers = ?config.workers,
        quarantine_dir = %config.quarantine_dir.display(),
        "Starting quarantine-server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    server.run(shutdown).await?;
    Ok(())
}
