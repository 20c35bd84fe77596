//! respkv: a Redis-compatible key-value server
//!
//! Speaks the RESP wire protocol over TCP and supports:
//! - PING, ECHO, GET, SET (with optional expiry in seconds, EX or PX)
//! - Lazy key expiration, checked when a key is read
//! - One task per connection over a shared, sharded keyspace
//! - Configuration via CLI arguments or TOML file

mod clock;
mod config;
mod connection;
mod protocols;
mod server;
mod storage;

use config::Config;
use server::Server;
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
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
        listen = %config.listen,
        workers = ?config.workers,
        max_connections = config.max_connections,
        "Starting respkv server"
    );

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        runtime.worker_threads(workers);
    }
    runtime.enable_all().build()?.block_on(serve(config))
}

/// Create the shared storage, bind the listener and accept forever
async fn serve(config: Config) -> Result<(), BoxError> {
    let storage = Storage::new();
    let server = Server::bind(&config, storage)?;
    server.run().await
}
