//! lineprime: a line-oriented TCP text analysis server
//!
//! Each connection sends one line of text. The line is analyzed on a
//! fixed-size pool of worker threads (last character, how often it appears,
//! whether that count is prime), the result is written back and the
//! connection is closed. Every answered request is appended to an audit log.
//!
//! Features:
//! - Worker pool sized to the host's parallelism with round-robin dispatch
//! - One-shot reply channel per request, optional reply timeout
//! - Asynchronous, append-only audit log
//! - Configuration via CLI arguments, environment variables or TOML file

mod analysis;
mod audit;
mod config;
mod error;
mod pool;
mod protocol;
mod server;
mod session;

use audit::AuditLog;
use config::Config;
use pool::WorkerPool;
use server::{Server, ServerContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        workers = config.workers,
        max_connections = config.max_connections,
        max_line_bytes = config.max_line_bytes,
        request_timeout_ms = config.request_timeout.map(|t| t.as_millis() as u64),
        "Starting lineprime server"
    );
    info!(path = %config.log_file.display(), "Audit log location");

    let pool = WorkerPool::new(config.workers)?;
    let (audit, _writer) = AuditLog::spawn(config.log_file.clone(), config.utc_offset);

    let context = ServerContext {
        pool,
        audit,
        request_timeout: config.request_timeout,
        max_line_bytes: config.max_line_bytes,
    };

    let server = Server::new(config, context);
    server.run().await?;
    Ok(())
}
