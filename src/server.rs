//! TCP listener for the line analysis service.
//!
//! Accepts connections and runs one [`Session`] per connection. All sessions
//! share the process-wide worker pool and audit log through an
//! `Arc<ServerContext>`; nothing else is shared between connections.

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::is_disconnect;
use crate::pool::WorkerPool;
use crate::session::Session;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// Shared, read-only state handed to every connection.
pub struct ServerContext {
    pub pool: WorkerPool,
    pub audit: AuditLog,
    pub request_timeout: Option<Duration>,
    /// Largest unterminated line a session will buffer
    pub max_line_bytes: usize,
}

/// Server instance
pub struct Server {
    config: Config,
    context: Arc<ServerContext>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, context: ServerContext) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            context: Arc::new(context),
            connection_limit,
        }
    }

    /// Bind the listening socket.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("could not resolve host '{}'", self.config.host),
                )
            })?;

        let listener = create_listener(addr)?;
        TcpListener::from_std(listener)
    }

    /// Bind and accept connections until a fatal error.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind()?;
        info!(address = %listener.local_addr()?, "Server listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            // Wait for a connection slot
            let permit = Arc::clone(&self.connection_limit)
                .acquire_owned()
                .await
                .map_err(io::Error::other)?;

            match listener.accept().await {
                Ok((stream, peer)) => {
                    let context = Arc::clone(&self.context);

                    tokio::spawn(async move {
                        handle_connection(stream, peer, context).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Run one session and classify how it ended.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, context: Arc<ServerContext>) {
    debug!(peer = %peer, "Client connected");

    match Session::new(stream, &context).run().await {
        Ok(outcome) => debug!(peer = %peer, ?outcome, "Client disconnected"),
        Err(e) if is_disconnect(&e) => debug!(peer = %peer, error = %e, "Connection reset"),
        Err(e) => warn!(peer = %peer, error = %e, "Socket error"),
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
