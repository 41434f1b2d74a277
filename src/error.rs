//! Error types shared by the worker pool and connection handlers.

use std::fmt;
use std::io;
use std::time::Duration;

/// Failure of a single analysis request.
///
/// Every variant is reported to the client as the same generic
/// internal-error line; the distinction only matters for operational logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// The request carried no text
    EmptyInput,
    /// The selected worker's queue is closed (worker thread has exited)
    WorkerUnavailable { worker: usize },
    /// The worker dropped the reply channel without answering
    WorkerDisconnected { worker: usize },
    /// No reply arrived within the configured request timeout
    Timeout { worker: usize, after: Duration },
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkError::EmptyInput => write!(f, "empty text"),
            WorkError::WorkerUnavailable { worker } => {
                write!(f, "worker {} is not accepting requests", worker)
            }
            WorkError::WorkerDisconnected { worker } => {
                write!(f, "worker {} exited before replying", worker)
            }
            WorkError::Timeout { worker, after } => {
                write!(
                    f,
                    "worker {} did not reply within {}ms",
                    worker,
                    after.as_millis()
                )
            }
        }
    }
}

impl std::error::Error for WorkError {}

/// Worker pool startup errors
#[derive(Debug)]
pub enum PoolError {
    /// Not a single worker thread could be spawned
    NoWorkers(io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::NoWorkers(e) => write!(f, "Failed to start any pool worker: {}", e),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::NoWorkers(e) => Some(e),
        }
    }
}

/// Returns true for transport errors that mean the peer simply went away.
///
/// These end a connection silently; anything else is worth a warning.
pub fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
