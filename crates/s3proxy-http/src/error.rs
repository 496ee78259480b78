//! Server lifecycle errors.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while starting, running or stopping the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested `host:port`.
        address: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key material could not be loaded.
    #[error("failed to load TLS material from {path}: {reason}")]
    Tls {
        /// File that failed to load.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The listener failed with a non-recoverable error.
    #[error("listener failed: {0}")]
    Listener(#[source] std::io::Error),

    /// In-flight connections did not finish within the drain deadline.
    #[error("shutdown timed out after {timeout:?} with {remaining} connection(s) still open")]
    ShutdownTimeout {
        /// Configured drain deadline.
        timeout: Duration,
        /// Connections that were force-closed.
        remaining: usize,
    },

    /// The server task ended without reporting a result.
    #[error("server task terminated unexpectedly")]
    Aborted,
}
