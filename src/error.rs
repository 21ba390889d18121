use crate::connection::ConnectionId;
use std::collections::TryReserveError;
use std::path::PathBuf;
use thiserror::Error;

/// The error type for udscomm operations.
///
/// Construction errors (bind, connect) are returned from the constructor and
/// no partial object is left behind. Failures on an established connection
/// never show up here; they destroy that connection and are reported through
/// [`Handler::on_disconnect`](crate::Handler::on_disconnect) instead.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Construction Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binding the listening socket failed.
    #[error("bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stale socket file could not be removed before binding.
    #[error("unlink {}: {source}", path.display())]
    Unlink {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Connecting to a listening socket failed.
    #[error("connect {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    // ============================================================================
    // Connection Errors
    // ============================================================================

    /// Attempted to operate on a connection ID that doesn't exist.
    #[error("Connection {id} not found")]
    ConnectionNotFound {
        /// The connection ID that was not found.
        id: ConnectionId,
    },

    /// The client's connection has already been destroyed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The write side of the connection was shut down.
    #[error("Connection {id} no longer accepts writes")]
    WriteShutdown { id: ConnectionId },

    // ============================================================================
    // Framing Errors
    // ============================================================================

    /// Payload does not fit the size field or exceeds the configured maximum.
    #[error("Payload of {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A message buffer could not be allocated.
    #[error("Out of memory allocating {size} bytes")]
    OutOfMemory {
        size: usize,
        source: TryReserveError,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
