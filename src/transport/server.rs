//! Multi-client server over a listening Unix domain socket.
//!
//! The server owns the listening socket and every accepted [`Connection`].
//! It is driven through the [`Multiplexed`] contract and runs on a single
//! thread; no locking is involved anywhere.

use super::{HandleSet, Multiplexed};
use crate::config::{socket_path, Options};
use crate::connection::{Connection, ConnectionId, Handler, Liveness};
use crate::error::Error;
use crate::framing::{self, MessageNames};
use ::config::Config;

use mio::net::UnixListener;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

const CONNECTION_ID_RANGE_START: usize = 1;

/// Per-connection outcome of [`Server::broadcast`].
///
/// Fan-out is best effort: a failure on one connection does not stop
/// delivery to the others.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Connections the message was queued on.
    pub delivered: Vec<ConnectionId>,
    /// Connections the message could not be queued on, with the reason.
    pub failed: Vec<(ConnectionId, Error)>,
}

impl BroadcastReport {
    /// True when no connection failed, including the zero-connection case.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Readiness-driven server handling any number of clients.
///
/// Not thread-safe. Handler callbacks run inline on the thread calling
/// [`Multiplexed::handle_fds`].
#[derive(Debug)]
pub struct Server<H: Handler> {
    listener: UnixListener,
    path: PathBuf,
    connections: HashMap<ConnectionId, Connection>,
    next_id: usize,
    handler: H,
    options: Options,
}

// ============================================================================
// Constructors
// ============================================================================

impl<H: Handler> Server<H> {
    /// Binds a listening socket at `path`.
    ///
    /// A stale socket file at `path` is removed first unless
    /// `options.unlink_stale_socket` is off. Failures are returned, never
    /// retried.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn create<P: AsRef<Path>>(path: P, handler: H, options: Options) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if options.unlink_stale_socket {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed stale socket file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    error!(%source, "Failed to remove stale socket file");
                    return Err(Error::Unlink { path, source });
                }
            }
        }

        let listener = match UnixListener::bind(&path) {
            Ok(listener) => listener,
            Err(source) => {
                error!(%source, "Failed to bind socket");
                return Err(Error::Bind { path, source });
            }
        };
        info!(fd = listener.as_raw_fd(), "Listening for connections");

        Ok(Self {
            listener,
            path,
            connections: HashMap::new(),
            next_id: CONNECTION_ID_RANGE_START,
            handler,
            options,
        })
    }

    /// Creates a server from configuration with namespacing.
    ///
    /// # Configuration Keys
    ///
    /// - `socket_path`: where to bind (required)
    /// - Plus all keys read by [`Options::new_named`]
    pub fn new_named(
        config: &Config,
        name: &str,
        handler: H,
        names: MessageNames,
    ) -> Result<Self, Error> {
        let path = socket_path(config, name)?;
        let options = Options::new_named(config, name).with_names(names);
        Self::create(path, handler, options)
    }

    /// Tears down every connection, firing their disconnect callbacks, then
    /// closes the listening socket. Dropping the server does the same.
    pub fn destroy(mut self) {
        self.close_all_connections();
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl<H: Handler> Server<H> {
    /// Path the server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Ids of all live connections, in no particular order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }
}

// ============================================================================
// Connection Management
// ============================================================================

impl<H: Handler> Server<H> {
    /// Destroys a connection by its ID, firing its disconnect callback.
    ///
    /// Ignores non-existent connection ids, because the connection might have
    /// been closed already internally.
    #[instrument(skip(self))]
    pub fn destroy_connection(&mut self, id: ConnectionId) {
        match self.connections.remove(&id) {
            Some(conn) => conn.destroy(&mut self.handler),
            None => warn!(%id, "Connection not found when destroying connection"),
        }
    }

    /// Destroys all connections.
    #[instrument(skip(self))]
    pub fn close_all_connections(&mut self) {
        let ids = self.connection_ids();
        for id in ids {
            if let Some(conn) = self.connections.remove(&id) {
                conn.destroy(&mut self.handler);
            }
        }
    }

    /// Shuts down a connection by its ID.
    ///
    /// Ignores non-existent connection ids, because the connection might have
    /// been closed already internally.
    #[instrument(skip(self))]
    pub fn shutdown_connection(&mut self, id: ConnectionId, how: Shutdown) {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                if let Err(err) = conn.shutdown(how) {
                    warn!(%id, how = ?how, ?err, "Error shutting down connection");
                }
            }
            None => warn!(%id, "Connection not found when shutting down connection"),
        }
    }

    /// Performs one accept attempt on the listening socket.
    ///
    /// An interrupted or would-block accept is a no-op. Other failures are
    /// logged and leave existing connections untouched.
    #[instrument(skip(self))]
    fn accept(&mut self) {
        let stream = match self.listener.accept() {
            Ok((stream, _)) => stream,
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                return;
            }
            Err(err) => {
                error!(?err, path = %self.path.display(), "Error accepting connection");
                return;
            }
        };

        let id = ConnectionId(self.next_id);
        self.advance_connection_id();

        let conn = Connection::new(id, stream, &self.options);
        info!(%id, fd = conn.as_raw_fd(), "Accepted connection");
        self.connections.insert(id, conn);

        if let Some(conn) = self.connections.get_mut(&id) {
            self.handler.on_connect(conn);
        }
    }
}

// ============================================================================
// Data Operations
// ============================================================================

impl<H: Handler> Server<H> {
    /// Queues a message on one connection.
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub fn send_to(
        &mut self,
        id: ConnectionId,
        msg_type: u32,
        opaque: u32,
        payload: &[u8],
    ) -> Result<(), Error> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(Error::ConnectionNotFound { id })?;
        conn.enqueue(msg_type, opaque, payload)
    }

    /// Queues the same message on every live connection.
    ///
    /// The message is framed once. `Err` means it could not be framed at all
    /// and nothing was queued; per-connection failures are collected in the
    /// returned report while delivery to the rest continues.
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub fn broadcast(
        &mut self,
        msg_type: u32,
        opaque: u32,
        payload: &[u8],
    ) -> Result<BroadcastReport, Error> {
        if payload.len() > self.options.max_payload_size {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: self.options.max_payload_size,
            });
        }
        let frame = framing::encode(msg_type, opaque, payload)?;

        let mut report = BroadcastReport::default();
        let ids = self.connection_ids();
        for id in ids {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            let result = framing::try_copy(&frame)
                .and_then(|copy| conn.queue_frame(msg_type, opaque, payload.len(), copy));
            match result {
                Ok(()) => report.delivered.push(id),
                Err(err) => {
                    warn!(%id, %err, "Broadcast could not be queued on connection");
                    report.failed.push((id, err));
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast message"
        );
        Ok(report)
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

impl<H: Handler> Server<H> {
    fn advance_connection_id(&mut self) {
        loop {
            self.next_id = self
                .next_id
                .checked_add(1)
                .unwrap_or(CONNECTION_ID_RANGE_START);
            if !self.connections.contains_key(&ConnectionId(self.next_id)) {
                break;
            }
        }
    }
}

// ============================================================================
// Multiplexed Trait Implementation
// ============================================================================

impl<H: Handler> Multiplexed for Server<H> {
    fn fill_fds(&self, read: &mut HandleSet, write: &mut HandleSet) -> RawFd {
        let fd = self.listener.as_raw_fd();
        read.insert(fd);

        self.connections
            .values()
            .map(|conn| conn.fill_fds(read, write))
            .fold(fd + 1, RawFd::max)
    }

    fn handle_fds(&mut self, read: &HandleSet, write: &HandleSet) {
        if read.contains(self.listener.as_raw_fd()) {
            self.accept();
        }

        // A connection may be destroyed while it is being serviced, so walk a
        // snapshot of ids and look each one up again.
        let ids = self.connection_ids();
        for id in ids {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            if conn.handle_fds(read, write, &mut self.handler) == Liveness::Closed {
                self.destroy_connection(id);
            }
        }
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        self.close_all_connections();
        info!(path = %self.path.display(), "Closed listener");
    }
}
