//! Single-connection client.

use super::{HandleSet, Multiplexed};
use crate::config::{socket_path, Options};
use crate::connection::{Connection, ConnectionId, Handler, Liveness};
use crate::error::Error;
use crate::framing::MessageNames;
use ::config::Config;

use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::{error, info, instrument};

const CLIENT_CONNECTION_ID: ConnectionId = ConnectionId(0);

/// Readiness-driven client owning one connection.
///
/// Once the connection is destroyed (peer hang-up, I/O error, handler
/// request or [`Client::disconnect`]) the client stays closed: it declares no
/// interest and refuses to enqueue.
#[derive(Debug)]
pub struct Client<H: Handler> {
    conn: Option<Connection>,
    handler: H,
}

// ============================================================================
// Constructors
// ============================================================================

impl<H: Handler> Client<H> {
    /// Connects to a server listening at `path`.
    ///
    /// The connect itself is blocking and its failure is returned; all later
    /// I/O is non-blocking.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn connect<P: AsRef<Path>>(path: P, handler: H, options: Options) -> Result<Self, Error> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| {
            error!(%source, "Failed to connect");
            Error::Connect {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let client = Self::from_stream(stream, handler, options)?;
        info!("Connected");
        Ok(client)
    }

    /// Creates a client from configuration with namespacing.
    ///
    /// # Configuration Keys
    ///
    /// - `socket_path`: where the server listens (required)
    /// - Plus all keys read by [`Options::new_named`]
    pub fn new_named(
        config: &Config,
        name: &str,
        handler: H,
        names: MessageNames,
    ) -> Result<Self, Error> {
        let path = socket_path(config, name)?;
        let options = Options::new_named(config, name).with_names(names);
        Self::connect(path, handler, options)
    }

    /// Adopts an already connected stream, such as one end of a socket pair.
    pub fn from_stream(stream: UnixStream, handler: H, options: Options) -> Result<Self, Error> {
        stream.set_nonblocking(true)?;
        let stream = mio::net::UnixStream::from_std(stream);
        Ok(Self {
            conn: Some(Connection::new(CLIENT_CONNECTION_ID, stream, &options)),
            handler,
        })
    }
}

// ============================================================================
// Connection Management
// ============================================================================

impl<H: Handler> Client<H> {
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.conn.as_mut()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Destroys the connection, firing the disconnect callback. Does nothing
    /// if it is already gone.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.destroy(&mut self.handler);
        }
    }

    /// Disconnects and consumes the client.
    pub fn destroy(mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Data Operations
// ============================================================================

impl<H: Handler> Client<H> {
    /// Queues a message for the server.
    pub fn enqueue(&mut self, msg_type: u32, opaque: u32, payload: &[u8]) -> Result<(), Error> {
        self.conn
            .as_mut()
            .ok_or(Error::ConnectionClosed)?
            .enqueue(msg_type, opaque, payload)
    }
}

// ============================================================================
// Event Operations
// ============================================================================

impl<H: Handler> Client<H> {
    /// Consumes readiness for the connection and reports whether it survived.
    pub fn process(&mut self, read: &HandleSet, write: &HandleSet) -> Liveness {
        let Some(conn) = self.conn.as_mut() else {
            return Liveness::Closed;
        };
        let liveness = conn.handle_fds(read, write, &mut self.handler);
        if liveness == Liveness::Closed {
            self.disconnect();
        }
        liveness
    }
}

// ============================================================================
// Multiplexed Trait Implementation
// ============================================================================

impl<H: Handler> Multiplexed for Client<H> {
    fn fill_fds(&self, read: &mut HandleSet, write: &mut HandleSet) -> RawFd {
        self.conn
            .as_ref()
            .map_or(0, |conn| conn.fill_fds(read, write))
    }

    fn handle_fds(&mut self, read: &HandleSet, write: &HandleSet) {
        self.process(read, write);
    }
}

impl<H: Handler> Drop for Client<H> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
