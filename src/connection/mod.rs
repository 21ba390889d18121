//! A single framed connection over a Unix domain socket.
//!
//! A [`Connection`] owns its socket, one read state machine and one write
//! queue. Completed inbound messages are dispatched to a [`Handler`]
//! supplied by whoever owns the connection (a [`Server`](crate::Server) or a
//! [`Client`](crate::Client)).

mod reader;
mod writer;

use crate::config::Options;
use crate::error::Error;
use crate::framing::{self, Message, MessageNames};
use crate::transport::HandleSet;
use reader::{MessageReader, ReadOutcome};
use writer::{WriteOutcome, WriteQueue};

use mio::net::UnixStream;
use std::fmt;
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Identity
// ============================================================================

/// Stable identifier of a connection within its owner.
///
/// Ids stay valid as lookup keys after the connection is gone; lookups then
/// simply fail. Always re-check liveness through the id after a call that may
/// have destroyed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) usize);

impl ConnectionId {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// What to do with a connection after [`Handler::on_message`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Destroy the connection immediately.
    Close,
}

/// Whether a connection survived a call that may destroy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    StillOpen,
    Closed,
}

/// Callbacks receiving connection lifecycle events and messages.
///
/// All callbacks run synchronously on the thread driving the readiness loop.
/// A callback that blocks stalls every connection.
pub trait Handler {
    /// Called once after a server-side connection is registered, before any
    /// message is dispatched on it. Not called for client connections.
    fn on_connect(&mut self, _conn: &mut Connection) {}

    /// Called once per fully received message.
    ///
    /// Payload validation is the handler's job; returning
    /// [`Disposition::Close`] destroys the connection right after the call.
    fn on_message(&mut self, conn: &mut Connection, msg: Message) -> Disposition;

    /// Called exactly once when the connection is destroyed, whatever the
    /// cause, before its buffers are released. Do not keep the reference.
    fn on_disconnect(&mut self, _conn: &Connection) {}
}

// ============================================================================
// Connection
// ============================================================================

/// One framed connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: UnixStream,
    reader: MessageReader,
    writer: WriteQueue,
    names: MessageNames,
    max_payload_size: usize,
    write_shutdown: bool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, stream: UnixStream, options: &Options) -> Self {
        Self {
            id,
            stream,
            reader: MessageReader::default(),
            writer: WriteQueue::default(),
            names: options.names.clone(),
            max_payload_size: options.max_payload_size,
            write_shutdown: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Number of messages waiting to be sent.
    pub fn queued_messages(&self) -> usize {
        self.writer.len()
    }

    /// Whether the connection currently wants write readiness.
    pub fn has_pending_writes(&self) -> bool {
        !self.writer.is_empty()
    }

    /// Frames a message and appends it to the write queue.
    ///
    /// On error the message is dropped and nothing is queued.
    #[instrument(skip(self, payload), fields(id = %self.id, size = payload.len()))]
    pub fn enqueue(&mut self, msg_type: u32, opaque: u32, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > self.max_payload_size {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        let frame = framing::encode(msg_type, opaque, payload)?;
        self.queue_frame(msg_type, opaque, payload.len(), frame)
    }

    /// Shuts down part of the connection.
    ///
    /// Once the write side is shut, queued frames are discarded and further
    /// enqueues fail with [`Error::WriteShutdown`].
    #[instrument(skip(self), fields(id = %self.id))]
    pub fn shutdown(&mut self, how: Shutdown) -> Result<(), Error> {
        self.stream.shutdown(how)?;
        if matches!(how, Shutdown::Write | Shutdown::Both) {
            self.write_shutdown = true;
            let dropped = self.writer.clear();
            if dropped > 0 {
                debug!(dropped, "Discarded queued messages after write shutdown");
            }
        }
        info!(how = ?how, "Shut down connection");
        Ok(())
    }

    // Appends an already framed message. Shared by enqueue and broadcast so a
    // broadcast frames its message only once.
    pub(crate) fn queue_frame(
        &mut self,
        msg_type: u32,
        opaque: u32,
        size: usize,
        frame: Vec<u8>,
    ) -> Result<(), Error> {
        if self.write_shutdown {
            return Err(Error::WriteShutdown { id: self.id });
        }
        match self.names.name(msg_type) {
            Some(name) => debug!(id = %self.id, name, opaque, size, "Sent message"),
            None => debug!(id = %self.id, msg_type, opaque, size, "Sent unknown message type"),
        }
        self.writer.push(frame);
        Ok(())
    }

    // ============================================================================
    // Readiness Handling
    // ============================================================================

    /// Marks this connection's socket in the caller's readiness sets.
    ///
    /// Read interest is always declared, write interest only while the write
    /// queue is non-empty. Returns the socket's descriptor plus one.
    pub(crate) fn fill_fds(&self, read: &mut HandleSet, write: &mut HandleSet) -> RawFd {
        let fd = self.as_raw_fd();
        read.insert(fd);
        if !self.writer.is_empty() {
            write.insert(fd);
        }
        fd + 1
    }

    /// Services read readiness, then write readiness.
    ///
    /// Returns [`Liveness::Closed`] when the connection must be destroyed by
    /// its owner. No further work happens on a closed connection.
    pub(crate) fn handle_fds<H: Handler>(
        &mut self,
        read: &HandleSet,
        write: &HandleSet,
        handler: &mut H,
    ) -> Liveness {
        let fd = self.as_raw_fd();

        if read.contains(fd) && self.do_read(handler) == Liveness::Closed {
            return Liveness::Closed;
        }

        if write.contains(fd) {
            return self.do_write();
        }

        Liveness::StillOpen
    }

    fn do_read<H: Handler>(&mut self, handler: &mut H) -> Liveness {
        match self.reader.read_from(&mut self.stream, self.max_payload_size) {
            ReadOutcome::Pending => Liveness::StillOpen,
            ReadOutcome::Complete(msg) => self.dispatch(msg, handler),
            ReadOutcome::Closed => {
                info!(id = %self.id, "Peer closed connection");
                Liveness::Closed
            }
            ReadOutcome::Failed(err) => {
                error!(id = %self.id, %err, "Error reading from socket, disconnecting");
                Liveness::Closed
            }
        }
    }

    fn dispatch<H: Handler>(&mut self, msg: Message, handler: &mut H) -> Liveness {
        let (msg_type, opaque, size) = (msg.msg_type, msg.opaque, msg.size());
        match self.names.name(msg_type) {
            Some(name) => debug!(id = %self.id, name, opaque, size, "Received message"),
            None => {
                debug!(id = %self.id, msg_type, opaque, size, "Received unknown message type")
            }
        }

        match handler.on_message(self, msg) {
            Disposition::Continue => Liveness::StillOpen,
            Disposition::Close => {
                info!(id = %self.id, msg_type, "Handler requested close");
                Liveness::Closed
            }
        }
    }

    fn do_write(&mut self) -> Liveness {
        if self.writer.is_empty() {
            warn!(id = %self.id, "Write readiness on a connection without queued messages");
            return Liveness::StillOpen;
        }

        match self.writer.write_to(&mut self.stream) {
            WriteOutcome::Blocked => Liveness::StillOpen,
            WriteOutcome::Progress { written, completed } => {
                if completed {
                    debug!(id = %self.id, written, remaining = self.writer.len(), "Message fully sent");
                }
                Liveness::StillOpen
            }
            WriteOutcome::Failed(err) => {
                error!(id = %self.id, %err, "Error writing to socket, disconnecting");
                Liveness::Closed
            }
        }
    }

    // ============================================================================
    // Teardown
    // ============================================================================

    /// Destroys the connection: notifies the handler, then releases the read
    /// buffer, every queued frame and finally the socket.
    pub(crate) fn destroy<H: Handler>(mut self, handler: &mut H) {
        handler.on_disconnect(&self);

        let dropped = self.writer.clear();
        if dropped > 0 {
            debug!(id = %self.id, dropped, "Discarded queued messages");
        }
        self.reader.reset();
        info!(id = %self.id, "Disconnected");
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
