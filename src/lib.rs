//! udscomm - readiness-driven message framing over Unix domain sockets
//!
//! udscomm lets a privileged coordinator process and any number of
//! unprivileged peers exchange typed, variable-size binary messages over a
//! byte-stream socket. Every message is a fixed 12-byte header (type, opaque
//! correlation value, payload size) followed by the payload.
//!
//! The crate never owns the event loop. A [`Server`] or [`Client`] declares
//! the sockets it is interested in, the caller polls them (with
//! [`transport::wait`] or any other poller) and hands the ready sets back.
//! Completed messages and connection lifecycle events reach a [`Handler`].
//!
//! ```no_run
//! use udscomm::prelude::*;
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(&mut self, conn: &mut Connection, msg: Message) -> Disposition {
//!         match conn.enqueue(msg.msg_type, msg.opaque, &msg.payload) {
//!             Ok(()) => Disposition::Continue,
//!             Err(_) => Disposition::Close,
//!         }
//!     }
//! }
//!
//! let mut server = Server::create("/tmp/echo.sock", Echo, Options::default()).unwrap();
//! loop {
//!     run_once(&mut [&mut server], None).unwrap();
//! }
//! ```

// Internal-only modules
pub(crate) mod config;
pub(crate) mod connection;
pub(crate) mod error;

pub mod framing;
pub mod transport;

// These are the intended public API
pub use crate::config::{Options, DEFAULT_MAX_PAYLOAD_SIZE};
pub use crate::connection::{Connection, ConnectionId, Disposition, Handler, Liveness};
pub use crate::error::Error;
pub use crate::framing::{Message, MessageNames, HEADER_SIZE};
pub use crate::transport::client::Client;
pub use crate::transport::server::{BroadcastReport, Server};
pub use crate::transport::{run_once, HandleSet, Multiplexed};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::Options;
    pub use crate::connection::{Connection, ConnectionId, Disposition, Handler, Liveness};
    pub use crate::error::Error;
    pub use crate::framing::{Message, MessageNames};
    pub use crate::transport::client::Client;
    pub use crate::transport::server::{BroadcastReport, Server};
    pub use crate::transport::{run_once, wait, HandleSet, Multiplexed};
}
