//! Readiness integration with an external event loop.
//!
//! Nothing in this crate blocks on its own. The owner of the loop drives
//! every [`Server`](server::Server) and [`Client`](client::Client) through
//! two phases per turn:
//!
//! 1. **Declare interest**: [`Multiplexed::fill_fds`] marks the handles that
//!    want read readiness (always, while open) and write readiness (only
//!    while something is queued) in caller-owned [`HandleSet`]s.
//! 2. **Handle readiness**: after polling, [`Multiplexed::handle_fds`] gets
//!    the narrowed sets back and performs at most one I/O call per ready
//!    handle and direction.
//!
//! Any poller works. [`wait`] is a level-triggered one built on `poll(2)`,
//! and [`run_once`] chains all three steps for a set of sources.

pub mod client;
mod poll;
pub mod server;

pub use poll::wait;

use std::collections::BTreeSet;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::trace;

// ============================================================================
// HandleSet
// ============================================================================

/// A caller-owned set of socket descriptors, the `fd_set` of this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSet {
    fds: BTreeSet<RawFd>,
}

impl HandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fd: RawFd) {
        self.fds.insert(fd);
    }

    pub fn remove(&mut self, fd: RawFd) {
        self.fds.remove(&fd);
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.fds.contains(&fd)
    }

    pub fn clear(&mut self) {
        self.fds.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Descriptors in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.fds.iter().copied()
    }

    pub(crate) fn retain<F: FnMut(RawFd) -> bool>(&mut self, mut keep: F) {
        self.fds.retain(|&fd| keep(fd));
    }
}

// ============================================================================
// Multiplexed
// ============================================================================

/// The two-phase readiness contract.
pub trait Multiplexed {
    /// Declares interest. Returns the highest descriptor marked plus one, or
    /// 0 when nothing was marked.
    fn fill_fds(&self, read: &mut HandleSet, write: &mut HandleSet) -> RawFd;

    /// Consumes readiness reported by the poller.
    fn handle_fds(&mut self, read: &HandleSet, write: &HandleSet);
}

/// Runs one declare / poll / handle turn over `sources`.
///
/// Returns the number of ready handles. An interrupted poll counts as a turn
/// with nothing ready.
pub fn run_once(
    sources: &mut [&mut dyn Multiplexed],
    timeout: Option<Duration>,
) -> std::io::Result<usize> {
    let mut read = HandleSet::new();
    let mut write = HandleSet::new();

    let mut nfds = 0;
    for source in sources.iter() {
        nfds = nfds.max(source.fill_fds(&mut read, &mut write));
    }
    trace!(nfds, readers = read.len(), writers = write.len(), "Declared interest");

    let ready = wait(&mut read, &mut write, timeout)?;
    if ready == 0 {
        return Ok(0);
    }

    for source in sources.iter_mut() {
        source.handle_fds(&read, &write);
    }
    Ok(ready)
}
