use super::HandleSet;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::trace;

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
const WRITE_EVENTS: libc::c_short = libc::POLLOUT | libc::POLLHUP | libc::POLLERR;

/// Blocks until a handle in `read` or `write` is ready, or `timeout` expires.
///
/// On return both sets are narrowed to the ready handles, like `select(2)`.
/// Readiness is level-triggered, so a handle that still has data stays
/// ready on the next call. Hang-up and error conditions are reported as read
/// readiness so the next read surfaces EOF or the error.
///
/// An interrupted poll returns `Ok(0)` with both sets emptied. So does a call
/// with two empty sets, without waiting.
pub fn wait(
    read: &mut HandleSet,
    write: &mut HandleSet,
    timeout: Option<Duration>,
) -> std::io::Result<usize> {
    // Nothing to wait for; the caller has no open sources left.
    if read.is_empty() && write.is_empty() {
        return Ok(0);
    }

    let mut fds: Vec<libc::pollfd> = read
        .iter()
        .chain(write.iter().filter(|fd| !read.contains(*fd)))
        .map(|fd| {
            let mut events = 0;
            if read.contains(fd) {
                events |= libc::POLLIN;
            }
            if write.contains(fd) {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd,
                events,
                revents: 0,
            }
        })
        .collect();

    let timeout_ms = timeout_millis(timeout);

    // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()`
    // pollfd structs for the duration of the call.
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            trace!("Poll interrupted");
            read.clear();
            write.clear();
            return Ok(0);
        }
        return Err(err);
    }

    let revents = |fd| {
        fds.iter()
            .find(|pfd| pfd.fd == fd)
            .map_or(0, |pfd| pfd.revents)
    };
    read.retain(|fd| revents(fd) & READ_EVENTS != 0);
    write.retain(|fd| revents(fd) & WRITE_EVENTS != 0);

    trace!(ready = n, readable = read.len(), writable = write.len(), "Poll returned");
    Ok(n as usize)
}

// Rounds up so a sub-millisecond timeout still sleeps instead of spinning.
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        Some(timeout) => timeout
            .as_micros()
            .div_ceil(1000)
            .min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    }
}
