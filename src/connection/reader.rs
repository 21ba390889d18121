//! Per-connection read state machine.
//!
//! Reconstructs one message at a time from a byte stream. Each call to
//! [`MessageReader::read_from`] issues at most one `read`, so a readiness
//! notification never turns into a busy loop.

use crate::error::Error;
use crate::framing::{self, decode_header, Header, Message, HEADER_SIZE};
use std::io::{ErrorKind, Read};
use tracing::trace;

// Upper bound on a single payload read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

// Result of one read attempt.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    // Progress was made, or the read was interrupted / would block.
    Pending,
    // A whole message was reconstructed; the reader is reset already.
    Complete(Message),
    // The peer closed its end.
    Closed,
    // Unrecoverable: I/O error, oversized payload or allocation failure.
    Failed(Error),
}

#[derive(Debug)]
enum ReadState {
    AwaitingHeader {
        buf: [u8; HEADER_SIZE],
        filled: usize,
    },
    // `buf` is reserved to the full payload size up front but only grows as
    // bytes arrive, so a header alone commits no payload memory.
    AwaitingPayload { header: Header, buf: Vec<u8> },
}

impl ReadState {
    fn fresh() -> Self {
        ReadState::AwaitingHeader {
            buf: [0u8; HEADER_SIZE],
            filled: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct MessageReader {
    state: ReadState,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self {
            state: ReadState::fresh(),
        }
    }
}

impl MessageReader {
    /// Performs one read from `src` and advances the state machine.
    pub(crate) fn read_from<R: Read>(&mut self, src: &mut R, max_payload: usize) -> ReadOutcome {
        match &mut self.state {
            ReadState::AwaitingHeader { buf, filled } => {
                let n = match read_once(src, &mut buf[*filled..]) {
                    Ok(Some(0)) => return ReadOutcome::Closed,
                    Ok(Some(n)) => n,
                    Ok(None) => return ReadOutcome::Pending,
                    Err(err) => return ReadOutcome::Failed(err.into()),
                };
                *filled += n;
                trace!(len = n, filled = *filled, "Read header bytes");
                if *filled < HEADER_SIZE {
                    return ReadOutcome::Pending;
                }

                let header = decode_header(buf);
                if header.size == 0 {
                    self.state = ReadState::fresh();
                    return ReadOutcome::Complete(Message::new(
                        header.msg_type,
                        header.opaque,
                        Vec::new(),
                    ));
                }

                let size = header.payload_len();
                if size > max_payload {
                    return ReadOutcome::Failed(Error::PayloadTooLarge {
                        size,
                        max: max_payload,
                    });
                }
                match framing::try_alloc(size) {
                    Ok(buf) => {
                        self.state = ReadState::AwaitingPayload { header, buf };
                        ReadOutcome::Pending
                    }
                    Err(err) => ReadOutcome::Failed(err),
                }
            }
            ReadState::AwaitingPayload { header, buf } => {
                let total = header.payload_len();
                let mut chunk = [0u8; READ_CHUNK_SIZE];
                let want = (total - buf.len()).min(READ_CHUNK_SIZE);
                let n = match read_once(src, &mut chunk[..want]) {
                    Ok(Some(0)) => return ReadOutcome::Closed,
                    Ok(Some(n)) => n,
                    Ok(None) => return ReadOutcome::Pending,
                    Err(err) => return ReadOutcome::Failed(err.into()),
                };
                buf.extend_from_slice(&chunk[..n]);
                trace!(len = n, filled = buf.len(), total, "Read payload bytes");
                if buf.len() < total {
                    return ReadOutcome::Pending;
                }

                let header = *header;
                let payload = std::mem::take(buf);
                self.state = ReadState::fresh();
                ReadOutcome::Complete(Message::new(header.msg_type, header.opaque, payload))
            }
        }
    }

    /// Drops any partially received message.
    pub(crate) fn reset(&mut self) {
        self.state = ReadState::fresh();
    }
}

// One read call. `Ok(None)` means "try again on the next readiness
// notification".
fn read_once<R: Read>(src: &mut R, dest: &mut [u8]) -> std::io::Result<Option<usize>> {
    match src.read(dest) {
        Ok(n) => Ok(Some(n)),
        Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
