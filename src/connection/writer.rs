//! Per-connection FIFO of framed outbound messages.
//!
//! Each entry holds one whole frame (header + payload). Only the head entry
//! is ever partially sent, and an entry leaves the queue only once fully
//! written, so frames never interleave on the wire.

use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use tracing::trace;

#[derive(Debug)]
struct OutBuf {
    bytes: Vec<u8>,
    sent: usize,
}

// Result of one write attempt.
#[derive(Debug)]
pub(crate) enum WriteOutcome {
    // Nothing was written; retry on the next readiness notification.
    Blocked,
    // `written` bytes of the head frame went out; `completed` when the frame
    // was fully sent and dequeued.
    Progress { written: usize, completed: bool },
    Failed(std::io::Error),
}

#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    bufs: VecDeque<OutBuf>,
}

impl WriteQueue {
    pub(crate) fn push(&mut self, frame: Vec<u8>) {
        self.bufs.push_back(OutBuf {
            bytes: frame,
            sent: 0,
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.bufs.len()
    }

    /// Releases every queued frame, returning how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.bufs.len();
        self.bufs.clear();
        dropped
    }

    /// Issues one write of the unsent remainder of the head frame.
    pub(crate) fn write_to<W: Write>(&mut self, dst: &mut W) -> WriteOutcome {
        let Some(head) = self.bufs.front_mut() else {
            return WriteOutcome::Blocked;
        };

        match dst.write(&head.bytes[head.sent..]) {
            Ok(0) => WriteOutcome::Failed(ErrorKind::WriteZero.into()),
            Ok(n) => {
                head.sent += n;
                let remaining = head.bytes.len() - head.sent;
                trace!(len = n, remaining, "Wrote to socket");
                let completed = remaining == 0;
                if completed {
                    self.bufs.pop_front();
                }
                WriteOutcome::Progress {
                    written: n,
                    completed,
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                WriteOutcome::Blocked
            }
            Err(err) => WriteOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    // Accepts at most the scripted number of bytes per call, or fails with
    // the scripted error kind. An exhausted script would block.
    #[derive(Default)]
    struct Throttled {
        steps: VecDeque<Result<usize, ErrorKind>>,
        out: Vec<u8>,
    }

    impl Write for Throttled {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(limit)) => {
                    let n = limit.min(bytes.len());
                    self.out.extend_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(kind)) => Err(kind.into()),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn head_sent(queue: &WriteQueue) -> Option<usize> {
        queue.bufs.front().map(|head| head.sent)
    }

    #[test]
    fn test_interrupted_write_keeps_cursor() {
        let mut queue = WriteQueue::default();
        queue.push(b"first frame".to_vec());
        queue.push(b"second".to_vec());
        let mut dst = Throttled {
            steps: VecDeque::from([Ok(4), Err(ErrorKind::Interrupted), Ok(usize::MAX)]),
            ..Default::default()
        };

        assert!(matches!(
            queue.write_to(&mut dst),
            WriteOutcome::Progress {
                written: 4,
                completed: false
            }
        ));
        assert_eq!(head_sent(&queue), Some(4));

        assert!(matches!(queue.write_to(&mut dst), WriteOutcome::Blocked));
        assert_eq!(head_sent(&queue), Some(4), "interrupted write moved the cursor");
        assert_eq!(queue.len(), 2);

        assert!(matches!(
            queue.write_to(&mut dst),
            WriteOutcome::Progress {
                written: 7,
                completed: true
            }
        ));
        assert_eq!(head_sent(&queue), Some(0));

        dst.steps.push_back(Ok(usize::MAX));
        queue.write_to(&mut dst);
        assert!(queue.is_empty());
        assert_eq!(dst.out, b"first framesecond");
    }

    #[test]
    fn test_zero_byte_write_fails() {
        let mut queue = WriteQueue::default();
        queue.push(b"frame".to_vec());
        let mut dst = Throttled {
            steps: VecDeque::from([Ok(0)]),
            ..Default::default()
        };

        match queue.write_to(&mut dst) {
            WriteOutcome::Failed(err) => assert_eq!(err.kind(), ErrorKind::WriteZero),
            other => panic!("expected a failure, got {other:?}"),
        }
    }
}
