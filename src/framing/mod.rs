//! Message framing: a fixed header followed by a length-prescribed payload.
//!
//! Wire format: \[type\]\[opaque\]\[size\]\[payload\]
//! - type: 4 bytes (u32 LE) - application message tag
//! - opaque: 4 bytes (u32 LE) - application correlation value
//! - size: 4 bytes (u32 LE) - payload length, may be 0
//! - payload: `size` bytes, absent when size is 0
//!
//! There is no magic number or version field. A desynchronized stream cannot
//! be recovered and the connection carrying it is destroyed.

mod names;

pub use names::MessageNames;

use crate::error::Error;
use tracing::trace;

// ============================================================================
// Constants
// ============================================================================

const TYPE_SIZE: usize = 4;
const OPAQUE_SIZE: usize = 4;
const PAYLOAD_SIZE_SIZE: usize = 4;

/// Length of the fixed message header in bytes.
pub const HEADER_SIZE: usize = TYPE_SIZE + OPAQUE_SIZE + PAYLOAD_SIZE_SIZE;

// ============================================================================
// Header
// ============================================================================

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Application message tag. Opaque to the transport.
    pub msg_type: u32,
    /// Application correlation value, passed through uninterpreted.
    pub opaque: u32,
    /// Exact payload length in bytes.
    pub size: u32,
}

impl Header {
    /// Encodes the header into its fixed wire representation.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..TYPE_SIZE].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[TYPE_SIZE..TYPE_SIZE + OPAQUE_SIZE].copy_from_slice(&self.opaque.to_le_bytes());
        buf[TYPE_SIZE + OPAQUE_SIZE..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Payload length as a `usize`.
    pub fn payload_len(&self) -> usize {
        self.size as usize
    }
}

/// Decodes a header. Never fails: every 12-byte sequence is a valid header.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> Header {
    let field = |at: usize| {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    Header {
        msg_type: field(0),
        opaque: field(TYPE_SIZE),
        size: field(TYPE_SIZE + OPAQUE_SIZE),
    }
}

// ============================================================================
// Message
// ============================================================================

/// A fully received message.
///
/// `size` is not stored separately, it is always `payload.len()`. A message
/// without payload carries an empty, unallocated `Vec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u32,
    pub opaque: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: u32, opaque: u32, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            opaque,
            payload,
        }
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Frames this message for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        encode(self.msg_type, self.opaque, &self.payload)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Frames one message into a single contiguous buffer: header, then payload,
/// with no padding.
///
/// Fails if the payload does not fit the 32-bit size field or the buffer
/// cannot be allocated.
pub fn encode(msg_type: u32, opaque: u32, payload: &[u8]) -> Result<Vec<u8>, Error> {
    let size = u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let header = Header {
        msg_type,
        opaque,
        size,
    };
    trace!(msg_type, opaque, size, "Encoding message");

    let mut buf = try_alloc(HEADER_SIZE + payload.len())?;
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

// ============================================================================
// Allocation Helpers
// ============================================================================

// Empty buffer with exactly `capacity` bytes reserved, reporting failure
// instead of aborting.
pub(crate) fn try_alloc(capacity: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity)
        .map_err(|source| Error::OutOfMemory {
            size: capacity,
            source,
        })?;
    Ok(buf)
}

// Copy of `bytes` in a freshly allocated buffer.
pub(crate) fn try_copy(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut buf = try_alloc(bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(buf)
}
