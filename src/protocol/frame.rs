//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and body.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use lottery_wire::protocol::{Frame, MsgType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(MsgType::Echo, Bytes::from_static(b"ping")).unwrap();
//!
//! assert_eq!(frame.msg_type(), MsgType::Echo);
//! assert_eq!(frame.body(), b"ping");
//! assert_eq!(frame.encode().len(), 5 + 4);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, MsgType, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a frame, deriving the length field from the body.
    pub fn new(msg_type: MsgType, body: Bytes) -> Result<Self> {
        Ok(Self {
            header: Header::for_body(msg_type, body.len())?,
            body,
        })
    }

    /// Create a frame from an already decoded header.
    pub(crate) fn from_header(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Get the message type.
    #[inline]
    pub fn msg_type(&self) -> MsgType {
        self.header.msg_type
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total size on the wire.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Encode header and body into a contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Example
///
/// ```
/// use lottery_wire::protocol::{build_frame, MsgType};
///
/// let bytes = build_frame(MsgType::Success, &[0x01]).unwrap();
/// assert_eq!(bytes, vec![0, 0, 0, 2, 0x00, 0x01]);
/// ```
pub fn build_frame(msg_type: MsgType, body: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&Header::for_body(msg_type, body.len())?.encode());
    buf.extend_from_slice(body);
    Ok(buf)
}
