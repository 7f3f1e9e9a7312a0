//! Frame struct with typed accessors.
//!
//! A frame is one complete IPC message: the 8-byte header plus body.
//! The header bytes are kept in front of the body because the value
//! codec decodes whole messages (it needs the endianness and
//! compression flags).
//!
//! # Example
//!
//! ```
//! use kdb_ipc::protocol::{build_message, Frame, MessageType};
//! use bytes::Bytes;
//!
//! let bytes = build_message(MessageType::Response, &[0xf9, 1, 0, 0, 0, 0, 0, 0, 0]);
//! let frame = Frame::from_bytes(Bytes::from(bytes)).unwrap();
//!
//! assert!(frame.is_response());
//! assert_eq!(frame.body().len(), 9);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, MessageType, HEADER_SIZE};

/// A complete protocol message.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Whole message, header included (zero-copy via `bytes::Bytes`).
    pub bytes: Bytes,
}

impl Frame {
    /// Create a frame from a decoded header and the whole message.
    pub fn new(header: Header, bytes: Bytes) -> Self {
        Self { header, bytes }
    }

    /// Create a frame by decoding the header of a whole message.
    ///
    /// Returns `None` if the message is shorter than a header.
    pub fn from_bytes(bytes: Bytes) -> Option<Self> {
        let header = Header::decode(&bytes)?;
        Some(Self { header, bytes })
    }

    /// Whole message bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Body bytes (everything after the header).
    #[inline]
    pub fn body(&self) -> &[u8] {
        self.bytes.get(HEADER_SIZE..).unwrap_or_default()
    }

    /// Raw message type tag.
    #[inline]
    pub fn message_type(&self) -> u8 {
        self.header.message_type
    }

    /// Known message type, if any.
    #[inline]
    pub fn kind(&self) -> Option<MessageType> {
        self.header.kind()
    }

    /// Check if this is a reply (type tag 2).
    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Total length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for framer output; a frame holds at least a header.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Build a complete message from a message type and an encoded body.
pub fn build_message(message_type: MessageType, body: &[u8]) -> Vec<u8> {
    let length = (HEADER_SIZE + body.len()) as u32;
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&Header::new(message_type, length).encode());
    buf.extend_from_slice(body);
    buf
}
