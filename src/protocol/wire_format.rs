//! Wire format encoding and decoding.
//!
//! Every IPC message starts with an 8-byte header:
//! ```text
//! ┌────────────┬──────────┬────────────┬──────────┬──────────────┐
//! │ Endianness │ Msg type │ Compressed │ Reserved │ Total length │
//! │ 1 byte     │ 1 byte   │ 1 byte     │ 1 byte   │ uint32 LE    │
//! └────────────┴──────────┴────────────┴──────────┴──────────────┘
//! ```
//!
//! The length covers header and body. It is always read little-endian,
//! whatever the endianness byte says about the body.

use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Offset of the little-endian total length.
pub const LENGTH_OFFSET: usize = 4;

/// Offset of the message type tag.
pub const MESSAGE_TYPE_OFFSET: usize = 1;

/// Default maximum message size (max i32, the protocol's own limit).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 2_147_483_647;

/// Endianness flag values (byte 0).
pub mod endianness {
    /// Body is big-endian.
    pub const BIG: u8 = 0;
    /// Body is little-endian.
    pub const LITTLE: u8 = 1;
}

/// Message type tag (byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Fire-and-forget, no reply expected.
    Async = 0,
    /// Request expecting exactly one reply.
    Sync = 1,
    /// Reply to a sync request.
    Response = 2,
}

impl MessageType {
    /// Map a raw tag to a known message type.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Async),
            1 => Some(Self::Sync),
            2 => Some(Self::Response),
            _ => None,
        }
    }

    /// Raw tag value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Endianness flag of the body (see [`endianness`]).
    pub endianness: u8,
    /// Raw message type tag; unknown tags are kept as-is.
    pub message_type: u8,
    /// 1 if the body is compressed.
    pub compressed: u8,
    /// Unused byte.
    pub reserved: u8,
    /// Total message length in bytes, header included.
    pub length: u32,
}

impl Header {
    /// Create a little-endian, uncompressed header.
    pub fn new(message_type: MessageType, length: u32) -> Self {
        Self {
            endianness: endianness::LITTLE,
            message_type: message_type.as_u8(),
            compressed: 0,
            reserved: 0,
            length,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use kdb_ipc::protocol::{Header, MessageType};
    ///
    /// let bytes = Header::new(MessageType::Sync, 17).encode();
    /// assert_eq!(bytes, [1, 1, 0, 0, 17, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into the first 8 bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.endianness;
        buf[1] = self.message_type;
        buf[2] = self.compressed;
        buf[3] = self.reserved;
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            endianness: buf[0],
            message_type: buf[1],
            compressed: buf[2],
            reserved: buf[3],
            length: read_length(buf)?,
        })
    }

    /// Validate the declared length.
    ///
    /// A length below the header size or above `max_message_size` can
    /// never be satisfied by more input.
    pub fn validate(&self, max_message_size: u32) -> Result<()> {
        if (self.length as usize) < HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "Message length {} is shorter than the {}-byte header",
                self.length, HEADER_SIZE
            )));
        }

        if self.length > max_message_size {
            return Err(Error::Protocol(format!(
                "Message size {} exceeds maximum {}",
                self.length, max_message_size
            )));
        }

        Ok(())
    }

    /// Known message type, if the tag is one of 0, 1, 2.
    #[inline]
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Check if this is a reply (type tag 2).
    #[inline]
    pub fn is_response(&self) -> bool {
        self.message_type == MessageType::Response.as_u8()
    }

    /// Check if the body is compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed == 1
    }

    /// Check if the body is little-endian.
    #[inline]
    pub fn is_little_endian(&self) -> bool {
        self.endianness == endianness::LITTLE
    }
}

/// Read the little-endian total length at offset 4.
#[inline]
pub fn read_length(buf: &[u8]) -> Option<u32> {
    let bytes = buf.get(LENGTH_OFFSET..LENGTH_OFFSET + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Overwrite the message type tag of an encoded message.
///
/// Used to turn a codec-produced message into a sync request.
#[inline]
pub fn set_message_type(message: &mut [u8], message_type: MessageType) {
    if let Some(tag) = message.get_mut(MESSAGE_TYPE_OFFSET) {
        *tag = message_type.as_u8();
    }
}
