//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented messages:
//! - `WaitingForHeader`: Need at least 8 bytes to read the length
//! - `WaitingForBody`: Header parsed, need the rest of the message
//!
//! Messages are never assumed to line up with socket reads: one push may
//! complete nothing, one message, or several pipelined messages, and the
//! unconsumed tail is kept for the next push.
//!
//! # Example
//!
//! ```
//! use kdb_ipc::protocol::{build_message, FrameBuffer, MessageType};
//!
//! let mut buffer = FrameBuffer::new();
//! let message = build_message(MessageType::Response, b"payload");
//!
//! assert!(buffer.push(&message[..5]).unwrap().is_empty());
//! let frames = buffer.push(&message[5..]).unwrap();
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// State machine for message extraction.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed, waiting until the buffer holds `header.length` bytes.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct FrameBuffer {
    /// Unconsumed bytes from previous socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed message size.
    max_message_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max message: 2GB - 1.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a new frame buffer with custom max message size.
    pub fn with_max_message(max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_message_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// Returns the complete messages in arrival order (possibly none).
    /// Partial data is buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a header declares a length shorter than the
    /// header itself or larger than the configured maximum. The buffer
    /// cannot recover from that and should be dropped with the
    /// connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single message from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        let header = match &self.state {
            State::WaitingForHeader => {
                // Peek the header; bytes stay in the buffer since the
                // codec wants the whole message.
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };
                header.validate(self.max_message_size)?;
                self.state = State::WaitingForBody { header };
                header
            }
            State::WaitingForBody { header } => *header,
        };

        let length = header.length as usize;
        if self.buffer.len() < length {
            return Ok(None);
        }

        let bytes = self.buffer.split_to(length).freeze();
        self.state = State::WaitingForHeader;

        Ok(Some(Frame::new(header, bytes)))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
