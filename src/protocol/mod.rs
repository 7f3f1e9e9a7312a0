//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the message layer of the IPC protocol:
//! - 8-byte header encoding/decoding
//! - Frame buffer for reassembling messages from arbitrary socket reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_message, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    endianness, read_length, set_message_type, Header, MessageType, DEFAULT_MAX_MESSAGE_SIZE,
    HEADER_SIZE, LENGTH_OFFSET, MESSAGE_TYPE_OFFSET,
};
