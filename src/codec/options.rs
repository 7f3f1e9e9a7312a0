//! Decode options passed through to the value codec.

use serde::Deserialize;

use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;

/// Toggles controlling how [`deserialize`](super::deserialize) maps wire
/// values onto [`K`](super::K).
///
/// The connection never interprets these; it hands them to the codec for
/// every inbound message, with `max_message_size` set to its own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecodeOptions {
    /// Decode timestamps and dates as [`std::time::SystemTime`] instants.
    #[serde(alias = "nanos2date")]
    pub nanos_to_date: bool,
    /// Decode tables as a list of per-row dictionaries.
    pub flip_tables: bool,
    /// Decode a blank char atom as null.
    #[serde(alias = "emptyChar2null")]
    pub empty_char_to_null: bool,
    /// Narrow 64-bit integers to `f64`.
    #[serde(alias = "long2number")]
    pub long_to_number: bool,
    /// Largest uncompressed size a compressed message may declare.
    #[serde(skip)]
    pub max_message_size: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            nanos_to_date: true,
            flip_tables: true,
            empty_char_to_null: true,
            long_to_number: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl DecodeOptions {
    /// Options that keep every value in its raw wire representation.
    pub fn raw() -> Self {
        Self {
            nanos_to_date: false,
            flip_tables: false,
            empty_char_to_null: false,
            long_to_number: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
