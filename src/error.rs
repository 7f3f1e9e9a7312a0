//! Error types for kdb-ipc.

use thiserror::Error;

/// Main error type for all kdb-ipc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading connection configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (impossible message length, bad header, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// The server answered with an error object (e.g. `'type`).
    #[error("Server error: {0}")]
    Server(String),

    /// Server replied to the handshake with capability byte 0.
    #[error("Invalid capability byte from server")]
    CapabilityRejected,

    /// Server handshake reply was not exactly one byte.
    #[error("Invalid auth response from server ({len} bytes)")]
    InvalidHandshakeResponse {
        /// Number of bytes the server sent back.
        len: usize,
    },

    /// Server closed the socket before answering the handshake.
    #[error("Connection closed during handshake (wrong credentials?)")]
    HandshakeClosed,

    /// Invalid connection options.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection closed before the operation could complete.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
