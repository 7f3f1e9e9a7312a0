//! Transport module - byte streams to the server.
//!
//! Provides abstraction over:
//! - TCP
//! - TLS over TCP (rustls)
//! - Unix Domain Sockets (Linux/macOS)

mod stream;

pub use stream::Transport;
