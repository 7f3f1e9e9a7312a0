//! # kdb-ipc
//!
//! Async client for the kdb+ IPC protocol.
//!
//! The crate turns one byte stream (TCP, TLS or a Unix Domain Socket)
//! into a request/response channel with out-of-band subscription
//! updates:
//!
//! - **Handshake**: credentials and a capability byte, answered by one byte
//! - **Framing**: 8-byte headers, little-endian length at offset 4,
//!   messages reassembled from arbitrarily chunked reads
//! - **Correlation**: the wire carries no request id, so the N-th sync
//!   call is paired with the N-th inbound message that is not an update
//! - **Updates**: lists led by `` `upd `` are broadcast as events
//!
//! ## Example
//!
//! ```ignore
//! use kdb_ipc::{connect, ConnectOptions, K};
//!
//! #[tokio::main]
//! async fn main() -> kdb_ipc::Result<()> {
//!     let conn = connect(ConnectOptions::tcp_with_auth("localhost", 5001, "user", "pw")).await?;
//!
//!     let reply = conn.call("til 3").await?;
//!     assert_eq!(reply, K::Longs(vec![0, 1, 2]));
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod transport;
pub mod writer;

mod config;
mod connection;

pub use codec::{DecodeOptions, K};
pub use config::{ConnectOptions, DEFAULT_EVENT_CAPACITY, DEFAULT_HOST};
pub use connection::{connect, Connection, Event};
pub use error::{Error, Result};
pub use handshake::Credentials;
pub use rustls;
