//! Connection handshake.
//!
//! Before any framed message is exchanged the client sends its
//! credentials followed by a capability byte and a NUL terminator:
//! ```text
//! ┌──────────────────────┬────────────┬──────┐
//! │ user:password (ASCII)│ capability │ 0x00 │
//! └──────────────────────┴────────────┴──────┘
//! ```
//! The server answers with exactly one byte: the capability it accepts,
//! or closes the socket if the credentials are rejected.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Capability advertised by the client: compression, timestamp and
/// timespan support.
pub const CAPABILITY: u8 = 0x03;

/// Credential token sent when no user is configured.
pub const ANONYMOUS: &str = "anonymous";

/// Credentials sent in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// The anonymous token.
    #[default]
    Anonymous,
    /// `user:password`.
    User {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
}

impl Credentials {
    /// Credentials for a named user.
    pub fn user(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::User {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Text sent on the wire.
    pub fn token(&self) -> String {
        match self {
            Credentials::Anonymous => ANONYMOUS.to_string(),
            Credentials::User { user, password } => format!("{}:{}", user, password),
        }
    }
}

/// Build the handshake request: credentials, capability byte, terminator.
///
/// # Errors
///
/// Returns error if the credentials are not ASCII or contain a NUL byte,
/// since the server reads them as a NUL-terminated ASCII string.
///
/// # Example
///
/// ```
/// use kdb_ipc::handshake::{build_handshake, Credentials};
///
/// let bytes = build_handshake(&Credentials::user("u", "p")).unwrap();
/// assert_eq!(bytes, b"u:p\x03\x00");
/// ```
pub fn build_handshake(credentials: &Credentials) -> Result<Vec<u8>> {
    let token = credentials.token();
    if !token.is_ascii() || token.as_bytes().contains(&0) {
        return Err(Error::Config(
            "Credentials must be ASCII without NUL bytes".to_string(),
        ));
    }

    let mut buf = Vec::with_capacity(token.len() + 2);
    buf.extend_from_slice(token.as_bytes());
    buf.push(CAPABILITY);
    buf.push(0x00);
    Ok(buf)
}

/// Check the server's handshake reply.
///
/// Exactly one byte with value >= 1 is accepted; value 0 means the
/// capability was rejected; any other length is malformed.
pub fn check_reply(reply: &[u8]) -> Result<u8> {
    match reply {
        [capability] if *capability >= 1 => Ok(*capability),
        [_] => Err(Error::CapabilityRejected),
        _ => Err(Error::InvalidHandshakeResponse { len: reply.len() }),
    }
}

/// Run the handshake over a freshly connected stream.
///
/// Performs exactly one read for the reply; the reply is never routed
/// through the frame buffer.
///
/// Returns the capability byte accepted by the server.
pub async fn negotiate<S>(stream: &mut S, credentials: &Credentials) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_handshake(credentials)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 64];
    let n = stream.read(&mut reply).await?;
    if n == 0 {
        return Err(Error::HandshakeClosed);
    }

    let capability = check_reply(&reply[..n])?;
    tracing::debug!("Handshake accepted with capability {}", capability);
    Ok(capability)
}
