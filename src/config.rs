//! Connection options.
//!
//! [`ConnectOptions`] can be built in code with the fluent setters, from
//! one of the shorthand constructors, or loaded from JSON:
//!
//! ```
//! use kdb_ipc::ConnectOptions;
//!
//! let options = ConnectOptions::from_json(
//!     r#"{"host": "db1", "port": 5001, "user": "u", "password": "p", "socketTimeout": 30000}"#,
//! )
//! .unwrap();
//! assert_eq!(options.port, Some(5001));
//! assert!(options.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use serde::Deserialize;

use crate::codec::DecodeOptions;
use crate::error::{Error, Result};
use crate::handshake::Credentials;
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::writer::WriterConfig;

/// Default host when none is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Everything needed to open and run one connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Server host, also used as the TLS server name.
    pub host: String,
    /// Server port. Required unless `unix_socket` is set.
    pub port: Option<u16>,
    /// Unix socket path; takes precedence over host and port.
    pub unix_socket: Option<PathBuf>,
    /// User name for the handshake.
    pub user: Option<String>,
    /// Password for the handshake. Required when `user` is set.
    pub password: Option<String>,
    /// Wrap the TCP stream in TLS.
    pub use_tls: bool,
    /// Client configuration used when `use_tls` is set.
    pub tls_config: Option<Arc<ClientConfig>>,
    /// Idle time after which an [`Event::Timeout`](crate::Event::Timeout)
    /// is emitted.
    pub socket_timeout: Option<Duration>,
    /// TCP no-delay; left to the OS when unset.
    pub no_delay: Option<bool>,
    /// Passed to the codec for every inbound message.
    pub decode: DecodeOptions,
    /// Largest inbound message accepted by the framer.
    pub max_message_size: u32,
    /// Outbound queue settings.
    pub writer: WriterConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: None,
            unix_socket: None,
            user: None,
            password: None,
            use_tls: false,
            tls_config: None,
            socket_timeout: None,
            no_delay: None,
            decode: DecodeOptions::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            writer: WriterConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// JSON shape of the structured configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawOptions {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    unix_socket: Option<PathBuf>,
    #[serde(rename = "useTLS", alias = "useTls")]
    use_tls: bool,
    /// Milliseconds.
    socket_timeout: Option<u64>,
    #[serde(alias = "socketNoDelay")]
    no_delay: Option<bool>,
    max_message_size: Option<u32>,
    channel_capacity: Option<usize>,
    #[serde(flatten)]
    decode: DecodeOptions,
}

impl From<RawOptions> for ConnectOptions {
    fn from(raw: RawOptions) -> Self {
        let defaults = ConnectOptions::default();
        Self {
            host: raw.host.unwrap_or(defaults.host),
            port: raw.port,
            unix_socket: raw.unix_socket,
            user: raw.user,
            password: raw.password,
            use_tls: raw.use_tls,
            tls_config: None,
            socket_timeout: raw.socket_timeout.map(Duration::from_millis),
            no_delay: raw.no_delay,
            decode: raw.decode,
            max_message_size: raw.max_message_size.unwrap_or(defaults.max_message_size),
            writer: WriterConfig {
                channel_capacity: raw
                    .channel_capacity
                    .unwrap_or(defaults.writer.channel_capacity),
            },
            event_capacity: defaults.event_capacity,
        }
    }
}

impl ConnectOptions {
    /// Options with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain TCP to `host:port`, anonymous.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new().host(host).port(port)
    }

    /// TCP to `host:port` as `user`.
    pub fn tcp_with_auth(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::tcp(host, port).credentials(user, password)
    }

    /// Unix socket at `path`, anonymous.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::new().unix_socket(path)
    }

    /// Load the structured configuration from JSON.
    ///
    /// Durations are in milliseconds. The TLS client config cannot be
    /// expressed in JSON; set it with [`tls`](Self::tls) afterwards.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawOptions = serde_json::from_str(json)?;
        Ok(raw.into())
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Connect over a Unix socket instead of TCP.
    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket = Some(path.into());
        self
    }

    /// Authenticate as `user`.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Use TLS with the given client configuration.
    pub fn tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.use_tls = true;
        self.tls_config = Some(config);
        self
    }

    /// Toggle TLS without changing the client configuration.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Emit a timeout event after this much idle time.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Set TCP no-delay.
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = Some(no_delay);
        self
    }

    /// Set the codec options.
    pub fn decode_options(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }

    /// Set the largest accepted inbound message.
    ///
    /// Default: 2 GiB - 1
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer.channel_capacity = capacity;
        self
    }

    /// Set the event channel capacity.
    ///
    /// Default: 1024
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check the options are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.user.is_some() && self.password.is_none() {
            return Err(Error::Config("A user requires a password".to_string()));
        }
        if self.port.is_none() && self.unix_socket.is_none() {
            return Err(Error::Config(
                "A port or a unix socket is required".to_string(),
            ));
        }
        if self.use_tls {
            if self.unix_socket.is_some() {
                return Err(Error::Config(
                    "TLS is not supported over a unix socket".to_string(),
                ));
            }
            if self.tls_config.is_none() {
                return Err(Error::Config(
                    "TLS requested without a client config".to_string(),
                ));
            }
        }
        if self.max_message_size < crate::protocol::HEADER_SIZE as u32 {
            return Err(Error::Config(format!(
                "Maximum message size {} is smaller than the header",
                self.max_message_size
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "Event capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials for the handshake. A password without a user is
    /// ignored.
    pub fn handshake_credentials(&self) -> Credentials {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Credentials::user(user.clone(), password.clone()),
            _ => Credentials::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectOptions::default();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, None);
        assert!(!options.use_tls);
        assert_eq!(options.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(options.decode, DecodeOptions::default());
    }

    #[test]
    fn test_shorthand_constructors() {
        let tcp = ConnectOptions::tcp("db1", 5001);
        assert_eq!(tcp.host, "db1");
        assert_eq!(tcp.port, Some(5001));
        assert_eq!(tcp.handshake_credentials(), Credentials::Anonymous);

        let auth = ConnectOptions::tcp_with_auth("db1", 5001, "u", "p");
        assert_eq!(auth.handshake_credentials(), Credentials::user("u", "p"));

        let unix = ConnectOptions::unix("/tmp/kx.5001");
        assert_eq!(unix.unix_socket, Some(PathBuf::from("/tmp/kx.5001")));
        assert!(unix.validate().is_ok());
    }

    #[test]
    fn test_builder_method_chaining() {
        let options = ConnectOptions::new()
            .host("db2")
            .port(6000)
            .socket_timeout(Duration::from_secs(5))
            .no_delay(true)
            .decode_options(DecodeOptions::raw())
            .channel_capacity(16)
            .event_capacity(8);

        assert_eq!(options.socket_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.no_delay, Some(true));
        assert_eq!(options.decode, DecodeOptions::raw());
        assert_eq!(options.writer.channel_capacity, 16);
        assert_eq!(options.event_capacity, 8);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let options = ConnectOptions::from_json(
            r#"{
                "host": "db3",
                "port": 5010,
                "user": "alice",
                "password": "pw",
                "socketTimeout": 1500,
                "socketNoDelay": true,
                "nanos2date": false,
                "flipTables": false,
                "long2number": true
            }"#,
        )
        .unwrap();

        assert_eq!(options.host, "db3");
        assert_eq!(options.port, Some(5010));
        assert_eq!(options.socket_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.no_delay, Some(true));
        assert!(!options.decode.nanos_to_date);
        assert!(!options.decode.flip_tables);
        assert!(options.decode.empty_char_to_null);
        assert!(options.decode.long_to_number);
        assert_eq!(options.handshake_credentials(), Credentials::user("alice", "pw"));
    }

    #[test]
    fn test_from_json_defaults() {
        let options = ConnectOptions::from_json(r#"{"unixSocket": "/tmp/kx.1"}"#).unwrap();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.decode, DecodeOptions::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = ConnectOptions::from_json(r#"{"port": "not a number"}"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_validate_rejects_inconsistent_options() {
        let no_endpoint = ConnectOptions::new();
        assert!(matches!(no_endpoint.validate(), Err(Error::Config(_))));

        let mut user_only = ConnectOptions::tcp("h", 1);
        user_only.user = Some("u".to_string());
        assert!(matches!(user_only.validate(), Err(Error::Config(_))));

        let mut password_only = ConnectOptions::tcp("h", 1);
        password_only.password = Some("p".to_string());
        assert!(password_only.validate().is_ok());
        assert_eq!(password_only.handshake_credentials(), Credentials::Anonymous);

        let tls_without_config = ConnectOptions::tcp("h", 1).use_tls(true);
        assert!(matches!(tls_without_config.validate(), Err(Error::Config(_))));

        let tls_over_unix = ConnectOptions::unix("/tmp/s").use_tls(true);
        assert!(matches!(tls_over_unix.validate(), Err(Error::Config(_))));

        let tiny_max = ConnectOptions::tcp("h", 1).max_message_size(4);
        assert!(matches!(tiny_max.validate(), Err(Error::Config(_))));
    }
}
