//! Connected byte stream over TCP, TLS or a Unix Domain Socket.
//!
//! # Example
//!
//! ```ignore
//! use kdb_ipc::{transport::Transport, ConnectOptions};
//!
//! let stream = Transport::connect(&ConnectOptions::tcp("localhost", 5001)).await?;
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::ConnectOptions;
use crate::error::{Error, Result};

/// A connected stream, ready for the handshake.
#[derive(Debug)]
pub enum Transport {
    /// Plain TCP.
    Tcp(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix Domain Socket.
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Transport {
    /// Open the stream described by `options`.
    ///
    /// A configured Unix socket path wins over host and port.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        if let Some(path) = &options.unix_socket {
            return connect_unix(path).await;
        }

        let port = options
            .port
            .ok_or_else(|| Error::Config("A port or a unix socket is required".to_string()))?;

        let tcp = TcpStream::connect((options.host.as_str(), port)).await?;
        if let Some(no_delay) = options.no_delay {
            tcp.set_nodelay(no_delay)?;
        }
        tracing::debug!("Connected to {}:{}", options.host, port);

        if !options.use_tls {
            return Ok(Transport::Tcp(tcp));
        }

        let config = options
            .tls_config
            .clone()
            .ok_or_else(|| Error::Config("TLS requested without a client config".to_string()))?;
        let server_name = ServerName::try_from(options.host.clone())
            .map_err(|e| Error::Tls(format!("Invalid server name {}: {}", options.host, e)))?;

        let stream = TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;
        tracing::debug!("TLS session established with {}", options.host);

        Ok(Transport::Tls(Box::new(stream)))
    }

    /// Short name of the transport, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Tcp(_) => "tcp",
            Transport::Tls(_) => "tls",
            #[cfg(unix)]
            Transport::Unix(_) => "unix",
        }
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<Transport> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    tracing::debug!("Connected to unix socket {}", path.display());
    Ok(Transport::Unix(stream))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path) -> Result<Transport> {
    Err(Error::Config(
        "Unix sockets are not supported on this platform".to_string(),
    ))
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Transport::Tcp(s) => s.is_write_vectored(),
            Transport::Tls(s) => s.is_write_vectored(),
            #[cfg(unix)]
            Transport::Unix(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let options = ConnectOptions::tcp("127.0.0.1", port).no_delay(true);
        let mut transport = Transport::connect(&options).await.unwrap();
        assert_eq!(transport.kind(), "tcp");
        transport.write_all(b"ping").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Transport::connect(&ConnectOptions::tcp("127.0.0.1", port))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_tls_without_config_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let options = ConnectOptions::tcp("127.0.0.1", port).use_tls(true);
        let err = Transport::connect(&options).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_unix() {
        let path = std::env::temp_dir().join(format!("kdb-ipc-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok").await.unwrap();
        });

        let mut transport = Transport::connect(&ConnectOptions::unix(&path))
            .await
            .unwrap();
        assert_eq!(transport.kind(), "unix");

        let mut buf = [0u8; 2];
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");

        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
