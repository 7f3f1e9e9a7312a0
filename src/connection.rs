//! Connection setup and runtime loop.
//!
//! [`connect`] opens the transport, runs the handshake and hands the
//! stream to a [`Connection`], which manages the lifecycle:
//! 1. Split the stream into read and write halves
//! 2. Spawn the writer task for the write half
//! 3. Spawn the read loop: reassemble messages, decode them, classify
//!    them, and either resolve the oldest pending request or broadcast a
//!    subscription update
//!
//! # Example
//!
//! ```ignore
//! use kdb_ipc::{connect, ConnectOptions, Event, K};
//!
//! #[tokio::main]
//! async fn main() -> kdb_ipc::Result<()> {
//!     let conn = connect(ConnectOptions::tcp("localhost", 5001)).await?;
//!
//!     let two = conn.call("1+1").await?;
//!     let sum = conn.call_with("sum", [K::Longs(vec![1, 2, 3])]).await?;
//!
//!     let mut events = conn.subscribe();
//!     conn.send_with(".u.sub", [K::symbol("trade"), K::symbol("")]).await?;
//!     while let Ok(Event::Update(update)) = events.recv().await {
//!         println!("{:?}", update);
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{deserialize, serialize, DecodeOptions, K};
use crate::config::ConnectOptions;
use crate::dispatch::{classify, Classified, Correlator, Outcome};
use crate::error::{Error, Result};
use crate::handshake::negotiate;
use crate::protocol::{set_message_type, Frame, FrameBuffer, MessageType};
use crate::transport::Transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connection-level notifications.
///
/// Delivered on a broadcast channel; see [`Connection::subscribe`].
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub enum Event {
    /// A subscription update (a list led by `` `upd ``).
    Update(K),
    /// The server closed its side of the connection.
    End,
    /// No bytes arrived within the configured socket timeout. The
    /// connection stays open.
    Timeout,
    /// The socket failed, or the inbound byte stream could not be framed.
    Error(Arc<Error>),
    /// The connection is gone; emitted once, last.
    Close {
        /// True if an [`Event::Error`] preceded it.
        had_error: bool,
    },
}

/// Open a connection: validate options, connect, handshake.
///
/// # Errors
///
/// Fails with `Config` for inconsistent options, `Io`/`Tls` if the
/// transport cannot be opened, and `CapabilityRejected`,
/// `InvalidHandshakeResponse` or `HandshakeClosed` if the handshake
/// fails. No [`Connection`] exists in any of these cases.
pub async fn connect(options: ConnectOptions) -> Result<Connection> {
    options.validate()?;
    let transport = Transport::connect(&options).await?;
    tracing::debug!("Opened {} transport", transport.kind());
    Connection::handshake(transport, &options).await
}

/// State shared by the connection handle and its read loop.
struct Shared {
    correlator: Mutex<Correlator>,
    events: broadcast::Sender<Event>,
}

impl Shared {
    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Decode, classify and route one complete message.
    fn dispatch(&self, frame: &Frame, options: &DecodeOptions) {
        let outcome = deserialize(frame.as_bytes(), options);

        match classify(&frame.header, outcome) {
            Classified::Reply(outcome) => self.correlate(outcome),
            Classified::Push(value) => {
                tracing::trace!("Update received");
                self.emit(Event::Update(value));
            }
            Classified::Unclassified(outcome) => {
                tracing::trace!(
                    "Correlating message of type {} as a reply",
                    frame.message_type()
                );
                self.correlate(outcome);
            }
        }
    }

    fn correlate(&self, outcome: Outcome) {
        let (response_no, delivered) = self.correlator.lock().resolve_next(outcome);
        if !delivered {
            tracing::debug!("Dropping message {} with no pending request", response_no);
        }
    }
}

/// Settings the read loop needs.
#[derive(Debug, Clone, Copy)]
struct ReadConfig {
    decode: DecodeOptions,
    socket_timeout: Option<Duration>,
    max_message_size: u32,
}

/// An open, authenticated connection.
///
/// Sync calls are numbered in the order they reach the writer, and the
/// N-th correlated inbound message resolves the N-th call. The server
/// must answer in order.
pub struct Connection {
    shared: Arc<Shared>,
    writer: WriterHandle,
    capability: u8,
    decode: DecodeOptions,
    closed: watch::Receiver<bool>,
    read_task: JoinHandle<()>,
}

impl Connection {
    /// Run the handshake over an already connected stream and start
    /// streaming.
    pub async fn handshake<S>(mut stream: S, options: &ConnectOptions) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let capability = negotiate(&mut stream, &options.handshake_credentials()).await?;
        Ok(Self::start(stream, capability, options))
    }

    fn start<S>(stream: S, capability: u8, options: &ConnectOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, options.writer.clone());

        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let shared = Arc::new(Shared {
            correlator: Mutex::new(Correlator::new()),
            events,
        });

        // A failed writer ends the read loop, which runs the teardown.
        let (failed_tx, writer_failed) = oneshot::channel();
        tokio::spawn(async move {
            let failure = match writer_task.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(e) => Error::Io(std::io::Error::other(e)),
            };
            tracing::warn!("Writer stopped: {}", failure);
            let _ = failed_tx.send(failure);
        });

        let decode = DecodeOptions {
            max_message_size: options.max_message_size,
            ..options.decode
        };
        let config = ReadConfig {
            decode,
            socket_timeout: options.socket_timeout,
            max_message_size: options.max_message_size,
        };
        let (closed_tx, closed) = watch::channel(false);
        let read_task = tokio::spawn(Self::read_loop(
            reader,
            shared.clone(),
            config,
            writer_failed,
            closed_tx,
        ));

        Connection {
            shared,
            writer,
            capability,
            decode,
            closed,
            read_task,
        }
    }

    /// Read loop wrapper: runs until EOF, a read error or a writer
    /// failure, then tears down.
    async fn read_loop<R>(
        mut reader: R,
        shared: Arc<Shared>,
        config: ReadConfig,
        writer_failed: oneshot::Receiver<Error>,
        closed: watch::Sender<bool>,
    ) where
        R: AsyncRead + Unpin,
    {
        let outcome = tokio::select! {
            outcome = Self::pump(&mut reader, &shared, &config) => outcome,
            Ok(e) = writer_failed => Err(e),
        };

        let had_error = match outcome {
            Ok(()) => {
                tracing::debug!("Server closed the connection");
                shared.emit(Event::End);
                false
            }
            Err(e) => {
                tracing::error!("Connection error: {}", e);
                shared.emit(Event::Error(Arc::new(e)));
                true
            }
        };

        let abandoned = shared.correlator.lock().close();
        if abandoned > 0 {
            tracing::debug!("Abandoned {} pending requests", abandoned);
        }

        shared.emit(Event::Close { had_error });
        closed.send_replace(true);
    }

    /// Read bytes and dispatch every complete message, in arrival order.
    async fn pump<R>(reader: &mut R, shared: &Shared, config: &ReadConfig) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_message(config.max_message_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match config.socket_timeout {
                Some(idle) => match tokio::time::timeout(idle, reader.read(&mut buf)).await {
                    Ok(read) => read?,
                    Err(_) => {
                        tracing::warn!("No data received for {:?}", idle);
                        shared.emit(Event::Timeout);
                        continue;
                    }
                },
                None => reader.read(&mut buf).await?,
            };

            if n == 0 {
                if !frame_buffer.is_empty() {
                    tracing::debug!(
                        "Discarding {} bytes of an incomplete message",
                        frame_buffer.len()
                    );
                }
                return Ok(());
            }

            let frames = frame_buffer
                .push(&buf[..n])
                .inspect_err(|e| tracing::warn!("Framing failed: {}", e))?;

            for frame in &frames {
                shared.dispatch(frame, &config.decode);
            }
        }
    }

    /// Send a sync request and wait for its reply.
    ///
    /// A string is sent as a char vector, which the server evaluates as
    /// q code. Server errors come back as [`Error::Server`]; undecodable
    /// replies as [`Error::Decode`]. If the connection ends first the
    /// call fails with [`Error::ConnectionClosed`].
    pub async fn call(&self, query: impl Into<K>) -> Result<K> {
        self.request(&query.into()).await
    }

    /// Send a sync request `(function; args...)` and wait for its reply.
    pub async fn call_with<I>(&self, function: &str, args: I) -> Result<K>
    where
        I: IntoIterator<Item = K>,
    {
        self.request(&call_payload(function, args)).await
    }

    async fn request(&self, payload: &K) -> Result<K> {
        let mut message = serialize(payload)?;
        set_message_type(&mut message, MessageType::Sync);
        let (frame, written) = OutboundFrame::with_completion(Bytes::from(message));

        // Numbering and queueing happen under one lock so that request
        // numbers follow wire order.
        let permit = self.writer.reserve().await?;
        let reply = {
            let mut correlator = self.shared.correlator.lock();
            let (request_no, reply) = correlator.register_next()?;
            permit.send(frame);
            tracing::trace!("Queued request {}", request_no);
            reply
        };

        written.await.map_err(|_| Error::ConnectionClosed)?;
        reply.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Wait for the next correlated inbound message without sending
    /// anything.
    ///
    /// Takes the next request number, so it receives whatever message
    /// would have answered a sync call made at this point.
    pub async fn next_message(&self) -> Result<K> {
        let (request_no, reply) = self.shared.correlator.lock().register_next()?;
        tracing::trace!("Listening as request {}", request_no);
        reply.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Send an async message; resolves once it has been written.
    ///
    /// No reply is expected and no sequence number is used.
    pub async fn send(&self, query: impl Into<K>) -> Result<()> {
        self.post(&query.into()).await
    }

    /// Send an async message `(function; args...)`.
    pub async fn send_with<I>(&self, function: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
    {
        self.post(&call_payload(function, args)).await
    }

    async fn post(&self, payload: &K) -> Result<()> {
        let message = serialize(payload)?;
        let (frame, written) = OutboundFrame::with_completion(Bytes::from(message));
        self.writer.send(frame).await?;
        written.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Subscribe to updates and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Capability byte the server accepted in the handshake.
    pub fn capability(&self) -> u8 {
        self.capability
    }

    /// Options handed to the codec for inbound messages.
    pub fn decode_options(&self) -> &DecodeOptions {
        &self.decode
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.lock().pending()
    }

    /// Next request and response sequence numbers.
    pub fn sequence_numbers(&self) -> (u64, u64) {
        let correlator = self.shared.correlator.lock();
        (correlator.next_request_no(), correlator.next_response_no())
    }

    /// True once the read loop has ended.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Half-close the socket and wait until the connection is fully closed.
    ///
    /// Messages already queued are written first. Calls still pending when
    /// the connection closes fail with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        self.writer.shutdown().await;

        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("capability", &self.capability)
            .field("pending_requests", &self.pending_requests())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// `(function; args...)` as a general list.
fn call_payload<I>(function: &str, args: I) -> K
where
    I: IntoIterator<Item = K>,
{
    let mut items = vec![K::from(function)];
    items.extend(args);
    K::List(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_message, read_length, HEADER_SIZE};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadBuf};

    /// Reads from the inner stream; every write fails.
    struct BrokenWrites(DuplexStream);

    impl AsyncRead for BrokenWrites {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenWrites {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write side gone",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Answer the handshake with capability 3.
    async fn accept(server: &mut DuplexStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 64];
        while !request.contains(&0) {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed during handshake");
            request.extend_from_slice(&buf[..n]);
        }
        server.write_all(&[3]).await.unwrap();
    }

    async fn connected(options: ConnectOptions) -> (Connection, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        let (conn, ()) = tokio::join!(Connection::handshake(client, &options), accept(&mut server));
        (conn.unwrap(), server)
    }

    async fn read_message(server: &mut DuplexStream) -> Vec<u8> {
        let mut message = vec![0u8; HEADER_SIZE];
        server.read_exact(&mut message).await.unwrap();
        let length = read_length(&message).unwrap() as usize;
        message.resize(length, 0);
        server.read_exact(&mut message[HEADER_SIZE..]).await.unwrap();
        message
    }

    fn reply(value: &K) -> Vec<u8> {
        let mut message = serialize(value).unwrap();
        set_message_type(&mut message, MessageType::Response);
        message
    }

    fn update() -> K {
        K::List(vec![
            K::symbol("upd"),
            K::symbol("trade"),
            K::Longs(vec![42]),
        ])
    }

    fn options() -> ConnectOptions {
        ConnectOptions::tcp("localhost", 5001)
    }

    #[tokio::test]
    async fn test_call_receives_reply() {
        let (conn, mut server) = connected(options()).await;
        assert_eq!(conn.capability(), 3);

        let (result, ()) = tokio::join!(conn.call("1+1"), async {
            let request = read_message(&mut server).await;
            assert_eq!(request[1], MessageType::Sync.as_u8());
            assert_eq!(
                deserialize(&request, &DecodeOptions::raw()).unwrap(),
                K::from("1+1")
            );
            server.write_all(&reply(&K::Long(2))).await.unwrap();
        });

        assert_eq!(result.unwrap(), K::Long(2));
        assert_eq!(conn.sequence_numbers(), (2, 2));
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_call_with_builds_general_list() {
        let (conn, mut server) = connected(options()).await;

        let (result, ()) = tokio::join!(
            conn.call_with("sum", [K::Longs(vec![1, 2, 3])]),
            async {
                let request = read_message(&mut server).await;
                assert_eq!(
                    deserialize(&request, &DecodeOptions::raw()).unwrap(),
                    K::List(vec![K::from("sum"), K::Longs(vec![1, 2, 3])])
                );
                server.write_all(&reply(&K::Long(6))).await.unwrap();
            }
        );

        assert_eq!(result.unwrap(), K::Long(6));
    }

    #[tokio::test]
    async fn test_server_error_reaches_caller() {
        let (conn, mut server) = connected(options()).await;

        let (result, ()) = tokio::join!(conn.call("1+`a"), async {
            read_message(&mut server).await;
            let error = build_message(MessageType::Response, &[0x80, b't', b'y', b'p', b'e', 0]);
            server.write_all(&error).await.unwrap();
        });

        match result {
            Err(Error::Server(message)) => assert_eq!(message, "type"),
            other => panic!("expected server error, got {:?}", other),
        }
        // The connection survives a failed call.
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_next_message_receives_unsolicited_message() {
        let (conn, mut server) = connected(options()).await;

        // Async-typed, not an update: correlated like a reply.
        let message = serialize(&K::symbol("hello")).unwrap();
        let (result, ()) = tokio::join!(conn.next_message(), async {
            server.write_all(&message).await.unwrap();
        });

        assert_eq!(result.unwrap(), K::symbol("hello"));
        assert_eq!(conn.sequence_numbers(), (2, 2));
    }

    #[tokio::test]
    async fn test_update_is_broadcast() {
        let (conn, mut server) = connected(options()).await;
        let mut events = conn.subscribe();

        server
            .write_all(&serialize(&update()).unwrap())
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            Event::Update(value) => assert_eq!(value, update()),
            other => panic!("expected update, got {:?}", other),
        }
        assert_eq!(conn.sequence_numbers(), (1, 1));
    }

    #[tokio::test]
    async fn test_send_does_not_use_sequence_numbers() {
        let (conn, mut server) = connected(options()).await;

        conn.send_with("upd", [K::symbol("t"), K::Long(1)]).await.unwrap();

        let message = read_message(&mut server).await;
        assert_eq!(message[1], MessageType::Async.as_u8());
        assert_eq!(conn.sequence_numbers(), (1, 1));
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_socket_timeout_emits_event_and_keeps_reading() {
        let options = options().socket_timeout(Duration::from_millis(20));
        let (conn, mut server) = connected(options).await;
        let mut events = conn.subscribe();

        assert!(matches!(events.recv().await.unwrap(), Event::Timeout));
        assert!(!conn.is_closed());

        let (result, ()) = tokio::join!(conn.call("x"), async {
            read_message(&mut server).await;
            server.write_all(&reply(&K::Long(1))).await.unwrap();
        });
        assert_eq!(result.unwrap(), K::Long(1));
    }

    #[tokio::test]
    async fn test_server_eof_ends_pending_calls() {
        let (conn, mut server) = connected(options()).await;
        let mut events = conn.subscribe();

        let (result, ()) = tokio::join!(conn.call("slow"), async {
            read_message(&mut server).await;
            server.shutdown().await.unwrap();
        });

        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(matches!(events.recv().await.unwrap(), Event::End));
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::Close { had_error: false }
        ));
        assert!(conn.is_closed());
        assert!(matches!(
            conn.call("again").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_impossible_length_closes_with_error() {
        let (conn, mut server) = connected(options()).await;
        let mut events = conn.subscribe();

        // Declared length 4 is shorter than the header.
        server
            .write_all(&[1, 2, 0, 0, 4, 0, 0, 0])
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            Event::Error(e) => assert!(matches!(*e, Error::Protocol(_))),
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::Close { had_error: true }
        ));
    }

    #[tokio::test]
    async fn test_writer_failure_closes_with_error() {
        let (client, _server) = duplex(1024);
        let conn = Connection::start(BrokenWrites(client), 3, &options());
        let mut events = conn.subscribe();

        let (call, listener) = tokio::join!(conn.call("x"), conn.next_message());
        assert!(matches!(call, Err(Error::ConnectionClosed)));
        assert!(matches!(listener, Err(Error::ConnectionClosed)));

        match events.recv().await.unwrap() {
            Event::Error(e) => assert!(
                matches!(*e, Error::Io(ref source) if source.kind() == io::ErrorKind::BrokenPipe)
            ),
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::Close { had_error: true }
        ));

        tokio::time::timeout(Duration::from_secs(1), conn.close())
            .await
            .expect("close returns after a writer failure");
        assert!(conn.is_closed());
        assert_eq!(conn.pending_requests(), 0);
        assert!(matches!(conn.send("late").await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_decode_options_carry_message_limit() {
        let (conn, _server) = connected(options().max_message_size(1024)).await;
        assert_eq!(conn.decode_options().max_message_size, 1024);
        assert!(conn.decode_options().flip_tables);
    }

    #[tokio::test]
    async fn test_close_waits_for_server() {
        let (conn, mut server) = connected(options()).await;

        let peer = tokio::spawn(async move {
            let mut rest = Vec::new();
            server.read_to_end(&mut rest).await.unwrap();
            drop(server);
            rest
        });

        conn.close().await;
        assert!(conn.is_closed());
        assert!(peer.await.unwrap().is_empty());
    }

    #[test]
    fn test_call_payload() {
        assert_eq!(
            call_payload("f", [K::Long(1), K::symbol("a")]),
            K::List(vec![K::from("f"), K::Long(1), K::symbol("a")])
        );
        assert_eq!(
            call_payload("f", std::iter::empty()),
            K::List(vec![K::from("f")])
        );
    }
}
