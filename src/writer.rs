//! Dedicated writer task for outbound messages.
//!
//! Every outbound message is a complete, already-encoded IPC message
//! (header + body). Callers hand them to a single writer task through a
//! bounded mpsc channel, so the socket has exactly one writer and frames
//! reach the wire in the order they were queued.
//!
//! # Architecture
//!
//! ```text
//! call()  ─┐
//! send()  ─┼─► mpsc::Sender<Command> ─► Writer Task ─► socket write half
//! close() ─┘
//! ```
//!
//! Frames that are ready together are batched into one vectored write.
//! A frame may carry a completion signal that fires once its batch has
//! been written and flushed.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A complete message ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded message, header included.
    pub bytes: Bytes,
    /// Fired after the bytes were written and flushed.
    written: Option<oneshot::Sender<()>>,
}

impl OutboundFrame {
    /// Create a frame plus a receiver that resolves on write completion.
    ///
    /// The receiver errors if the frame is dropped unwritten.
    pub fn with_completion(bytes: Bytes) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                bytes,
                written: Some(tx),
            },
            rx,
        )
    }

    /// Total size of this frame.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn complete(&mut self) {
        if let Some(tx) = self.written.take() {
            let _ = tx.send(());
        }
    }
}

/// Messages accepted by the writer task.
#[derive(Debug)]
enum Command {
    Frame(OutboundFrame),
    /// Flush, shut the write side down, and stop.
    Shutdown,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Command>,
}

/// Reserved slot in the writer queue.
///
/// Sending through a permit never waits, so it can be done while holding
/// a synchronous lock.
#[derive(Debug)]
pub struct FramePermit<'a> {
    permit: mpsc::Permit<'a, Command>,
}

impl FramePermit<'_> {
    /// Queue the frame into the reserved slot.
    pub fn send(self, frame: OutboundFrame) {
        self.permit.send(Command::Frame(frame));
    }
}

impl WriterHandle {
    /// Send a frame to the writer task, waiting for queue capacity.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(Command::Frame(frame))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Wait for queue capacity without sending anything yet.
    ///
    /// Cancel-safe: dropping the future or the permit releases the slot.
    pub async fn reserve(&self) -> Result<FramePermit<'_>> {
        let permit = self.tx.reserve().await.map_err(|_| Error::ConnectionClosed)?;
        Ok(FramePermit { permit })
    }

    /// Ask the writer task to flush and shut the write side down.
    ///
    /// Frames queued before this call are still written. Returns without
    /// error if the task already stopped.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle yields the
/// first write error, if any.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Command>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(Command::Frame(frame)) => frame,
            Some(Command::Shutdown) => return shutdown(&mut writer).await,
            // All handles dropped
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        let mut stop = false;
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Command::Frame(frame)) => batch.push(frame),
                Ok(Command::Shutdown) => {
                    stop = true;
                    break;
                }
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
        batch.iter_mut().for_each(OutboundFrame::complete);

        if stop {
            return shutdown(&mut writer).await;
        }
    }
}

async fn shutdown<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.flush().await?;
    writer.shutdown().await?;
    tracing::debug!("Write side shut down");
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for frame in batch {
        let start = skipped;
        let end = skipped + frame.size();

        if skip_bytes < end && !frame.bytes.is_empty() {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&frame.bytes[offset..]));
        }
        skipped = end;
    }

    slices
}
