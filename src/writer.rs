//! Dedicated writer task for outbound messages.
//!
//! Every sender (outbound requests, inbound request responders) hands its
//! encoded message to one writer task over an mpsc channel. The task owns
//! the write half of the stream, so concurrent senders never interleave
//! bytes and messages go out in the order they were queued.
//!
//! # Architecture
//!
//! ```text
//! send_request ─┐
//! Responder 1  ─┼─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► Stream
//! Responder N  ─┘
//! ```
//!
//! Queued messages are batched into vectored writes.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{
    SessionConfig, DEFAULT_BACKPRESSURE_TIMEOUT_MS, DEFAULT_MAX_PENDING_WRITES,
    DEFAULT_WRITE_CHANNEL_CAPACITY,
};
use crate::error::{Result, SessionError};

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded message ready to be written to the stream.
#[derive(Debug)]
pub(crate) struct OutboundMessage {
    /// Complete wire bytes (header + body).
    pub bytes: Bytes,
    /// Correlation id, for logging.
    pub hop_by_hop_id: u32,
}

impl OutboundMessage {
    #[inline]
    pub(crate) fn new(bytes: Bytes, hop_by_hop_id: u32) -> Self {
        Self {
            bytes,
            hop_by_hop_id,
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub(crate) struct WriterConfig {
    /// Maximum queued messages before backpressure kicks in.
    pub max_pending: usize,
    /// Channel capacity for the message queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING_WRITES,
            channel_capacity: DEFAULT_WRITE_CHANNEL_CAPACITY,
            backpressure_timeout: Duration::from_millis(DEFAULT_BACKPRESSURE_TIMEOUT_MS),
        }
    }
}

impl From<&SessionConfig> for WriterConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_pending: config.max_pending_writes.max(1),
            channel_capacity: config.write_channel_capacity.max(1),
            backpressure_timeout: config.backpressure_timeout(),
        }
    }
}

/// Handle for queueing messages on the writer task.
///
/// This is cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
    /// Messages queued but not yet written.
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundMessage>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a message for writing.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration. Fails with `SessionClosed` once the writer task is gone.
    pub(crate) async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Count before sending so the writer never decrements below zero.
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(message).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            SessionError::SessionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(SessionError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Current queued message count.
    #[inline]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for queueing messages.
///
/// `on_error` runs once if a write fails and the task stops.
pub(crate) fn spawn_writer_task<W, F>(
    writer: W,
    config: WriterConfig,
    on_error: F,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnOnce(&SessionError) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, pending).await;
        if let Err(e) = &result {
            on_error(e);
        }
        result
    });

    (handle, task)
}

/// Receives messages and writes them to the stream until every handle is
/// dropped.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(m) => m,
            None => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!(error = %e, batch_size, "stream write failed");
            return Err(e);
        }
        tracing::trace!(
            batch_size,
            first_hop_by_hop_id = batch[0].hop_by_hop_id,
            "wrote batch"
        );

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Write a batch of messages using vectored I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundMessage]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|m| m.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for data not yet written.
fn build_remaining_slices(batch: &[OutboundMessage], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for message in batch {
        let start = offset;
        let end = offset + message.size();

        if skip_bytes < end && !message.bytes.is_empty() {
            let start_in_message = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&message.bytes[start_in_message..]));
        }
        offset = end;
    }

    slices
}
