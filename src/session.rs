//! Session builder and runtime loop.
//!
//! The [`SessionBuilder`] configures a session and binds it to a stream.
//! The running [`Session`] manages the lifecycle:
//! 1. Split the stream into read and write halves
//! 2. Spawn the writer task on the write half
//! 3. Spawn the read loop: bytes → assembler → codec → dispatcher
//! 4. On EOF, a read or write error, or a framing error: unbind the stream
//!    and fail every pending request with `SessionClosed`
//!
//! # Example
//!
//! ```ignore
//! use diameter_session::{Session, SessionConfig};
//!
//! let stream = tokio::net::TcpStream::connect("hss.example.org:3868").await?;
//! let (session, mut inbound) = Session::builder()
//!     .config(SessionConfig::new().with_session_id("mme.example.org;1;1"))
//!     .start(stream);
//!
//! let request = session.create_request(16777251, 316);
//! let answer = session.send_request(request).await?;
//!
//! while let Some(request) = inbound.recv().await {
//!     request.respond().await?;
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::allocator::RequestIdAllocator;
use crate::codec::{BasicCodec, Codec};
use crate::config::SessionConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::{Result, SessionError};
use crate::hooks::{MessageHook, MessageHooks};
use crate::protocol::{Message, StreamAssembler, HEADER_SIZE};
use crate::responder::InboundRequests;
use crate::transaction::{PendingTransaction, TransactionGuard, TransactionTable};
use crate::writer::{spawn_writer_task, OutboundMessage, WriterConfig, WriterHandle};

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Built without a stream; sends fail with `SocketUnbound`.
    Unbound,
    /// Stream bound and read loop running.
    Open,
    /// Stream ended or the session was closed.
    Closed,
    /// Read loop stopped on a fatal error.
    Failed(String),
}

/// State shared by the session handle, its read loop and its responders.
pub(crate) struct SessionShared {
    pub(crate) config: SessionConfig,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) ids: RequestIdAllocator,
    pub(crate) transactions: TransactionTable,
    pub(crate) hooks: MessageHooks,
    writer: RwLock<Option<WriterHandle>>,
    state: watch::Sender<SessionState>,
}

impl SessionShared {
    pub(crate) fn new(config: SessionConfig, codec: Arc<dyn Codec>, hooks: MessageHooks) -> Self {
        let (state, _) = watch::channel(SessionState::Unbound);
        Self {
            transactions: TransactionTable::new(config.max_pending_requests),
            ids: RequestIdAllocator::new(),
            config,
            codec,
            hooks,
            writer: RwLock::new(None),
            state,
        }
    }

    /// Handle to the active stream's writer.
    pub(crate) fn writer(&self) -> Result<WriterHandle> {
        self.writer.read().clone().ok_or(SessionError::SocketUnbound)
    }

    fn bind(&self, writer: WriterHandle) {
        *self.writer.write() = Some(writer);
        self.state.send_replace(SessionState::Open);
    }

    /// Unbind the stream and fail everything still pending.
    ///
    /// Only the first teardown picks the final state.
    fn teardown(&self, state: SessionState) {
        self.writer.write().take();
        let changed = self.state.send_if_modified(|current| match current {
            SessionState::Unbound | SessionState::Open => {
                *current = state;
                true
            }
            _ => false,
        });
        let failed = self.transactions.fail_all();
        if changed {
            tracing::debug!(failed, state = ?*self.state.borrow(), "session torn down");
        }
    }
}

/// Builder for configuring and starting a session.
pub struct SessionBuilder {
    config: SessionConfig,
    codec: Option<Arc<dyn Codec>>,
    hooks: MessageHooks,
}

impl SessionBuilder {
    /// Create a builder with default configuration and [`BasicCodec`].
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            codec: None,
            hooks: MessageHooks::default(),
        }
    }

    /// Use the given configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom codec.
    pub fn codec<C: Codec + 'static>(mut self, codec: C) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Observe outbound requests and inbound requests.
    pub fn before_any_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.hooks.before_any_message = Some(Arc::new(hook) as MessageHook);
        self
    }

    /// Observe outbound answers and matched inbound answers.
    pub fn after_any_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.hooks.after_any_message = Some(Arc::new(hook) as MessageHook);
        self
    }

    fn into_shared(self) -> Arc<SessionShared> {
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(BasicCodec::new()) as Arc<dyn Codec>);
        Arc::new(SessionShared::new(self.config, codec, self.hooks))
    }

    /// Build a session with no stream.
    ///
    /// Requests can be created, but sending fails with `SocketUnbound` and
    /// the inbound request stream is already finished.
    pub fn build(self) -> (Session, InboundRequests) {
        let shared = self.into_shared();
        let (_, rx) = mpsc::channel(1);
        let session = Session::new(shared, None, None);
        (session, InboundRequests::new(rx))
    }

    /// Bind the session to a duplex byte stream and start its tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(self, stream: S) -> (Session, InboundRequests)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = self.into_shared();
        let (read_half, write_half) = tokio::io::split(stream);

        let writer_shared = Arc::downgrade(&shared);
        let (writer, writer_task) =
            spawn_writer_task(write_half, WriterConfig::from(&shared.config), move |e| {
                if let Some(shared) = writer_shared.upgrade() {
                    shared.teardown(SessionState::Failed(e.to_string()));
                }
            });
        shared.bind(writer);

        let (inbound_tx, inbound_rx) = mpsc::channel(shared.config.inbound_queue_capacity.max(1));
        let dispatcher = MessageDispatcher::new(shared.clone(), inbound_tx);

        let loop_shared = shared.clone();
        let reader_task = tokio::spawn(async move {
            let state = match read_loop(read_half, &loop_shared, dispatcher).await {
                Ok(()) => {
                    tracing::debug!("peer closed stream");
                    SessionState::Closed
                }
                Err(e) => {
                    tracing::error!(error = %e, "session read loop failed");
                    SessionState::Failed(e.to_string())
                }
            };
            loop_shared.teardown(state);
        });

        let session = Session::new(shared, Some(reader_task), Some(writer_task));
        (session, InboundRequests::new(inbound_rx))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the stream and dispatches every complete message.
///
/// Returns `Ok(())` on EOF. Framing and I/O errors end the loop; a message
/// that fails to decode is logged and skipped.
async fn read_loop<R>(
    mut reader: R,
    shared: &SessionShared,
    dispatcher: MessageDispatcher,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut assembler = StreamAssembler::with_max_length(shared.config.max_message_length);
    let mut buf = vec![0u8; shared.config.read_buffer_size.max(HEADER_SIZE)];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(SessionError::Io(e)),
        };

        for bytes in assembler.ingest(&buf[..n])? {
            match shared.codec.decode_message(bytes) {
                Ok(message) => {
                    dispatcher.dispatch(message);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable message");
                }
            }
        }

        // Messages ahead of a bad header were dispatched above.
        if let Some(e) = assembler.framing_error() {
            return Err(e);
        }
    }
}

/// A running session.
///
/// Dropping the session stops its tasks and fails every pending request.
pub struct Session {
    shared: Arc<SessionShared>,
    state_rx: watch::Receiver<SessionState>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<Result<()>>>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    fn new(
        shared: Arc<SessionShared>,
        reader_task: Option<JoinHandle<()>>,
        writer_task: Option<JoinHandle<Result<()>>>,
    ) -> Self {
        let state_rx = shared.state.subscribe();
        Self {
            shared,
            state_rx,
            reader_task,
            writer_task,
        }
    }

    /// Build a request skeleton carrying the configured Session-Id.
    pub fn create_request(&self, application_id: u32, command_code: u32) -> Message {
        self.shared.codec.construct_request(
            application_id,
            command_code,
            self.shared.config.session_id.as_deref(),
        )
    }

    /// Send a request and wait for its answer, using the configured timeout.
    pub async fn send_request(&self, request: Message) -> Result<Message> {
        self.send_request_with_timeout(request, self.shared.config.request_timeout())
            .await
    }

    /// Send a request and wait for its answer.
    ///
    /// The request gets a fresh hop-by-hop id; any id already set is
    /// replaced. The transaction is registered before the bytes are queued
    /// for writing, so an answer can never arrive ahead of its entry.
    ///
    /// # Errors
    ///
    /// - `SocketUnbound` if no stream is bound (nothing is registered)
    /// - `RequestTimeout` if no answer arrives within `timeout`
    /// - `SessionClosed` if the session is torn down first
    /// - `DuplicateTransaction` / `TooManyPending` if registration fails
    pub async fn send_request_with_timeout(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Message> {
        let shared = &*self.shared;
        if !self.is_bound() {
            return Err(SessionError::SocketUnbound);
        }

        let hop_by_hop_id = shared.ids.next();
        let request = request.with_hop_by_hop_id(hop_by_hop_id);
        shared.hooks.before(&request);
        let bytes = shared.codec.encode_message(&request)?;

        tracing::debug!(
            hop_by_hop_id,
            command_code = request.command_code(),
            application_id = request.application_id(),
            length = bytes.len(),
            timeout_ms = timeout.as_millis() as u64,
            "sending request"
        );

        let deadline = Instant::now() + timeout;
        let (txn, mut completion) = PendingTransaction::new(request, deadline);

        // Teardown clears the slot before failing the table, so an entry
        // registered under the read lock is always seen by `fail_all`.
        let writer = {
            let slot = shared.writer.read();
            let writer = slot.clone().ok_or(SessionError::SocketUnbound)?;
            shared.transactions.register(hop_by_hop_id, txn)?;
            writer
        };
        let mut guard = TransactionGuard::new(&shared.transactions, hop_by_hop_id);

        writer
            .send(OutboundMessage::new(bytes, hop_by_hop_id))
            .await?;
        drop(writer);

        let timed = tokio::time::timeout_at(deadline, &mut completion).await;
        let outcome = match timed {
            Ok(received) => received,
            Err(_) => {
                // Whoever removes the entry first decides the outcome; if the
                // answer got there first it is already in the channel.
                shared.transactions.expire(hop_by_hop_id, timeout);
                completion.await
            }
        };
        guard.disarm();

        outcome.unwrap_or(Err(SessionError::SessionClosed))
    }

    /// Number of requests awaiting an answer.
    pub fn pending_requests(&self) -> usize {
        self.shared.transactions.len()
    }

    /// Number of encoded messages queued but not yet written.
    pub fn queued_writes(&self) -> usize {
        self.shared.writer().map(|w| w.pending_count()).unwrap_or(0)
    }

    /// Whether a stream is currently bound.
    pub fn is_bound(&self) -> bool {
        self.shared.writer.read().is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Wait until the session is no longer open.
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        // Bound first so the borrow of `rx` ends before it is dropped.
        let state = match rx.wait_for(|state| *state != SessionState::Open).await {
            Ok(state) => state.clone(),
            Err(_) => SessionState::Closed,
        };
        state
    }

    /// Close the session.
    ///
    /// Stops reading, fails pending requests with `SessionClosed`, and lets
    /// the writer flush what is already queued before shutting the stream.
    pub fn close(&self) {
        if let Some(task) = &self.reader_task {
            task.abort();
        }
        self.shared.teardown(SessionState::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        self.shared.teardown(SessionState::Closed);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .field("hooks", &self.shared.hooks)
            .finish()
    }
}
