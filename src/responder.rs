//! Answering inbound requests.
//!
//! Each inbound request reaches the application as an [`InboundRequest`]:
//! the decoded request, an answer skeleton built by the codec, and a
//! [`Responder`] that sends the finished answer back on the stream.
//!
//! # Example
//!
//! ```ignore
//! while let Some(request) = inbound.recv().await {
//!     let mut answer = request.response.clone();
//!     answer.body = build_avps(&request.message);
//!     request.responder.respond(answer).await?;
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::protocol::Message;
use crate::session::SessionShared;
use crate::writer::OutboundMessage;

/// One-shot completion callback for an inbound request.
///
/// `Responder` is `Clone` so it can move between tasks, but all clones share
/// one flag: the first `respond` call sends, every later call fails with
/// [`SessionError::ResponseAlreadySent`]. Answers to different requests
/// may be sent in any order.
#[derive(Clone)]
pub struct Responder {
    shared: Arc<SessionShared>,
    hop_by_hop_id: u32,
    responded: Arc<AtomicBool>,
}

impl Responder {
    pub(crate) fn new(shared: Arc<SessionShared>, hop_by_hop_id: u32) -> Self {
        Self {
            shared,
            hop_by_hop_id,
            responded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hop-by-hop id of the request being answered.
    #[inline]
    pub fn hop_by_hop_id(&self) -> u32 {
        self.hop_by_hop_id
    }

    /// Whether an answer has already been submitted.
    #[inline]
    pub fn is_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Encode `response` and write it to the stream.
    ///
    /// The request counts as answered as soon as this is called, so a
    /// failed attempt (for example `SocketUnbound`) is not retried by a
    /// second call. Answers are sent at most once.
    ///
    /// # Errors
    ///
    /// - `ResponseAlreadySent` if this request was already answered
    /// - `SocketUnbound` if the session lost its stream
    /// - `Codec` if the answer cannot be encoded
    pub async fn respond(&self, response: Message) -> Result<()> {
        if self.responded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                hop_by_hop_id = self.hop_by_hop_id,
                "completion callback invoked more than once"
            );
            return Err(SessionError::ResponseAlreadySent(self.hop_by_hop_id));
        }

        let writer = self.shared.writer()?;
        self.shared.hooks.after(&response);
        let bytes = self.shared.codec.encode_message(&response)?;

        tracing::debug!(
            hop_by_hop_id = response.hop_by_hop_id(),
            command_code = response.command_code(),
            length = bytes.len(),
            "sending answer"
        );
        writer
            .send(OutboundMessage::new(bytes, response.hop_by_hop_id()))
            .await
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("hop_by_hop_id", &self.hop_by_hop_id)
            .field("responded", &self.is_responded())
            .finish()
    }
}

/// A request received from the peer.
#[derive(Debug)]
pub struct InboundRequest {
    /// The decoded request.
    pub message: Message,
    /// Answer skeleton mirroring the request's identifiers.
    pub response: Message,
    /// Completion callback for the answer.
    pub responder: Responder,
}

impl InboundRequest {
    /// Send the prepared skeleton unchanged as the answer.
    pub async fn respond(self) -> Result<()> {
        self.responder.respond(self.response).await
    }
}

/// Stream of inbound requests for one session.
///
/// Ends (`recv` returns `None`) once the session's stream is gone.
#[derive(Debug)]
pub struct InboundRequests {
    rx: mpsc::Receiver<InboundRequest>,
}

impl InboundRequests {
    pub(crate) fn new(rx: mpsc::Receiver<InboundRequest>) -> Self {
        Self { rx }
    }

    /// Wait for the next inbound request.
    pub async fn recv(&mut self) -> Option<InboundRequest> {
        self.rx.recv().await
    }

    /// Take an inbound request if one is queued.
    pub fn try_recv(&mut self) -> Option<InboundRequest> {
        self.rx.try_recv().ok()
    }
}
