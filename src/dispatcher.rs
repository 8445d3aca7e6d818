//! Routing of assembled inbound messages.
//!
//! ```text
//!                        ┌─ R-bit set ──► InboundRequest ──► application
//!  decoded Message ──────┤
//!                        └─ R-bit clear ─► TransactionTable ──► waiting caller
//!                                                 └─ no entry ──► log, drop
//! ```
//!
//! Dispatch runs on the read loop, so it never waits: requests go through a
//! bounded queue with `try_send`, answers resolve a oneshot.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::SessionError;
use crate::protocol::Message;
use crate::responder::{InboundRequest, Responder};
use crate::session::SessionShared;

/// What happened to a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Request queued for the application.
    Request,
    /// Answer delivered to its waiting caller.
    Response,
    /// Answer with no pending transaction; dropped.
    Unmatched,
    /// Request dropped because the application queue was full or gone.
    Dropped,
}

pub(crate) struct MessageDispatcher {
    shared: Arc<SessionShared>,
    inbound: mpsc::Sender<InboundRequest>,
}

impl MessageDispatcher {
    pub(crate) fn new(shared: Arc<SessionShared>, inbound: mpsc::Sender<InboundRequest>) -> Self {
        Self { shared, inbound }
    }

    /// Route one message by its request flag.
    pub(crate) fn dispatch(&self, message: Message) -> Dispatch {
        if message.is_request() {
            self.dispatch_request(message)
        } else {
            self.dispatch_response(message)
        }
    }

    fn dispatch_request(&self, message: Message) -> Dispatch {
        let hop_by_hop_id = message.hop_by_hop_id();
        let command_code = message.command_code();
        tracing::debug!(
            hop_by_hop_id,
            command_code,
            application_id = message.application_id(),
            "received request"
        );

        let response = self.shared.codec.construct_response(&message);
        self.shared.hooks.before(&message);

        let request = InboundRequest {
            message,
            response,
            responder: Responder::new(self.shared.clone(), hop_by_hop_id),
        };

        match self.inbound.try_send(request) {
            Ok(()) => Dispatch::Request,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    hop_by_hop_id,
                    command_code,
                    "inbound request queue full, dropping request"
                );
                Dispatch::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(
                    hop_by_hop_id,
                    command_code,
                    "no receiver for inbound requests, dropping request"
                );
                Dispatch::Dropped
            }
        }
    }

    fn dispatch_response(&self, message: Message) -> Dispatch {
        let hop_by_hop_id = message.hop_by_hop_id();
        let command_code = message.command_code();
        let hooks = &self.shared.hooks;

        match self
            .shared
            .transactions
            .resolve_with_response(hop_by_hop_id, message, |answer| hooks.after(answer))
        {
            Some(_) => Dispatch::Response,
            None => {
                tracing::warn!(
                    hop_by_hop_id,
                    command_code,
                    "{}, dropping",
                    SessionError::UnmatchedResponse(hop_by_hop_id)
                );
                Dispatch::Unmatched
            }
        }
    }
}
