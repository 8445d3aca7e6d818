//! Error types for diameter-session.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request was sent while no stream is bound to the session.
    #[error("Socket not bound to session")]
    SocketUnbound,

    /// No matching response arrived before the deadline.
    #[error("Request timed out, no response was received in {}ms (hop-by-hop id {hop_by_hop_id})", timeout.as_millis())]
    RequestTimeout {
        /// Correlation id of the request that timed out.
        hop_by_hop_id: u32,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A response arrived for a correlation id with no pending transaction.
    #[error("Unmatched response for hop-by-hop id {0}")]
    UnmatchedResponse(u32),

    /// The inbound byte stream is structurally invalid.
    #[error("Framing error: {0}")]
    Framing(String),

    /// A single message could not be decoded or encoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The session was torn down while the operation was pending.
    #[error("Session closed")]
    SessionClosed,

    /// A transaction with this correlation id is already outstanding.
    #[error("Transaction already pending for hop-by-hop id {0}")]
    DuplicateTransaction(u32),

    /// The outstanding transaction limit was reached.
    #[error("Too many pending requests (limit {0})")]
    TooManyPending(usize),

    /// The completion callback of an inbound request was invoked twice.
    #[error("Response already sent for hop-by-hop id {0}")]
    ResponseAlreadySent(u32),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl SessionError {
    /// Whether this error terminates the session.
    ///
    /// Framing and stream I/O errors leave the parse position untrusted;
    /// everything else only affects a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Framing(_) | SessionError::Io(_))
    }
}

/// Result type alias using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::Framing("bad length".into()).is_fatal());
        assert!(SessionError::Io(std::io::Error::other("reset")).is_fatal());
        assert!(!SessionError::SocketUnbound.is_fatal());
        assert!(!SessionError::UnmatchedResponse(7).is_fatal());
        assert!(!SessionError::SessionClosed.is_fatal());
    }

    #[test]
    fn test_timeout_message() {
        let err = SessionError::RequestTimeout {
            hop_by_hop_id: 42,
            timeout: Duration::from_millis(50),
        };
        let text = err.to_string();
        assert!(text.contains("50ms"));
        assert!(text.contains("42"));
    }
}
