//! Session configuration.
//!
//! All fields have defaults, so a partial JSON document is enough:
//!
//! ```
//! use diameter_session::SessionConfig;
//!
//! let config = SessionConfig::from_json_str(r#"{ "request_timeout_ms": 500 }"#).unwrap();
//! assert_eq!(config.request_timeout().as_millis(), 500);
//! assert_eq!(config.session_id, None);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::MAX_MESSAGE_LENGTH;

/// Request timeout used when none is configured (3 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Default limit on outstanding outbound requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 65536;

/// Default capacity of the inbound request queue.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Default size of each stream read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default maximum queued writes before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_WRITES: usize = 1024;

/// Default writer channel capacity.
pub const DEFAULT_WRITE_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout (5 seconds).
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 5000;

/// Configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session-Id placed in requests built by `create_request`.
    pub session_id: Option<String>,
    /// Default deadline for `send_request`, in milliseconds.
    pub request_timeout_ms: u64,
    /// Largest inbound message accepted before a framing error.
    pub max_message_length: u32,
    /// Maximum outstanding outbound requests.
    pub max_pending_requests: usize,
    /// Capacity of the inbound request queue. Requests arriving while it is
    /// full are dropped.
    pub inbound_queue_capacity: usize,
    /// Size of each read from the stream.
    pub read_buffer_size: usize,
    /// Maximum queued writes before senders wait.
    pub max_pending_writes: usize,
    /// Writer channel capacity.
    pub write_channel_capacity: usize,
    /// How long a sender waits on backpressure, in milliseconds.
    pub backpressure_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_message_length: MAX_MESSAGE_LENGTH,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_pending_writes: DEFAULT_MAX_PENDING_WRITES,
            write_channel_capacity: DEFAULT_WRITE_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the Session-Id used for constructed requests.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Default request timeout.
    ///
    /// A zero value falls back to [`DEFAULT_REQUEST_TIMEOUT_MS`].
    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout_ms {
            0 => Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    /// How long a send waits for the write queue to drain.
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}
