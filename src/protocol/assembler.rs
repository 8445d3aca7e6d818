//! Stream assembler for cutting complete messages out of a byte stream.
//!
//! Uses `bytes::BytesMut` so extracted messages share the receive buffer.
//! Parsing is a small state machine:
//! - `AwaitingHeader`: need at least 20 bytes to read the declared length
//! - `AwaitingBody`: length known, need the buffer to reach it
//! - `Failed`: a framing error was seen; nothing further is parsed
//!
//! # Example
//!
//! ```
//! use diameter_session::protocol::{build_message, Header, StreamAssembler};
//!
//! let mut assembler = StreamAssembler::new();
//! let bytes = build_message(&Header::new(0, 280, 0, 25), b"hello");
//!
//! assert!(assembler.ingest(&bytes[..23]).unwrap().is_empty());
//! let messages = assembler.ingest(&bytes[23..]).unwrap();
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].len(), 25);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_length, HEADER_SIZE, MAX_MESSAGE_LENGTH};
use crate::error::{Result, SessionError};

/// Parser state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Fewer than 20 bytes buffered for the current message.
    AwaitingHeader,
    /// Header seen, waiting until `total_length` bytes are buffered.
    AwaitingBody { total_length: usize },
    /// Parse position is no longer trustworthy.
    Failed { reason: String },
}

/// Accumulates incoming bytes and extracts complete messages.
///
/// Each extracted message is the exact byte range declared by its header
/// (header + body). Bytes past the end of the last complete message stay
/// buffered for the next call.
pub struct StreamAssembler {
    /// Accumulated bytes from stream reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Largest total length accepted before declaring a framing error.
    max_length: u32,
}

impl StreamAssembler {
    /// Create a new assembler with default settings.
    ///
    /// Default capacity: 64KB, max length: the 24-bit field limit.
    pub fn new() -> Self {
        Self::with_max_length(MAX_MESSAGE_LENGTH)
    }

    /// Create a new assembler with a custom maximum message length.
    pub fn with_max_length(max_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::AwaitingHeader,
            max_length,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// Returns the complete messages in stream order (may be empty if
    /// still waiting for data).
    ///
    /// Messages completed ahead of a bad header in the same chunk are still
    /// returned; the framing error is then reported by
    /// [`framing_error`](Self::framing_error) and by every later call. The
    /// sequence of emitted messages is the same however the stream is
    /// chunked.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Framing` if a header declares a length smaller
    /// than the header itself or above the configured maximum. After that
    /// every call fails the same way.
    pub fn ingest(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        if let Some(err) = self.framing_error() {
            return Err(err);
        }

        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        loop {
            match self.try_extract_one() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => return Ok(messages),
                Err(e) if messages.is_empty() => return Err(e),
                Err(_) => return Ok(messages),
            }
        }
    }

    /// The framing error that stopped parsing, if any.
    pub fn framing_error(&self) -> Option<SessionError> {
        match &self.state {
            State::Failed { reason } => Some(SessionError::Framing(reason.clone())),
            _ => None,
        }
    }

    fn fail(&mut self, reason: String) -> SessionError {
        self.state = State::Failed {
            reason: reason.clone(),
        };
        SessionError::Framing(reason)
    }

    /// Try to extract a single message from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` if a complete message was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a framing violation
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::AwaitingHeader => {
                let declared = match decode_length(&self.buffer) {
                    Some(len) => len,
                    None => return Ok(None),
                };

                if (declared as usize) < HEADER_SIZE {
                    return Err(self.fail(format!(
                        "Declared length {} is smaller than the {} byte header",
                        declared, HEADER_SIZE
                    )));
                }

                if declared > self.max_length {
                    return Err(self.fail(format!(
                        "Declared length {} exceeds maximum {}",
                        declared, self.max_length
                    )));
                }

                self.state = State::AwaitingBody {
                    total_length: declared as usize,
                };
                self.try_extract_one()
            }

            State::AwaitingBody { total_length } => {
                if self.buffer.len() < total_length {
                    return Ok(None);
                }

                let message = self.buffer.split_to(total_length).freeze();
                self.state = State::AwaitingHeader;
                Ok(Some(message))
            }

            State::Failed { .. } => Ok(None),
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a framing error has been seen.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::AwaitingHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingHeader => "AwaitingHeader",
            State::AwaitingBody { .. } => "AwaitingBody",
            State::Failed { .. } => "Failed",
        }
    }
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}
