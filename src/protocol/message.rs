//! Message struct with typed accessors.
//!
//! A decoded message is a header plus an opaque body. The body is owned by
//! the codec; the session layer never looks inside it.
//!
//! # Example
//!
//! ```
//! use diameter_session::protocol::{flags, Header, Message};
//! use bytes::Bytes;
//!
//! let header = Header::new(flags::REQUEST, 272, 4, 25);
//! let message = Message::new(header, Bytes::from_static(b"hello"));
//!
//! assert!(message.is_request());
//! assert_eq!(message.command_code(), 272);
//! assert_eq!(message.body(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Decoded header.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Message {
    /// Create a new message from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Length this message occupies on the wire.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    #[inline]
    pub fn command_code(&self) -> u32 {
        self.header.command_code
    }

    #[inline]
    pub fn application_id(&self) -> u32 {
        self.header.application_id
    }

    #[inline]
    pub fn hop_by_hop_id(&self) -> u32 {
        self.header.hop_by_hop_id
    }

    #[inline]
    pub fn end_to_end_id(&self) -> u32 {
        self.header.end_to_end_id
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.header.is_request()
    }

    /// Return a copy of this message carrying the given hop-by-hop id.
    ///
    /// The body is shared, not copied.
    pub fn with_hop_by_hop_id(&self, hop_by_hop_id: u32) -> Self {
        let mut header = self.header;
        header.hop_by_hop_id = hop_by_hop_id;
        Self {
            header,
            body: self.body.clone(),
        }
    }
}

/// Build a complete message as a single byte vector.
///
/// The header is written as given; callers that want a consistent length
/// field should set `header.length` to `HEADER_SIZE + body.len()`.
///
/// # Example
///
/// ```
/// use diameter_session::protocol::{build_message, Header, HEADER_SIZE};
///
/// let header = Header::new(0, 280, 0, 24);
/// let bytes = build_message(&header, b"ping");
/// assert_eq!(bytes.len(), HEADER_SIZE + 4);
/// ```
pub fn build_message(header: &Header, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::flags;

    #[test]
    fn test_message_accessors() {
        let mut header = Header::new(flags::REQUEST, 316, 16777251, 24);
        header.hop_by_hop_id = 99;
        header.end_to_end_id = 1234;
        let message = Message::new(header, Bytes::from_static(b"avps"));

        assert!(message.is_request());
        assert_eq!(message.command_code(), 316);
        assert_eq!(message.application_id(), 16777251);
        assert_eq!(message.hop_by_hop_id(), 99);
        assert_eq!(message.end_to_end_id(), 1234);
        assert_eq!(message.encoded_len(), 24);
    }

    #[test]
    fn test_with_hop_by_hop_id_shares_body() {
        let body = Bytes::from_static(b"shared body");
        let message = Message::new(Header::new(flags::REQUEST, 272, 4, 31), body.clone());

        let tagged = message.with_hop_by_hop_id(0xDEADBEEF);
        assert_eq!(tagged.hop_by_hop_id(), 0xDEADBEEF);
        assert_eq!(message.hop_by_hop_id(), 0);
        assert_eq!(tagged.body.as_ptr(), body.as_ptr());
    }

    #[test]
    fn test_build_message() {
        let header = Header::new(0, 280, 0, 25);
        let bytes = build_message(&header, b"hello");

        assert_eq!(bytes.len(), 25);
        assert_eq!(Header::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }
}
