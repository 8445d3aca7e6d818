//! Codec module - message encoding/decoding and skeleton construction.
//!
//! The session layer treats message bodies as opaque. Everything that
//! touches the body (AVP layout, dictionaries, skeleton contents) goes
//! through a [`Codec`]:
//!
//! - [`Codec`] - the trait the session calls into
//! - [`BasicCodec`] - default implementation with an opaque body and a
//!   Session-Id AVP on constructed requests
//! - [`avp`] - the minimal AVP helpers `BasicCodec` needs
//!
//! # Example
//!
//! ```
//! use diameter_session::codec::{BasicCodec, Codec};
//!
//! let codec = BasicCodec::new();
//! let request = codec.construct_request(4, 272, Some("gw.example.org;1;42"));
//! let bytes = codec.encode_message(&request).unwrap();
//! let decoded = codec.decode_message(bytes).unwrap();
//! assert!(decoded.is_request());
//! assert_eq!(decoded.command_code(), 272);
//! ```

pub mod avp;
mod basic;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::{Header, Message};

pub use basic::BasicCodec;

/// Encodes, decodes and constructs messages on behalf of a session.
///
/// Implementations must be pure: no method may mutate the caller's
/// buffers or depend on session state.
pub trait Codec: Send + Sync {
    /// Decode the fixed header from at least 20 bytes.
    fn decode_message_header(&self, buf: &[u8]) -> Result<Header>;

    /// Decode a complete message. `buf` holds exactly the declared length.
    fn decode_message(&self, buf: Bytes) -> Result<Message>;

    /// Serialize a message, recomputing its length field.
    fn encode_message(&self, message: &Message) -> Result<Bytes>;

    /// Build a request skeleton. The hop-by-hop id is left unset.
    fn construct_request(
        &self,
        application_id: u32,
        command_code: u32,
        session_id: Option<&str>,
    ) -> Message;

    /// Build a response skeleton mirroring the request's identifiers.
    fn construct_response(&self, request: &Message) -> Message;
}
