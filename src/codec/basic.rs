//! Basic codec - opaque bodies with Session-Id aware skeletons.
//!
//! # Example
//!
//! ```
//! use diameter_session::codec::{BasicCodec, Codec};
//!
//! let codec = BasicCodec::new();
//! let request = codec.construct_request(0, 280, None);
//! let answer = codec.construct_response(&request);
//!
//! assert!(!answer.is_request());
//! assert_eq!(answer.end_to_end_id(), request.end_to_end_id());
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};

use super::avp::{self, SESSION_ID};
use super::Codec;
use crate::error::{Result, SessionError};
use crate::protocol::{flags, Header, Message, HEADER_SIZE, MAX_MESSAGE_LENGTH};

/// Codec that passes message bodies through untouched.
///
/// Requests it constructs carry a Session-Id AVP when a session id is
/// given; responses copy the request's Session-Id AVP.
pub struct BasicCodec {
    /// Next end-to-end identifier.
    end_to_end: AtomicU32,
}

impl BasicCodec {
    /// Create a codec with a fresh end-to-end id sequence.
    ///
    /// Per RFC 6733 §3 the high 12 bits start from the low bits of the
    /// current time and the low 20 bits are random.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let seed = (secs << 20) | (rand::random::<u32>() & 0x000F_FFFF);
        Self::with_end_to_end_seed(seed)
    }

    /// Create a codec whose first end-to-end id is `seed`.
    pub fn with_end_to_end_seed(seed: u32) -> Self {
        Self {
            end_to_end: AtomicU32::new(seed),
        }
    }

    fn next_end_to_end_id(&self) -> u32 {
        self.end_to_end.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for BasicCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for BasicCodec {
    fn decode_message_header(&self, buf: &[u8]) -> Result<Header> {
        Header::decode(buf).ok_or_else(|| {
            SessionError::Codec(format!(
                "Header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            ))
        })
    }

    fn decode_message(&self, buf: Bytes) -> Result<Message> {
        let header = self.decode_message_header(&buf)?;
        header.validate(MAX_MESSAGE_LENGTH)?;

        let length = header.length as usize;
        if buf.len() < length {
            return Err(SessionError::Codec(format!(
                "Message declares {} bytes but only {} are available",
                length,
                buf.len()
            )));
        }

        Ok(Message::new(header, buf.slice(HEADER_SIZE..length)))
    }

    fn encode_message(&self, message: &Message) -> Result<Bytes> {
        let total = message.encoded_len();
        if total > MAX_MESSAGE_LENGTH as usize {
            return Err(SessionError::Codec(format!(
                "Message length {} exceeds maximum {}",
                total, MAX_MESSAGE_LENGTH
            )));
        }

        let mut header = message.header;
        header.length = total as u32;

        let mut buf = BytesMut::with_capacity(total);
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&message.body);
        Ok(buf.freeze())
    }

    fn construct_request(
        &self,
        application_id: u32,
        command_code: u32,
        session_id: Option<&str>,
    ) -> Message {
        let mut body = BytesMut::new();
        if let Some(session_id) = session_id {
            avp::encode_utf8(&mut body, SESSION_ID, session_id);
        }

        let mut header = Header::new(
            flags::REQUEST | flags::PROXIABLE,
            command_code,
            application_id,
            (HEADER_SIZE + body.len()) as u32,
        );
        header.end_to_end_id = self.next_end_to_end_id();

        Message::new(header, body.freeze())
    }

    fn construct_response(&self, request: &Message) -> Message {
        let mut body = BytesMut::new();
        let session_avp = avp::iter_avps(request.body())
            .map_while(|avp| avp.ok())
            .find(|avp| avp.code == SESSION_ID && avp.vendor_id.is_none());
        if let Some(session_avp) = session_avp {
            session_avp.encode_into(&mut body);
        }

        let mut header = request.header;
        header.flags = request.header.flags & flags::PROXIABLE;
        header.length = (HEADER_SIZE + body.len()) as u32;

        Message::new(header, body.freeze())
    }
}
