//! Wire format encoding and decoding.
//!
//! Implements the fixed 20-byte Diameter header:
//! ```text
//! ┌─────────┬────────────────┬───────┬────────────────┐
//! │ Version │ Message Length │ Flags │ Command Code   │
//! │ 1 byte  │ 3 bytes (BE)   │ 1 byte│ 3 bytes (BE)   │
//! ├─────────┴────────────────┴───────┴────────────────┤
//! │ Application-ID                     4 bytes (BE)   │
//! │ Hop-by-Hop Identifier              4 bytes (BE)   │
//! │ End-to-End Identifier              4 bytes (BE)   │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! The message length counts the header and the body.

use crate::error::{Result, SessionError};

/// Header size in bytes (fixed, exactly 20).
pub const HEADER_SIZE: usize = 20;

/// The only protocol version defined by RFC 6733.
pub const DIAMETER_VERSION: u8 = 1;

/// Largest value representable in the 24-bit length field.
pub const MAX_MESSAGE_LENGTH: u32 = 0x00FF_FFFF;

/// Largest value representable in the 24-bit command code field.
pub const MAX_COMMAND_CODE: u32 = 0x00FF_FFFF;

/// Command flag constants.
///
/// RFC 6733 numbers bits from the most significant end, so "bit 0" (the
/// R-bit) is `0x80`.
pub mod flags {
    /// Request (1) or answer (0).
    pub const REQUEST: u8 = 0b1000_0000;
    /// Message may be proxied, relayed or redirected.
    pub const PROXIABLE: u8 = 0b0100_0000;
    /// Answer carries a protocol error.
    pub const ERROR: u8 = 0b0010_0000;
    /// Potentially retransmitted request.
    pub const RETRANSMIT: u8 = 0b0001_0000;

    /// Reserved bits mask (bits 4-7).
    pub const RESERVED_MASK: u8 = 0b0000_1111;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (always 1 on valid messages).
    pub version: u8,
    /// Total message length in bytes, header included (24-bit).
    pub length: u32,
    /// Command flags (see `flags` module).
    pub flags: u8,
    /// Command code (24-bit).
    pub command_code: u32,
    /// Application identifier.
    pub application_id: u32,
    /// Hop-by-hop identifier, used for request/response correlation.
    pub hop_by_hop_id: u32,
    /// End-to-end identifier, used for duplicate detection by peers.
    pub end_to_end_id: u32,
}

impl Header {
    /// Create a version 1 header with zeroed identifiers.
    pub fn new(flags: u8, command_code: u32, application_id: u32, length: u32) -> Self {
        Self {
            version: DIAMETER_VERSION,
            length,
            flags,
            command_code,
            application_id,
            hop_by_hop_id: 0,
            end_to_end_id: 0,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use diameter_session::protocol::{Header, flags};
    ///
    /// let header = Header::new(flags::REQUEST, 272, 4, 20);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 20);
    /// assert_eq!(bytes[4], 0x80);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (20 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let length = self.length.to_be_bytes();
        let command = self.command_code.to_be_bytes();
        buf[0] = self.version;
        buf[1..4].copy_from_slice(&length[1..]);
        buf[4] = self.flags;
        buf[5..8].copy_from_slice(&command[1..]);
        buf[8..12].copy_from_slice(&self.application_id.to_be_bytes());
        buf[12..16].copy_from_slice(&self.hop_by_hop_id.to_be_bytes());
        buf[16..20].copy_from_slice(&self.end_to_end_id.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use diameter_session::protocol::Header;
    ///
    /// let mut bytes = [0u8; 20];
    /// bytes[0] = 1;
    /// bytes[3] = 25;
    /// bytes[4] = 0x80;
    /// bytes[15] = 7;
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.length, 25);
    /// assert!(header.is_request());
    /// assert_eq!(header.hop_by_hop_id, 7);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            length: u32::from_be_bytes([0, buf[1], buf[2], buf[3]]),
            flags: buf[4],
            command_code: u32::from_be_bytes([0, buf[5], buf[6], buf[7]]),
            application_id: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            hop_by_hop_id: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            end_to_end_id: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Version is 1
    /// - Length covers at least the header
    /// - Length doesn't exceed max
    pub fn validate(&self, max_length: u32) -> Result<()> {
        if self.version != DIAMETER_VERSION {
            return Err(SessionError::Codec(format!(
                "Unsupported version {}",
                self.version
            )));
        }

        if (self.length as usize) < HEADER_SIZE {
            return Err(SessionError::Framing(format!(
                "Declared length {} is smaller than the {} byte header",
                self.length, HEADER_SIZE
            )));
        }

        if self.length > max_length {
            return Err(SessionError::Framing(format!(
                "Declared length {} exceeds maximum {}",
                self.length, max_length
            )));
        }

        Ok(())
    }

    /// Body length implied by the declared total length.
    #[inline]
    pub fn body_length(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        flags::has_flag(self.flags, flags::REQUEST)
    }

    /// Check if this message is proxiable.
    #[inline]
    pub fn is_proxiable(&self) -> bool {
        flags::has_flag(self.flags, flags::PROXIABLE)
    }

    /// Check if this is an error answer.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::ERROR)
    }

    /// Check if this is a potentially retransmitted request.
    #[inline]
    pub fn is_retransmit(&self) -> bool {
        flags::has_flag(self.flags, flags::RETRANSMIT)
    }
}

/// Read only the declared total length (bytes 1..4).
///
/// Returns `None` if fewer than `HEADER_SIZE` bytes are available, so the
/// length is never trusted before a full header is buffered.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([0, buf[1], buf[2], buf[3]]))
}
