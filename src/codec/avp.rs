//! Minimal AVP (Attribute-Value Pair) helpers.
//!
//! Only what skeleton construction needs: encoding a single AVP and
//! walking the AVPs of a body. Dictionary-driven typing is left to
//! richer codecs.
//!
//! ```text
//! ┌──────────────────────────┬───────┬──────────────────┐
//! │ AVP Code  4 bytes (BE)   │ Flags │ AVP Length 3 B   │
//! ├──────────────────────────┴───────┴──────────────────┤
//! │ Vendor-ID 4 bytes (only when the V-bit is set)      │
//! ├─────────────────────────────────────────────────────┤
//! │ Data ... (padded to a 4-byte boundary)              │
//! └─────────────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Result, SessionError};

/// AVP header size without a vendor id.
pub const AVP_HEADER_SIZE: usize = 8;

/// AVP header size with a vendor id.
pub const AVP_VENDOR_HEADER_SIZE: usize = 12;

/// Session-Id AVP code (RFC 6733 §8.8).
pub const SESSION_ID: u32 = 263;

/// AVP flag constants.
pub mod avp_flags {
    /// Vendor-ID field present.
    pub const VENDOR: u8 = 0b1000_0000;
    /// Receiver must understand this AVP.
    pub const MANDATORY: u8 = 0b0100_0000;
    /// Reserved for end-to-end security.
    pub const PROTECTED: u8 = 0b0010_0000;
}

/// A borrowed view of one AVP inside a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avp<'a> {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub data: &'a [u8],
}

impl Avp<'_> {
    /// Append this AVP (with padding) to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let flags = match self.vendor_id {
            Some(_) => self.flags | avp_flags::VENDOR,
            None => self.flags & !avp_flags::VENDOR,
        };
        let header_len = if self.vendor_id.is_some() {
            AVP_VENDOR_HEADER_SIZE
        } else {
            AVP_HEADER_SIZE
        };
        let length = (header_len + self.data.len()) as u32;

        buf.reserve(padded_len(length as usize));
        buf.put_u32(self.code);
        buf.put_u8(flags);
        buf.put_slice(&length.to_be_bytes()[1..]);
        if let Some(vendor_id) = self.vendor_id {
            buf.put_u32(vendor_id);
        }
        buf.put_slice(self.data);
        buf.put_bytes(0, padded_len(length as usize) - length as usize);
    }
}

/// Round a length up to the next multiple of four.
#[inline]
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Append a mandatory UTF8String AVP without vendor id.
pub fn encode_utf8(buf: &mut BytesMut, code: u32, value: &str) {
    Avp {
        code,
        flags: avp_flags::MANDATORY,
        vendor_id: None,
        data: value.as_bytes(),
    }
    .encode_into(buf);
}

/// Iterate over the AVPs of a message body.
pub fn iter_avps(body: &[u8]) -> AvpIter<'_> {
    AvpIter { rest: body }
}

/// Iterator over AVPs; yields an error and stops on a malformed AVP.
pub struct AvpIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for AvpIter<'a> {
    type Item = Result<Avp<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        match parse_avp(self.rest) {
            Ok((avp, consumed)) => {
                self.rest = &self.rest[consumed.min(self.rest.len())..];
                Some(Ok(avp))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

fn parse_avp(buf: &[u8]) -> Result<(Avp<'_>, usize)> {
    if buf.len() < AVP_HEADER_SIZE {
        return Err(SessionError::Codec(format!(
            "Truncated AVP header ({} bytes)",
            buf.len()
        )));
    }

    let code = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let flags = buf[4];
    let length = u32::from_be_bytes([0, buf[5], buf[6], buf[7]]) as usize;

    let (vendor_id, header_len) = if flags & avp_flags::VENDOR != 0 {
        if buf.len() < AVP_VENDOR_HEADER_SIZE {
            return Err(SessionError::Codec(format!(
                "Truncated vendor AVP header for code {}",
                code
            )));
        }
        (
            Some(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]])),
            AVP_VENDOR_HEADER_SIZE,
        )
    } else {
        (None, AVP_HEADER_SIZE)
    };

    if length < header_len || length > buf.len() {
        return Err(SessionError::Codec(format!(
            "AVP {} declares invalid length {}",
            code, length
        )));
    }

    let avp = Avp {
        code,
        flags,
        vendor_id,
        data: &buf[header_len..length],
    };
    Ok((avp, padded_len(length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_avp_layout_and_padding() {
        let mut buf = BytesMut::new();
        encode_utf8(&mut buf, SESSION_ID, "abcde");

        // 8 header + 5 data = 13, padded to 16
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &SESSION_ID.to_be_bytes());
        assert_eq!(buf[4], avp_flags::MANDATORY);
        assert_eq!(&buf[5..8], &[0, 0, 13]);
        assert_eq!(&buf[8..13], b"abcde");
        assert_eq!(&buf[13..], &[0, 0, 0]);
    }

    #[test]
    fn test_vendor_avp_sets_vendor_bit() {
        let mut buf = BytesMut::new();
        Avp {
            code: 1407,
            flags: avp_flags::MANDATORY,
            vendor_id: Some(10415),
            data: &[1, 2, 3, 4],
        }
        .encode_into(&mut buf);

        assert_eq!(buf.len(), 16);
        assert_eq!(buf[4], avp_flags::VENDOR | avp_flags::MANDATORY);

        let parsed: Vec<_> = iter_avps(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].vendor_id, Some(10415));
        assert_eq!(parsed[0].data, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_iterates_multiple_avps() {
        let mut buf = BytesMut::new();
        encode_utf8(&mut buf, SESSION_ID, "s;1");
        encode_utf8(&mut buf, 264, "host.example.org");

        let codes: Vec<u32> = iter_avps(&buf).map(|a| a.unwrap().code).collect();
        assert_eq!(codes, vec![SESSION_ID, 264]);
    }

    #[test]
    fn test_malformed_avp_stops_iteration() {
        let mut buf = BytesMut::new();
        encode_utf8(&mut buf, SESSION_ID, "ok");
        buf.extend_from_slice(&[0, 0, 1, 8, 0, 0, 0x40, 0]);

        let items: Vec<_> = iter_avps(&buf).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(8), 8);
        assert_eq!(padded_len(9), 12);
        assert_eq!(padded_len(11), 12);
        assert_eq!(padded_len(12), 12);
    }
}
