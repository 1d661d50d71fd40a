//! WebSocket frame parsing and serialization (RFC 6455).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                Masking key (if MASK set)                      |
//! +---------------------------------------------------------------+
//! |                     Payload data                              |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::OpCode;
use super::mask::apply_mask;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseStatus};

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// A single WebSocket frame. Extensions are not negotiated, so RSV bits are
/// always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a pong answering `ping_payload`.
    #[must_use]
    pub fn pong(ping_payload: Bytes) -> Self {
        Self::new(true, OpCode::Pong, ping_payload)
    }

    /// Create a close frame.
    ///
    /// Codes that must not appear on the wire (1005, 1006, 1015) produce an
    /// empty payload, as does code 0.
    #[must_use]
    pub fn close(code: u16, reason: &[u8]) -> Self {
        if code == 0 || CloseCode::from_u16(code).is_reserved() {
            return Self::new(true, OpCode::Close, Bytes::new());
        }
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, payload.freeze())
    }

    /// Serialize into `dst`, masking the payload when `mask` is given.
    pub fn encode(&self, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
        let len = self.payload.len();
        dst.reserve(14 + len);

        let byte0 = if self.fin { 0x80 } else { 0x00 } | self.opcode.as_u8();
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        if len <= 125 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= usize::from(u16::MAX) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.extend_from_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.extend_from_slice(&self.payload),
        }
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed. Masked payloads
    /// are unmasked.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if `buf` does not hold a whole frame yet
    /// - [`Error::InvalidOpcode`] for reserved opcodes
    /// - [`Error::InvalidFrame`] for set RSV bits, malformed control frames,
    ///   or a payload larger than `max_payload`
    pub fn parse(buf: &[u8], max_payload: usize) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let (byte0, byte1) = (buf[0], buf[1]);
        let fin = byte0 & 0x80 != 0;
        if byte0 & 0x70 != 0 {
            return Err(Error::InvalidFrame("reserved bits set".into()));
        }
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, mut offset) = match byte1 & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            short => (u64::from(short), 2),
        };

        let payload_len = usize::try_from(payload_len)
            .ok()
            .filter(|&len| len <= max_payload)
            .ok_or_else(|| {
                Error::InvalidFrame(format!(
                    "payload of {payload_len} bytes exceeds limit of {max_payload}"
                ))
            })?;

        if opcode.is_control() && (!fin || payload_len > MAX_CONTROL_FRAME_PAYLOAD) {
            return Err(Error::InvalidFrame(format!(
                "malformed {opcode} control frame"
            )));
        }

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Err(Error::IncompleteFrame {
                    needed: offset + 4 - buf.len(),
                });
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let total = offset + payload_len;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[offset..total].to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok((Self::new(fin, opcode, payload), total))
    }

    /// Status code and reason carried by a close frame.
    ///
    /// An empty payload reports [`CloseCode::NoStatus`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] for a 1-byte payload.
    pub fn close_status(&self) -> Result<CloseStatus> {
        match self.payload.len() {
            0 => Ok(CloseStatus::new(CloseCode::NoStatus.as_u16(), Bytes::new())),
            1 => Err(Error::InvalidFrame("close payload of 1 byte".into())),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                Ok(CloseStatus::new(code, self.payload.slice(2..)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 16 * 1024 * 1024;

    fn encoded(frame: &Frame, mask: Option<[u8; 4]>) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(mask, &mut buf);
        buf
    }

    #[test]
    fn test_parse_rfc_unmasked_text() {
        // RFC 6455 Section 5.7
        let data = [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, used) = Frame::parse(&data, MAX).unwrap();
        assert_eq!(used, 7);
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_parse_rfc_masked_text() {
        let data = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (frame, used) = Frame::parse(&data, MAX).unwrap();
        assert_eq!(used, 11);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_parse_fragmented() {
        let data = [0x01, 0x03, 0x48, 0x65, 0x6c, 0x80, 0x02, 0x6c, 0x6f];
        let (first, used) = Frame::parse(&data, MAX).unwrap();
        assert!(!first.fin);
        assert_eq!(first.opcode, OpCode::Text);
        let (second, _) = Frame::parse(&data[used..], MAX).unwrap();
        assert!(second.fin);
        assert_eq!(second.opcode, OpCode::Continuation);
        assert_eq!(&second.payload[..], b"lo");
    }

    #[test]
    fn test_encode_masked_matches_rfc() {
        let frame = Frame::new(true, OpCode::Text, Bytes::from_static(b"Hello"));
        let buf = encoded(&frame, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_extended_lengths() {
        for len in [126usize, 65_535, 65_536] {
            let frame = Frame::new(true, OpCode::Binary, vec![0xAB; len]);
            let buf = encoded(&frame, None);
            let (parsed, used) = Frame::parse(&buf, MAX).unwrap();
            assert_eq!(used, buf.len());
            assert_eq!(parsed.payload.len(), len);
        }
    }

    #[test]
    fn test_incomplete() {
        let frame = Frame::new(true, OpCode::Binary, vec![1, 2, 3, 4]);
        let buf = encoded(&frame, Some([9, 9, 9, 9]));
        assert_eq!(
            Frame::parse(&buf[..1], MAX),
            Err(Error::IncompleteFrame { needed: 1 })
        );
        assert_eq!(
            Frame::parse(&buf[..buf.len() - 1], MAX),
            Err(Error::IncompleteFrame { needed: 1 })
        );
    }

    #[test]
    fn test_payload_limit() {
        let frame = Frame::new(true, OpCode::Binary, vec![0; 200]);
        let buf = encoded(&frame, None);
        assert!(matches!(
            Frame::parse(&buf, 100),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rsv_bits_rejected() {
        assert!(matches!(
            Frame::parse(&[0xC1, 0x00], MAX),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_fragmented_control_rejected() {
        assert!(matches!(
            Frame::parse(&[0x09, 0x00], MAX),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(1000, b"bye");
        assert_eq!(&frame.payload[..], &[0x03, 0xE8, b'b', b'y', b'e']);
        let status = frame.close_status().unwrap();
        assert_eq!(status.code, 1000);
        assert_eq!(&status.reason[..], b"bye");
    }

    #[test]
    fn test_close_reserved_code_sends_empty_payload() {
        assert!(Frame::close(1005, b"").payload.is_empty());
        assert!(Frame::close(1006, b"x").payload.is_empty());
        let status = Frame::close(1005, b"").close_status().unwrap();
        assert_eq!(status.code, 1005);
    }

    #[test]
    fn test_close_one_byte_payload_rejected() {
        let frame = Frame::new(true, OpCode::Close, vec![0x03]);
        assert!(frame.close_status().is_err());
    }
}
