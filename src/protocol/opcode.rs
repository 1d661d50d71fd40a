//! WebSocket frame opcodes as defined in RFC 6455.

use crate::error::{Error, Result};
use crate::message::MessageKind;

/// Frame opcode. Reserved values never make it past [`OpCode::from_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Decode the low nibble of a frame's first byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOpcode`] for reserved values (0x3-0x7, 0xB-0xF).
    pub const fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Message kind started by this opcode, `None` for continuation and control frames.
    #[must_use]
    pub const fn message_kind(self) -> Option<MessageKind> {
        match self {
            OpCode::Text => Some(MessageKind::Text),
            OpCode::Binary => Some(MessageKind::Binary),
            _ => None,
        }
    }
}

impl From<MessageKind> for OpCode {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Binary => OpCode::Binary,
            MessageKind::Text => OpCode::Text,
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}(0x{:X})", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_u8_valid() {
        for op in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::from_u8(op.as_u8()).unwrap(), op);
        }
    }

    #[test]
    fn test_opcode_reserved_rejected() {
        for byte in (0x3..=0x7).chain(0xB..=0xF) {
            assert_eq!(OpCode::from_u8(byte), Err(Error::InvalidOpcode(byte)));
        }
    }

    #[test]
    fn test_display_includes_value() {
        assert_eq!(OpCode::Pong.to_string(), "Pong(0xA)");
    }

    #[test]
    fn test_control_and_kind() {
        assert!(OpCode::Ping.is_control());
        assert!(!OpCode::Text.is_control());
        assert_eq!(OpCode::Text.message_kind(), Some(MessageKind::Text));
        assert_eq!(OpCode::Continuation.message_kind(), None);
        assert_eq!(OpCode::from(MessageKind::Binary), OpCode::Binary);
    }
}
