//! Message kinds, buffer kinds and close codes shared by the client and transports.

use bytes::Bytes;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away.
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Unsupported data (1003).
    UnsupportedData,
    /// No status received (1005). Never sent on the wire.
    NoStatus,
    /// Abnormal closure (1006). Reported locally when the connection is reset
    /// before a closing handshake completes. Never sent on the wire.
    Abnormal,
    /// Invalid payload (1007).
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension (1010).
    MandatoryExtension,
    /// Internal error (1011).
    InternalError,
    /// Any other code (1012-1014 registered, 3000-4999 applications).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1: 1004, 1005, 1006, 1015.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Kind of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Arbitrary bytes.
    Binary,
    /// UTF-8 text.
    Text,
}

/// Kind of a buffer delivered by a transport receive.
///
/// The `*Fragment` kinds mark a non-terminal part of a message; the
/// `*Message` kinds mark the terminal part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Terminal part of a binary message.
    BinaryMessage,
    /// Non-terminal part of a binary message.
    BinaryFragment,
    /// Terminal part of a text message.
    TextMessage,
    /// Non-terminal part of a text message.
    TextFragment,
    /// The peer sent a close frame; query the transport for its status.
    Close,
}

impl BufferKind {
    /// Returns `true` if this buffer completes a message.
    #[inline]
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, BufferKind::BinaryMessage | BufferKind::TextMessage)
    }

    /// Message kind carried by a data buffer, `None` for `Close`.
    #[must_use]
    pub const fn message_kind(self) -> Option<MessageKind> {
        match self {
            BufferKind::BinaryMessage | BufferKind::BinaryFragment => Some(MessageKind::Binary),
            BufferKind::TextMessage | BufferKind::TextFragment => Some(MessageKind::Text),
            BufferKind::Close => None,
        }
    }

    /// Buffer kind for a data frame of `kind`, terminal or not.
    #[must_use]
    pub const fn for_data(kind: MessageKind, is_final: bool) -> Self {
        match (kind, is_final) {
            (MessageKind::Binary, true) => BufferKind::BinaryMessage,
            (MessageKind::Binary, false) => BufferKind::BinaryFragment,
            (MessageKind::Text, true) => BufferKind::TextMessage,
            (MessageKind::Text, false) => BufferKind::TextFragment,
        }
    }
}

/// Close status and raw reason bytes as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// The close status code.
    pub code: u16,
    /// UTF-8 reason bytes, at most 123.
    pub reason: Bytes,
}

impl CloseStatus {
    /// Create a close status.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<Bytes>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 4000] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn test_close_code_default_is_normal() {
        assert_eq!(CloseCode::default(), CloseCode::Normal);
        assert_eq!(CloseCode::default().as_u16(), 1000);
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert!(!CloseCode::Other(4000).is_reserved());
    }

    #[test]
    fn test_buffer_kind_final() {
        assert!(BufferKind::BinaryMessage.is_final());
        assert!(BufferKind::TextMessage.is_final());
        assert!(!BufferKind::BinaryFragment.is_final());
        assert!(!BufferKind::TextFragment.is_final());
        assert!(!BufferKind::Close.is_final());
    }

    #[test]
    fn test_buffer_kind_for_data() {
        assert_eq!(
            BufferKind::for_data(MessageKind::Text, false),
            BufferKind::TextFragment
        );
        assert_eq!(
            BufferKind::for_data(MessageKind::Binary, true),
            BufferKind::BinaryMessage
        );
        assert_eq!(
            BufferKind::TextFragment.message_kind(),
            Some(MessageKind::Text)
        );
        assert_eq!(BufferKind::Close.message_kind(), None);
    }
}
