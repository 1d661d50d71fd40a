//! Error types for the callback-driven WebSocket client.
//!
//! Lifecycle failures never cross the async boundary as a returned `Err`;
//! they are delivered to the `on_error` handler. The same enum is also used
//! for the few synchronous paths (frame codec, handshake parsing).

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::transport::TransportError;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A public operation, named in [`Error::IllegalOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `connect`.
    Connect,
    /// `abort`.
    Abort,
    /// Any of the `send*` family.
    Send,
    /// `close`.
    Close,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Connect => write!(f, "Connect"),
            Operation::Abort => write!(f, "Abort"),
            Operation::Send => write!(f, "Send"),
            Operation::Close => write!(f, "Close"),
        }
    }
}

/// Errors surfaced through `on_error` or returned by the protocol helpers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The upgrade handshake could not be sent or was refused.
    #[error("Protocol upgrade failed: {0}")]
    ProtocolUpgradeFailure(String),

    /// A send (data or close frame) could not be issued or failed.
    #[error("Transport send failed: {0}")]
    TransportSendFailure(TransportError),

    /// A receive could not be issued or failed.
    #[error("Transport receive failed: {0}")]
    TransportReceiveFailure(TransportError),

    /// Text payload or close reason was not valid UTF-8 / UTF-16,
    /// or contained an embedded NUL.
    #[error("Invalid text encoding")]
    InvalidTextEncoding,

    /// The underlying connection was reset.
    ///
    /// Never delivered to `on_error`; a reset synthesizes the closing
    /// lifecycle with `was_clean = false` instead.
    #[error("Connection reset")]
    ConnectionReset,

    /// The operation is not valid in the current state.
    #[error("Illegal operation: {operation} in state {state}")]
    IllegalOperation {
        /// The rejected operation.
        operation: Operation,
        /// State at the time the operation was dequeued.
        state: ConnectionState,
    },

    /// Close reason exceeds the control frame budget.
    #[error("Close reason too long: {len} bytes (max: {max})")]
    CloseReasonTooLong {
        /// Encoded reason length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// An inbound message grew past the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size reached so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Any other transport failure (close, status query, TLS).
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// A buffer or internal resource could not be obtained.
    #[error("Internal allocation failure: {0}")]
    InternalAllocationFailure(String),

    /// Malformed frame on the wire.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Reserved or unknown opcode.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Invalid handshake response.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),
}

impl Error {
    /// Builds an [`Error::IllegalOperation`].
    #[must_use]
    pub(crate) fn illegal(operation: Operation, state: ConnectionState) -> Self {
        Error::IllegalOperation { operation, state }
    }

    /// Returns `true` for errors caused by API misuse rather than the transport.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::IllegalOperation { .. } | Error::CloseReasonTooLong { .. }
        )
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidTextEncoding
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidTextEncoding
    }
}
