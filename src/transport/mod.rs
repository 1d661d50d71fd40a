//! Transport provider contract.
//!
//! A transport performs the upgrade handshake and moves frames. Every call
//! starts an operation and returns immediately; the outcome is delivered
//! later through the [`CompletionSink`] handed over with
//! [`Transport::send_upgrade_request`], tagged with the [`HandleId`] of the
//! connection attempt it belongs to.
//!
//! ## Completion contract
//!
//! | Call | Completion |
//! |---|---|
//! | `send_upgrade_request` | `UpgradeRequestSent` |
//! | `receive_upgrade_response` | `UpgradeResponseReceived` |
//! | `receive` | `ReadComplete` |
//! | `send` | `WriteComplete` (at most one send in flight) |
//! | `close` | `CloseComplete`, once the peer's close frame arrived |
//! | `release` | `HandleClosing`, always last for the handle |
//!
//! Any operation may instead complete with `RequestError`.

mod router;
mod tcp;

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;

use crate::message::{BufferKind, CloseStatus, MessageKind};

pub use router::CompletionSink;
pub(crate) use router::{CompletionRouter, CompletionTarget};
pub use tcp::TcpTransport;

/// Identifies the transport resource of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl HandleId {
    /// Allocate a process-unique handle id.
    #[must_use]
    pub fn next() -> Self {
        HandleId(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value, for logging.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable server identity bound by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub server: String,
    /// TCP port.
    pub port: u16,
    /// Request path, starting with `/`.
    pub path: String,
    /// Use TLS.
    pub secure: bool,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(server: impl Into<String>, port: u16, path: impl Into<String>, secure: bool) -> Self {
        Self {
            server: server.into(),
            port,
            path: path.into(),
            secure,
        }
    }

    /// Value of the `Host` header.
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.server.clone()
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }
}

/// Failures reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The connection was reset by the peer or the network.
    #[error("connection reset")]
    ConnectionReset,

    /// An outstanding operation was cancelled by a local close.
    #[error("operation cancelled")]
    Cancelled,

    /// The server refused or botched the upgrade.
    #[error("upgrade failed: {0}")]
    Upgrade(String),

    /// TLS setup or handshake failed.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The handle is not known to the transport.
    #[error("unknown handle {0}")]
    UnknownHandle(HandleId),

    /// The handle is already closed.
    #[error("handle closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportError::ConnectionReset,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// A completion delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The upgrade request has been written.
    UpgradeRequestSent,
    /// A valid upgrade response has been received; the socket is open.
    UpgradeResponseReceived,
    /// A receive completed.
    ReadComplete {
        /// Payload of this buffer.
        data: Bytes,
        /// What the buffer carries.
        kind: BufferKind,
    },
    /// The in-flight send completed.
    WriteComplete,
    /// The closing handshake completed.
    CloseComplete,
    /// The outstanding operation failed.
    RequestError(TransportError),
    /// The handle is fully released; nothing follows.
    HandleClosing,
}

impl TransportEvent {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            TransportEvent::UpgradeRequestSent => "UpgradeRequestSent",
            TransportEvent::UpgradeResponseReceived => "UpgradeResponseReceived",
            TransportEvent::ReadComplete { .. } => "ReadComplete",
            TransportEvent::WriteComplete => "WriteComplete",
            TransportEvent::CloseComplete => "CloseComplete",
            TransportEvent::RequestError(_) => "RequestError",
            TransportEvent::HandleClosing => "HandleClosing",
        }
    }
}

/// The asynchronous transport provider consumed by [`WebSocket`](crate::WebSocket).
///
/// Implementations must not block. Completions may be delivered from any
/// thread, including synchronously from within the call that started the
/// operation.
pub trait Transport: Send + Sync + 'static {
    /// Open the connection for `handle` and write the upgrade request.
    ///
    /// Completes with `UpgradeRequestSent`. `sink` receives every later
    /// completion for `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be started.
    fn send_upgrade_request(
        &self,
        handle: HandleId,
        endpoint: &Endpoint,
        sink: CompletionSink,
    ) -> Result<(), TransportError>;

    /// Read and validate the upgrade response. Completes with `UpgradeResponseReceived`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be started.
    fn receive_upgrade_response(&self, handle: HandleId) -> Result<(), TransportError>;

    /// Receive the next buffer. Completes with `ReadComplete`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be started.
    fn receive(&self, handle: HandleId) -> Result<(), TransportError>;

    /// Send one message. Completes with `WriteComplete`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be started.
    fn send(&self, handle: HandleId, data: Bytes, kind: MessageKind)
    -> Result<(), TransportError>;

    /// Send a close frame and wait for the peer's. Completes with `CloseComplete`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be started.
    fn close(&self, handle: HandleId, status: u16, reason: Bytes) -> Result<(), TransportError>;

    /// Status and reason of the close frame received from the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if no close frame has been received.
    fn query_close_status(&self, handle: HandleId) -> Result<CloseStatus, TransportError>;

    /// Release the handle. Completes with `HandleClosing`, after which no
    /// other completion is delivered for `handle`.
    fn release(&self, handle: HandleId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_ids_are_unique_and_increasing() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_host_header() {
        assert_eq!(Endpoint::new("example.com", 443, "/", true).host_header(), "example.com");
        assert_eq!(Endpoint::new("example.com", 80, "/", false).host_header(), "example.com");
        assert_eq!(
            Endpoint::new("example.com", 8080, "/", false).host_header(),
            "example.com:8080"
        );
    }

    #[test]
    fn test_io_error_classification() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(TransportError::from(reset), TransportError::ConnectionReset);

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(TransportError::from(eof), TransportError::ConnectionReset);

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(TransportError::from(other), TransportError::Io(_)));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(TransportEvent::HandleClosing.name(), "HandleClosing");
        assert_eq!(
            TransportEvent::ReadComplete {
                data: Bytes::new(),
                kind: BufferKind::Close
            }
            .name(),
            "ReadComplete"
        );
    }
}
