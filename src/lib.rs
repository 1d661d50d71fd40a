//! # cwsock - Callback-driven asynchronous WebSocket client
//!
//! `cwsock` drives one long-lived WebSocket connection through an explicit
//! lifecycle state machine. Every user call and every transport completion
//! is serialized onto a single sequential queue, so handlers run one at a
//! time and a completion from a superseded connection attempt can never
//! touch a newer one.
//!
//! ## Features
//!
//! - **Non-blocking API**: every operation but `initialize` returns after queuing
//! - **Serialized callbacks** for open, messages, the closing handshake and errors
//! - **Reconnection** with a generation counter that neutralizes stale completions
//! - **Safe teardown** that waits for the transport to release its handle
//! - **Pluggable transport** with a built-in tokio provider (`TcpTransport`)
//! - **TLS** for `wss` endpoints via rustls (feature `tls-rustls`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cwsock::{CloseCode, TcpTransport, WebSocket};
//!
//! let ws = WebSocket::new(Arc::new(TcpTransport::new()));
//! assert!(ws.initialize("localhost", 9001, "/", false));
//!
//! let handle = ws.handle();
//! ws.on_open(move || handle.send_text("hello"))
//!     .on_text_message(|text| println!("received {text}"))
//!     .on_closing(|code, reason, clean| println!("closing {code} {reason:?} {clean}"))
//!     .on_error(|err| eprintln!("error: {err}"));
//!
//! ws.connect(Duration::ZERO);
//! ```

pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod message;
pub mod protocol;
pub mod teardown;
pub mod transport;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use config::{Config, Limits, Timeouts};
pub use connection::{ConnectionState, WebSocket, WebSocketHandle};
pub use error::{Error, Operation, Result};
pub use message::{BufferKind, CloseCode, CloseStatus, MessageKind};
pub use transport::{
    CompletionSink, Endpoint, HandleId, TcpTransport, Transport, TransportError, TransportEvent,
};
