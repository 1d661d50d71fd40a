//! Client and transport configuration.
//!
//! [`WebSocket`](crate::WebSocket) reads only [`Limits`]; the rest is
//! consumed by [`TcpTransport`](crate::TcpTransport).

use std::time::Duration;

use crate::error::Error;

/// Control frames carry at most 125 payload bytes, 2 of which are the status.
pub const MAX_CLOSE_REASON_LEN: usize = 125 - 2;

const DEFAULT_MAX_MESSAGE: usize = 64 << 20;
const DEFAULT_MAX_FRAME: usize = 16 << 20;
const DEFAULT_READ_BUFFER: usize = 8 << 10;
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Size limits applied to inbound data and outbound close reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Upper bound on a reassembled inbound message. Default 64 MiB.
    pub max_message_size: usize,
    /// Upper bound on one inbound frame payload, checked by the built-in
    /// transport while parsing. Default 16 MiB.
    pub max_frame_size: usize,
    /// Upper bound on an encoded close reason. Never above
    /// [`MAX_CLOSE_REASON_LEN`].
    pub max_close_reason_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE, DEFAULT_MAX_FRAME, MAX_CLOSE_REASON_LEN)
    }
}

impl Limits {
    #[must_use]
    pub const fn new(
        max_message_size: usize,
        max_frame_size: usize,
        max_close_reason_len: usize,
    ) -> Self {
        Self {
            max_message_size,
            max_frame_size,
            max_close_reason_len,
        }
    }

    /// Reject an assembly buffer that has grown past `max_message_size`.
    ///
    /// # Errors
    ///
    /// [`Error::MessageTooLarge`] when `size` is over the limit.
    pub const fn check_message_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Reject a close reason of `len` encoded bytes if it will not fit.
    /// Reasons are never truncated.
    ///
    /// # Errors
    ///
    /// [`Error::CloseReasonTooLong`] when `len` is over the limit.
    pub fn check_close_reason(&self, len: usize) -> Result<(), Error> {
        let max = self.max_close_reason_len.min(MAX_CLOSE_REASON_LEN);
        if len > max {
            return Err(Error::CloseReasonTooLong { len, max });
        }
        Ok(())
    }
}

/// Deadlines used by the built-in transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Applied separately to each handshake phase: connecting plus writing
    /// the request, then reading a validated `101` response. Default 30 s.
    pub handshake: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl Timeouts {
    #[must_use]
    pub const fn new(handshake: Duration) -> Self {
        Self { handshake }
    }
}

/// Settings shared by [`WebSocket`](crate::WebSocket) and
/// [`TcpTransport`](crate::TcpTransport).
///
/// ```
/// use std::time::Duration;
/// use cwsock::{Config, Timeouts};
///
/// let config = Config::new()
///     .with_timeouts(Timeouts::new(Duration::from_secs(5)))
///     .with_user_agent("my-app/1.0");
/// assert_eq!(config.user_agent, "my-app/1.0");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub limits: Limits,
    pub timeouts: Timeouts,
    /// Initial capacity of the transport's socket read buffer. Default 8 KiB.
    pub read_buffer_size: usize,
    /// `User-Agent` sent with the upgrade request; empty sends none.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            read_buffer_size: DEFAULT_READ_BUFFER,
            user_agent: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
