//! Client side of the HTTP Upgrade handshake (RFC 6455 Section 4).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::transport::TransportError;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of a handshake response head.
pub const MAX_RESPONSE_HEAD: usize = 8192;

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use cwsock::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh Sec-WebSocket-Key: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// Returns an error if the system random source is unavailable.
pub fn generate_key() -> std::result::Result<String, TransportError> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| TransportError::Io(format!("random source unavailable: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Position just past the `\r\n\r\n` terminating an HTTP head, if present.
#[must_use]
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// The upgrade request a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Value of the Host header.
    pub host: String,
    /// Request target, starting with `/`.
    pub path: String,
    /// Sec-WebSocket-Key.
    pub key: String,
    /// Optional User-Agent header.
    pub user_agent: Option<String>,
}

impl ClientRequest {
    /// Serialize the request head into `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        buf.extend_from_slice(format!("GET {path} HTTP/1.1\r\n").as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
        if let Some(agent) = &self.user_agent {
            buf.extend_from_slice(format!("User-Agent: {agent}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
    }
}

/// The server's answer to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    /// Parse a handshake response head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The status code is not `101`.
    /// - `Upgrade`, `Connection` or `Sec-WebSocket-Accept` is missing or wrong.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let mut parts = status_line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(version), Some("101")) if version.starts_with("HTTP/1.") => {}
            _ => {
                return Err(Error::InvalidHandshake(format!(
                    "Expected 101 status, got: {status_line}"
                )));
            }
        }

        let mut headers: FxHashMap<String, &str> = FxHashMap::default();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim());
            }
        }

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }

        let connection = headers.get("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;

        Ok(Self {
            accept: (*accept).to_string(),
        })
    }

    /// Check the accept value against the key that was sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] on mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.accept == compute_accept_key(key) {
            Ok(())
        } else {
            Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match key".into(),
            ))
        }
    }
}
