//! WebSocket upgrade handshake (RFC 6455).
//!
//! This module handles the HTTP Upgrade mechanism for establishing
//! connections, on both the accepting and the initiating side.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Parse HTTP headers from an iterator of lines into a case-insensitive map.
///
/// Security-critical headers must not be duplicated.
fn parse_headers<'a, I>(
    lines: I,
    security_headers: Option<&[&str]>,
) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name_lower = name.trim().to_lowercase();

            if let Some(sec_headers) = security_headers {
                if sec_headers.contains(&name_lower.as_str()) && headers.contains_key(&name_lower) {
                    return Err(Error::InvalidHandshake(format!(
                        "Duplicate header: {}",
                        name.trim()
                    )));
                }
            }

            headers.insert(name_lower, value.trim().to_string());
        }
    }

    Ok(headers)
}

/// Computes the Sec-WebSocket-Accept value from the client's key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID)).
///
/// # Example
///
/// ```
/// use restws::protocol::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// assert_eq!(compute_accept_key(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Parsed upgrade request from a connecting peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version value.
    pub version: u8,
    /// The Sec-WebSocket-Protocol candidates, comma-split, in request order.
    pub protocols: Vec<String>,
}

impl HandshakeRequest {
    /// Parse an upgrade request from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed or the method is not `GET`.
    /// - The HTTP version is not `HTTP/1.1`.
    /// - Required headers are missing (`Host`, `Upgrade`, `Connection`,
    ///   `Sec-WebSocket-Key`, `Sec-WebSocket-Version`).
    /// - The `Upgrade` header is not `websocket` or the `Connection` header
    ///   does not contain `upgrade`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        }

        if parts[0] != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {}",
                parts[0]
            )));
        }

        if !parts[2].starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {}",
                parts[2]
            )));
        }

        let path = parts[1].to_string();

        let security_headers = [
            "host",
            "upgrade",
            "connection",
            "sec-websocket-key",
            "sec-websocket-version",
        ];
        let headers = parse_headers(lines, Some(&security_headers))?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {}",
                upgrade
            )));
        }

        let connection = headers
            .get("connection")
            .ok_or_else(|| Error::InvalidHandshake("Missing Connection header".into()))?;
        if !connection.to_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {}",
                connection
            )));
        }

        let host = headers
            .get("host")
            .ok_or_else(|| Error::InvalidHandshake("Missing Host header".into()))?
            .clone();

        let key = headers
            .get("sec-websocket-key")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?
            .clone();

        let version_str = headers.get("sec-websocket-version").ok_or_else(|| {
            Error::InvalidHandshake("Missing Sec-WebSocket-Version header".into())
        })?;
        let version: u8 = version_str
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {}", version_str)))?;

        let protocols = headers
            .get("sec-websocket-protocol")
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            path,
            host,
            key,
            version,
            protocols,
        })
    }

    /// Validate the upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The WebSocket version is below 13.
    /// - The key is not valid Base64 or does not decode to exactly 16 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.version < 13 {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected >= 13)",
                self.version
            )));
        }

        match BASE64.decode(&self.key) {
            Ok(decoded) => {
                if decoded.len() != 16 {
                    return Err(Error::InvalidHandshake(format!(
                        "Sec-WebSocket-Key must be 16 bytes, got {}",
                        decoded.len()
                    )));
                }
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }

        Ok(())
    }

    /// Parse an upgrade request with a size limit.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if data exceeds `max_size`
    /// - Other handshake errors as per `parse()`
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }
}

/// Upgrade response from the accepting side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Create an accepting response for a validated request and the chosen
    /// subprotocol name.
    #[must_use]
    pub fn accept(req: &HandshakeRequest, protocol: &str) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: Some(protocol.to_string()),
        }
    }

    /// Write the `101 Switching Protocols` response to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        if let Some(ref proto) = self.protocol {
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {}\r\n", proto).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse an upgrade response from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The status line is missing or the status code is not 101.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    /// - The `Sec-WebSocket-Accept` header is missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {}",
                status_line
            )));
        }

        let headers = parse_headers(lines, None)?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {}",
                upgrade
            )));
        }

        let connection = headers.get("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {}",
                connection
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        let protocol = headers.get("sec-websocket-protocol").cloned();

        Ok(Self { accept, protocol })
    }
}

/// Client-side upgrade state: a random nonce and the request built from it.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    /// The base64-encoded 16-byte nonce sent as `Sec-WebSocket-Key`.
    pub key: String,
}

impl ClientHandshake {
    /// Create a handshake with a fresh random nonce.
    #[must_use]
    pub fn new() -> Self {
        let nonce: [u8; 16] = rand::random();
        Self {
            key: BASE64.encode(nonce),
        }
    }

    /// Write the upgrade request for `path` on `host`, advertising
    /// `protocol` as the desired subprotocol.
    pub fn write_request(&self, host: &str, path: &str, protocol: &str, buf: &mut Vec<u8>) {
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {}\r\n", protocol).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    /// Verify the accepting side's response: the accept hash must be the
    /// byte-exact digest of our nonce and the chosen subprotocol must match.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] on any mismatch.
    pub fn verify(&self, response: &HandshakeResponse, protocol: &str) -> Result<()> {
        let expected = compute_accept_key(&self.key);
        if response.accept != expected {
            return Err(Error::InvalidHandshake(format!(
                "Accept mismatch: expected {}, got {}",
                expected, response.accept
            )));
        }

        match response.protocol.as_deref() {
            Some(p) if p == protocol => Ok(()),
            other => Err(Error::InvalidHandshake(format!(
                "Subprotocol mismatch: expected {}, got {:?}",
                protocol, other
            ))),
        }
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}
