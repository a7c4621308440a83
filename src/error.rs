//! Error types for the messaging substrate.
//!
//! This module defines all error conditions that can occur during frame
//! transport, handshake, and payload decoding.

use thiserror::Error;

/// Result type alias for substrate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on a WebSocket connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds the hard maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake data exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Payload could not be decoded into a request or answer.
    #[error("Payload decode failed: {0}")]
    Decode(String),

    /// Encryption or decryption failed.
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// The user request handler panicked.
    #[error("Request handler panicked")]
    HandlerPanic,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 300_000_000,
            max: 268_435_456,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 300000000 bytes (max: 268435456)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
    }

    #[test]
    fn test_error_clone() {
        let err = Error::InvalidUtf8;
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
