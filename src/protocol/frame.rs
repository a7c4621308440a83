//! WebSocket frame parsing and serialization (RFC 6455).

use crate::error::{Error, Result};
use crate::protocol::mask::apply_mask_fast;
use crate::protocol::OpCode;

/// Hard maximum payload size, enforced during parse and after reassembly.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Payloads at or above this size are flushed to the socket in a separate
/// write instead of being staged through the frame buffer.
pub const LARGE_PAYLOAD: usize = 65536;

/// A WebSocket frame.
///
/// Frames are the basic unit of communication on the wire.
///
/// ## Frame structure
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. After reassembly this is always true.
    pub fin: bool,
    /// Frame opcode defining the interpretation of the payload.
    pub opcode: OpCode,
    /// Frame payload data.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new final frame with the given opcode and payload.
    #[must_use]
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            payload,
        }
    }

    /// Create a text frame. The payload must be valid UTF-8.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Text, data.into())
    }

    /// Create a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Binary, data.into())
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Pong, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = if let Some(code) = code {
            let mut data = code.to_be_bytes().to_vec();
            data.extend_from_slice(reason.as_bytes());
            data
        } else {
            Vec::new()
        };
        Self::new(OpCode::Close, payload)
    }

    /// Parse a frame from a buffer, unmasking the payload in place if a
    /// masking key is present.
    ///
    /// Returns the parsed frame and the number of bytes consumed.
    ///
    /// ## Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::ProtocolViolation` if a reserved header bit is set
    /// - `Error::InvalidFrame` if the 64-bit length has nonzero high bits
    /// - `Error::FrameTooLarge` if the payload exceeds [`MAX_FRAME_SIZE`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = (byte0 & 0x80) != 0;
        if byte0 & 0x70 != 0 {
            return Err(Error::ProtocolViolation(
                "Reserved header bits set".into(),
            ));
        }
        let opcode = OpCode::from_u8(byte0 & 0x0F);

        let masked = (byte1 & 0x80) != 0;
        let len7 = byte1 & 0x7F;

        let (payload_len, header_size) = match len7 {
            0..=125 => (len7 as usize, 2),
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
            }
            _ => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let len_u64 = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                // The high 32 bits of a 64-bit length are required to be zero.
                if len_u64 >> 32 != 0 {
                    return Err(Error::InvalidFrame(format!(
                        "64-bit payload length out of range: {}",
                        len_u64
                    )));
                }
                (len_u64 as usize, 10)
            }
        };

        if payload_len > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                size: payload_len,
                max: MAX_FRAME_SIZE,
            });
        }

        let total_header = if masked { header_size + 4 } else { header_size };
        if buf.len() < total_header {
            return Err(Error::IncompleteFrame {
                needed: total_header - buf.len(),
            });
        }

        let total_size = total_header + payload_len;
        if buf.len() < total_size {
            return Err(Error::IncompleteFrame {
                needed: total_size - buf.len(),
            });
        }

        let mut payload = buf[total_header..total_size].to_vec();
        if masked {
            let key = [
                buf[header_size],
                buf[header_size + 1],
                buf[header_size + 2],
                buf[header_size + 3],
            ];
            apply_mask_fast(&mut payload, key);
        }

        Ok((
            Frame {
                fin,
                opcode,
                payload,
            },
            total_size,
        ))
    }

    /// Write the frame header (FIN, opcode, length encoding, masking key) to
    /// `out`. The payload itself is not written; emission always sets FIN=1.
    pub fn write_header(&self, mask: Option<[u8; 4]>, out: &mut Vec<u8>) {
        out.push(0x80 | self.opcode.as_u8());

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        let len = self.payload.len();
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len < 65536 {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if let Some(key) = mask {
            out.extend_from_slice(&key);
        }
    }

    /// Serialize the whole frame to a fresh byte buffer, masking the payload
    /// when a key is given. Convenience for tests and the handshake path.
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(14 + self.payload.len());
        self.write_header(mask, &mut out);
        let start = out.len();
        out.extend_from_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask_fast(&mut out[start..], key);
        }
        out
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
