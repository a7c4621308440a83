//! WebSocket frame opcodes as defined in RFC 6455.

/// WebSocket frame opcode.
///
/// Defines the interpretation of the payload data. All sixteen 4-bit wire
/// values are representable; the reserved ranges (0x3-0x7, 0xB-0xF) decode
/// to [`OpCode::Reserved`] and are tolerated by the engine rather than
/// failing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation frame (0x0).
    ///
    /// Used for fragmented messages after the initial frame.
    Continuation,

    /// Text frame (0x1).
    ///
    /// Payload must be valid UTF-8 after reassembly.
    Text,

    /// Binary frame (0x2).
    ///
    /// Payload is arbitrary binary data.
    Binary,

    /// Close frame (0x8).
    ///
    /// Initiates connection close. May contain status code and reason.
    Close,

    /// Ping frame (0x9).
    ///
    /// Used for keepalive. Receiver must respond with Pong.
    Ping,

    /// Pong frame (0xA).
    ///
    /// Response to Ping. May be sent unsolicited.
    Pong,

    /// Reserved opcode (0x3-0x7 data range, 0xB-0xF control range).
    Reserved(u8),
}

impl OpCode {
    /// Create an `OpCode` from the low 4 bits of a byte.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Self {
        match byte & 0x0F {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }

    /// Convert the opcode to its 4-bit wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(v) => v & 0x0F,
        }
    }

    /// Check if this is a control frame opcode.
    ///
    /// Control frames: Close (0x8), Ping (0x9), Pong (0xA).
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Check if this is a data frame opcode.
    ///
    /// Data frames: Continuation (0x0), Text (0x1), Binary (0x2).
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, OpCode::Continuation | OpCode::Text | OpCode::Binary)
    }

    /// Check if this opcode falls in one of the RFC 6455 reserved ranges.
    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        matches!(self, OpCode::Reserved(_))
    }

    /// Get a human-readable name for this opcode.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Continuation => "Continuation",
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
            OpCode::Reserved(_) => "Reserved",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
