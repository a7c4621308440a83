//! REST request/answer payload encodings.
//!
//! Two wire encodings of the same `(method, url, headers, body, content
//! type, status)` tuple share one framing contract: the payload leads with a
//! head token naming its intent, and a frame headed by the *other* token
//! than expected is not an error, it is simply not ours.

pub mod binary;
pub mod compress;
pub mod context;
pub mod crypto;
pub mod json;

pub use binary::BinaryCodec;
pub use compress::COMPRESS_THRESHOLD;
pub use context::{status, RequestContext, ResponseContext};
pub use crypto::FrameCipher;
pub use json::{JsonCodec, BASE64_MAGIC};

use crate::error::Result;
use crate::protocol::{Frame, OpCode};

/// Head token identifying a request payload.
pub const HEAD_REQUEST: &str = "request";
/// Head token identifying an answer payload.
pub const HEAD_ANSWER: &str = "answer";

/// The encoder strategy selected by the negotiated subprotocol.
#[derive(Debug, Clone)]
pub enum PayloadCodec {
    /// JSON text frames.
    Json(JsonCodec),
    /// Binary frames, optionally compressed and encrypted.
    Binary(BinaryCodec),
}

impl PayloadCodec {
    /// The frame opcode this codec produces and accepts.
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            PayloadCodec::Json(_) => OpCode::Text,
            PayloadCodec::Binary(_) => OpCode::Binary,
        }
    }

    /// Encode a request into a frame.
    pub fn encode_request(&self, ctxt: &RequestContext) -> Result<Frame> {
        match self {
            PayloadCodec::Json(codec) => codec.encode_request(ctxt),
            PayloadCodec::Binary(codec) => codec.encode_request(ctxt),
        }
    }

    /// Decode a request payload; `Ok(None)` means the frame is headed by
    /// the answer token and must be silently dropped.
    pub fn decode_request(&self, payload: &[u8]) -> Result<Option<RequestContext>> {
        match self {
            PayloadCodec::Json(codec) => codec.decode_request(payload),
            PayloadCodec::Binary(codec) => codec.decode_request(payload),
        }
    }

    /// Encode an answer into a frame.
    pub fn encode_answer(&self, ctxt: &ResponseContext) -> Result<Frame> {
        match self {
            PayloadCodec::Json(codec) => codec.encode_answer(ctxt),
            PayloadCodec::Binary(codec) => codec.encode_answer(ctxt),
        }
    }

    /// Decode an answer payload; `Ok(None)` means the frame is headed by
    /// the request token and must be silently dropped.
    pub fn decode_answer(&self, payload: &[u8]) -> Result<Option<ResponseContext>> {
        match self {
            PayloadCodec::Json(codec) => codec.decode_answer(payload),
            PayloadCodec::Binary(codec) => codec.decode_answer(payload),
        }
    }
}
