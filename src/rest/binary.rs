//! Compact binary payload encoding, carried in Binary frames.
//!
//! A payload is `head-token 0x01 block` where the block joins the fields
//! with 0x01 separators, then the content type, then the raw body as the
//! remainder. The block is optionally deflate-compressed and then
//! optionally encrypted; both stages are per-connection settings cloned
//! from the registered protocol template.

use crate::error::{Error, Result};
use crate::protocol::{Frame, MAX_FRAME_SIZE};
use crate::rest::compress::{compress_block, decompress_block};
use crate::rest::context::{RequestContext, ResponseContext};
use crate::rest::crypto::FrameCipher;
use crate::rest::{HEAD_ANSWER, HEAD_REQUEST};

const SEP: u8 = 0x01;

/// The binary payload codec with optional compression and encryption.
#[derive(Debug, Clone, Default)]
pub struct BinaryCodec {
    /// Deflate the field block before (optionally) encrypting it.
    pub compressed: bool,
    /// Encrypt the field block; `None` means plaintext frames.
    pub cipher: Option<FrameCipher>,
}

impl BinaryCodec {
    /// Plain binary framing without compression or encryption.
    #[must_use]
    pub fn plain() -> Self {
        Self::default()
    }

    /// Binary framing with the given stages enabled.
    #[must_use]
    pub fn new(compressed: bool, cipher: Option<FrameCipher>) -> Self {
        Self { compressed, cipher }
    }

    /// Encode a request into a Binary frame.
    pub fn encode_request(&self, ctxt: &RequestContext) -> Result<Frame> {
        let mut block = Vec::with_capacity(
            ctxt.method.len()
                + ctxt.url.len()
                + ctxt.headers.len()
                + ctxt.content_type.len()
                + ctxt.content.len()
                + 8,
        );
        push_field(&mut block, ctxt.method.as_bytes())?;
        push_field(&mut block, ctxt.url.as_bytes())?;
        push_field(&mut block, ctxt.headers.as_bytes())?;
        push_field(&mut block, if ctxt.no_answer { b"1" } else { b"0" })?;
        push_field(&mut block, ctxt.content_type.as_bytes())?;
        block.extend_from_slice(&ctxt.content);

        Ok(self.seal(HEAD_REQUEST, block))
    }

    /// Decode a request payload.
    ///
    /// Returns `Ok(None)` when the payload carries the answer head token
    /// instead: such frames are not ours and are silently dropped upstream.
    pub fn decode_request(&self, payload: &[u8]) -> Result<Option<RequestContext>> {
        let block = match self.open(payload, HEAD_REQUEST, HEAD_ANSWER)? {
            Some(block) => block,
            None => return Ok(None),
        };

        let mut scanner = FieldScanner::new(&block);
        let method = scanner.take_text()?;
        let url = scanner.take_text()?;
        let headers = scanner.take_text()?;
        let no_answer = match scanner.take_field()? {
            b"0" => false,
            b"1" => true,
            other => {
                return Err(Error::Decode(format!(
                    "Invalid no-answer flag: {:?}",
                    other
                )))
            }
        };
        let content_type = scanner.take_text()?;
        let content = scanner.rest().to_vec();

        Ok(Some(RequestContext {
            method,
            url,
            headers,
            no_answer,
            content_type,
            content,
        }))
    }

    /// Encode an answer into a Binary frame.
    pub fn encode_answer(&self, ctxt: &ResponseContext) -> Result<Frame> {
        let mut block = Vec::with_capacity(
            8 + ctxt.headers.len() + ctxt.content_type.len() + ctxt.content.len(),
        );
        push_field(&mut block, ctxt.status.to_string().as_bytes())?;
        push_field(&mut block, ctxt.headers.as_bytes())?;
        push_field(&mut block, ctxt.content_type.as_bytes())?;
        block.extend_from_slice(&ctxt.content);

        Ok(self.seal(HEAD_ANSWER, block))
    }

    /// Decode an answer payload.
    ///
    /// Returns `Ok(None)` when the payload carries the request head token
    /// instead (the peer's crossed call).
    pub fn decode_answer(&self, payload: &[u8]) -> Result<Option<ResponseContext>> {
        let block = match self.open(payload, HEAD_ANSWER, HEAD_REQUEST)? {
            Some(block) => block,
            None => return Ok(None),
        };

        let mut scanner = FieldScanner::new(&block);
        let status_text = scanner.take_text()?;
        let status: u16 = status_text
            .parse()
            .map_err(|_| Error::Decode(format!("Invalid status: {:?}", status_text)))?;
        let headers = scanner.take_text()?;
        let content_type = scanner.take_text()?;
        let content = scanner.rest().to_vec();

        Ok(Some(ResponseContext {
            status,
            headers,
            content_type,
            content,
        }))
    }

    /// Apply the outbound stages and prepend the head token.
    fn seal(&self, head: &str, block: Vec<u8>) -> Frame {
        let mut block = block;
        if self.compressed {
            block = compress_block(&block);
        }
        if let Some(ref cipher) = self.cipher {
            block = cipher.encrypt(block);
        }

        let mut payload = Vec::with_capacity(head.len() + 1 + block.len());
        payload.extend_from_slice(head.as_bytes());
        payload.push(SEP);
        payload.append(&mut block);
        Frame::binary(payload)
    }

    /// Check the head token and undo the inbound stages.
    ///
    /// `Ok(None)` means the payload is headed by `other` rather than
    /// `expected`; anything else unrecognized is an error.
    fn open(&self, payload: &[u8], expected: &str, other: &str) -> Result<Option<Vec<u8>>> {
        let sep = payload
            .iter()
            .position(|&b| b == SEP)
            .ok_or_else(|| Error::Decode("Missing head separator".into()))?;
        let head = &payload[..sep];

        if head.eq_ignore_ascii_case(other.as_bytes()) {
            return Ok(None);
        }
        if !head.eq_ignore_ascii_case(expected.as_bytes()) {
            return Err(Error::Decode(format!(
                "Unknown head token: {:?}",
                String::from_utf8_lossy(head)
            )));
        }

        let mut block = payload[sep + 1..].to_vec();
        if let Some(ref cipher) = self.cipher {
            block = cipher.decrypt(&block)?;
        }
        if self.compressed {
            block = decompress_block(&block, MAX_FRAME_SIZE)?;
        }
        Ok(Some(block))
    }
}

/// Reject separator bytes inside text fields; the scanner could not tell
/// them apart from field boundaries.
fn push_field(block: &mut Vec<u8>, field: &[u8]) -> Result<()> {
    if field.contains(&SEP) {
        return Err(Error::Decode("Field contains the separator byte".into()));
    }
    block.extend_from_slice(field);
    block.push(SEP);
    Ok(())
}

/// Splits a block on successive separators, leaving the remainder.
struct FieldScanner<'a> {
    rest: &'a [u8],
}

impl<'a> FieldScanner<'a> {
    fn new(block: &'a [u8]) -> Self {
        Self { rest: block }
    }

    fn take_field(&mut self) -> Result<&'a [u8]> {
        let sep = self
            .rest
            .iter()
            .position(|&b| b == SEP)
            .ok_or_else(|| Error::Decode("Truncated field block".into()))?;
        let field = &self.rest[..sep];
        self.rest = &self.rest[sep + 1..];
        Ok(field)
    }

    fn take_text(&mut self) -> Result<String> {
        let field = self.take_field()?;
        Ok(std::str::from_utf8(field)?.to_string())
    }

    fn rest(&self) -> &'a [u8] {
        self.rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn sample_request() -> RequestContext {
        RequestContext::new("POST", "/items/42")
            .with_headers("Accept: */*\r\nX-Trace: abc")
            .with_body("application/octet-stream", vec![0u8, 1, 2, 3, 0xff, 0x01])
    }

    #[test]
    fn test_request_roundtrip_plain() {
        let codec = BinaryCodec::plain();
        let original = sample_request();
        let frame = codec.encode_request(&original).unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert!(frame.payload.starts_with(b"request\x01"));

        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_request_roundtrip_compressed() {
        let codec = BinaryCodec::new(true, None);
        let mut original = sample_request();
        original.content = b"abc".iter().copied().cycle().take(10_000).collect();

        let frame = codec.encode_request(&original).unwrap();
        assert!(frame.payload.len() < original.content.len());

        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_request_roundtrip_encrypted() {
        let codec = BinaryCodec::new(false, Some(FrameCipher::from_text("secret")));
        let original = sample_request();
        let frame = codec.encode_request(&original).unwrap();

        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_request_roundtrip_compressed_and_encrypted() {
        let codec = BinaryCodec::new(true, Some(FrameCipher::from_text("secret")));
        let mut original = sample_request();
        original.content = vec![7u8; 100_000];

        let frame = codec.encode_request(&original).unwrap();
        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_answer_roundtrip() {
        let codec = BinaryCodec::plain();
        let original = ResponseContext::with_status(201)
            .with_body("text/plain", b"created".to_vec());
        let frame = codec.encode_answer(&original).unwrap();
        assert!(frame.payload.starts_with(b"answer\x01"));

        let decoded = codec.decode_answer(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_no_answer_flag_roundtrip() {
        let codec = BinaryCodec::plain();
        let original = RequestContext::new("GET", "/fire").without_answer();
        let frame = codec.encode_request(&original).unwrap();
        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        assert!(decoded.no_answer);
    }

    #[test]
    fn test_decode_request_drops_answer_payload() {
        let codec = BinaryCodec::plain();
        let answer = codec
            .encode_answer(&ResponseContext::with_status(200))
            .unwrap();
        assert!(codec.decode_request(&answer.payload).unwrap().is_none());
    }

    #[test]
    fn test_decode_answer_drops_request_payload() {
        let codec = BinaryCodec::plain();
        let request = codec.encode_request(&sample_request()).unwrap();
        assert!(codec.decode_answer(&request.payload).unwrap().is_none());
    }

    #[test]
    fn test_head_token_case_insensitive() {
        let codec = BinaryCodec::plain();
        let mut payload = b"REQUEST\x01".to_vec();
        payload.extend_from_slice(b"GET\x01/\x01\x01" as &[u8]);
        payload.extend_from_slice(b"0\x01\x01");
        let decoded = codec.decode_request(&payload).unwrap().unwrap();
        assert_eq!(decoded.method, "GET");
    }

    #[test]
    fn test_unknown_head_token_is_error() {
        let codec = BinaryCodec::plain();
        let payload = b"bogus\x01whatever";
        assert!(codec.decode_request(payload).is_err());
    }

    #[test]
    fn test_missing_separator_is_error() {
        let codec = BinaryCodec::plain();
        assert!(codec.decode_request(b"no separator here").is_err());
    }

    #[test]
    fn test_truncated_block_is_error() {
        let codec = BinaryCodec::plain();
        let payload = b"request\x01GET\x01/"; // headers and the rest missing
        assert!(codec.decode_request(payload).is_err());
    }

    #[test]
    fn test_field_with_separator_rejected_on_encode() {
        let codec = BinaryCodec::plain();
        let bad = RequestContext::new("GET", "/a\x01b");
        assert!(codec.encode_request(&bad).is_err());
    }

    #[test]
    fn test_wrong_key_is_decode_error() {
        let encoder = BinaryCodec::new(false, Some(FrameCipher::from_text("right")));
        let decoder = BinaryCodec::new(false, Some(FrameCipher::from_text("wrong")));

        let frame = encoder.encode_request(&sample_request()).unwrap();
        // Either the cipher or the field scanner rejects the garbage.
        assert!(decoder.decode_request(&frame.payload).is_err());
    }

    #[test]
    fn test_content_may_contain_separators() {
        let codec = BinaryCodec::plain();
        let original = RequestContext::new("POST", "/raw")
            .with_body("application/octet-stream", vec![SEP, SEP, 0, SEP]);
        let frame = codec.encode_request(&original).unwrap();
        let decoded = codec.decode_request(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded.content, original.content);
    }
}
