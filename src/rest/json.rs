//! Human-readable JSON payload encoding, carried in Text frames.
//!
//! A payload is a single-member object keyed by the head token, holding an
//! array of the fields as JSON strings, then the content type, then the
//! body. The body representation depends on the content type: JSON bodies
//! are inlined as raw JSON values, `text/*` bodies as JSON strings, and
//! anything else as base64 behind a magic marker character.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::rest::context::{RequestContext, ResponseContext};
use crate::rest::{HEAD_ANSWER, HEAD_REQUEST};

/// Marker prefixed to base64-framed bodies inside JSON strings.
pub const BASE64_MAGIC: char = '\u{fff0}';

const JSON_MIME: &str = "application/json";

/// The JSON payload codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a request into a Text frame.
    ///
    /// # Errors
    ///
    /// Returns an error when a JSON-typed body is not parseable JSON or a
    /// `text/*` body is not UTF-8.
    pub fn encode_request(&self, ctxt: &RequestContext) -> Result<Frame> {
        let fields = vec![
            Value::String(ctxt.method.clone()),
            Value::String(ctxt.url.clone()),
            Value::String(ctxt.headers.clone()),
            Value::String(if ctxt.no_answer { "1" } else { "0" }.into()),
            Value::String(ctxt.content_type.clone()),
            encode_body(&ctxt.content_type, &ctxt.content)?,
        ];
        Ok(self.wrap(HEAD_REQUEST, fields))
    }

    /// Decode a request payload.
    ///
    /// Returns `Ok(None)` when the payload carries the answer head token
    /// instead: such frames are not ours and are silently dropped upstream.
    pub fn decode_request(&self, payload: &[u8]) -> Result<Option<RequestContext>> {
        let fields = match self.unwrap(payload, HEAD_REQUEST, HEAD_ANSWER)? {
            Some(fields) => fields,
            None => return Ok(None),
        };
        if fields.len() != 6 {
            return Err(Error::Decode(format!(
                "Request payload has {} fields, expected 6",
                fields.len()
            )));
        }

        let mut fields = fields.into_iter();
        let method = take_string(&mut fields)?;
        let url = take_string(&mut fields)?;
        let headers = take_string(&mut fields)?;
        let no_answer = match take_string(&mut fields)?.as_str() {
            "0" => false,
            "1" => true,
            other => {
                return Err(Error::Decode(format!(
                    "Invalid no-answer flag: {:?}",
                    other
                )))
            }
        };
        let content_type = take_string(&mut fields)?;
        let content = decode_body(fields.next().unwrap_or(Value::String(String::new())))?;

        Ok(Some(RequestContext {
            method,
            url,
            headers,
            no_answer,
            content_type,
            content,
        }))
    }

    /// Encode an answer into a Text frame.
    ///
    /// # Errors
    ///
    /// Same body constraints as [`encode_request`](Self::encode_request).
    pub fn encode_answer(&self, ctxt: &ResponseContext) -> Result<Frame> {
        let fields = vec![
            Value::String(ctxt.status.to_string()),
            Value::String(ctxt.headers.clone()),
            Value::String(ctxt.content_type.clone()),
            encode_body(&ctxt.content_type, &ctxt.content)?,
        ];
        Ok(self.wrap(HEAD_ANSWER, fields))
    }

    /// Decode an answer payload.
    ///
    /// Returns `Ok(None)` when the payload carries the request head token
    /// instead (the peer's crossed call).
    pub fn decode_answer(&self, payload: &[u8]) -> Result<Option<ResponseContext>> {
        let fields = match self.unwrap(payload, HEAD_ANSWER, HEAD_REQUEST)? {
            Some(fields) => fields,
            None => return Ok(None),
        };
        if fields.len() != 4 {
            return Err(Error::Decode(format!(
                "Answer payload has {} fields, expected 4",
                fields.len()
            )));
        }

        let mut fields = fields.into_iter();
        let status_text = take_string(&mut fields)?;
        let status: u16 = status_text
            .parse()
            .map_err(|_| Error::Decode(format!("Invalid status: {:?}", status_text)))?;
        let headers = take_string(&mut fields)?;
        let content_type = take_string(&mut fields)?;
        let content = decode_body(fields.next().unwrap_or(Value::String(String::new())))?;

        Ok(Some(ResponseContext {
            status,
            headers,
            content_type,
            content,
        }))
    }

    fn wrap(&self, head: &str, fields: Vec<Value>) -> Frame {
        let mut object = Map::with_capacity(1);
        object.insert(head.to_string(), Value::Array(fields));
        Frame::text(Value::Object(object).to_string())
    }

    /// Parse the single-member envelope and check its head token.
    ///
    /// `Ok(None)` means the member is keyed by `other` rather than
    /// `expected`; anything else unrecognized is an error.
    fn unwrap(&self, payload: &[u8], expected: &str, other: &str) -> Result<Option<Vec<Value>>> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Decode(format!("Invalid JSON payload: {}", e)))?;
        let object = match value {
            Value::Object(object) if object.len() == 1 => object,
            _ => return Err(Error::Decode("Payload is not a single-member object".into())),
        };

        let (head, body) = object
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode("Empty payload object".into()))?;

        if head.eq_ignore_ascii_case(other) {
            return Ok(None);
        }
        if !head.eq_ignore_ascii_case(expected) {
            return Err(Error::Decode(format!("Unknown head token: {:?}", head)));
        }

        match body {
            Value::Array(fields) => Ok(Some(fields)),
            _ => Err(Error::Decode("Head value is not an array".into())),
        }
    }
}

fn take_string(fields: &mut std::vec::IntoIter<Value>) -> Result<String> {
    match fields.next() {
        Some(Value::String(s)) => Ok(s),
        other => Err(Error::Decode(format!(
            "Expected string field, got {:?}",
            other
        ))),
    }
}

/// Map a body to its JSON representation according to the content type.
fn encode_body(content_type: &str, content: &[u8]) -> Result<Value> {
    if content.is_empty() {
        return Ok(Value::String(String::new()));
    }

    if content_type.is_empty() || content_type.starts_with(JSON_MIME) {
        return serde_json::from_slice(content)
            .map_err(|e| Error::Decode(format!("Body is not valid JSON: {}", e)));
    }

    if content_type.starts_with("text/") {
        let text = std::str::from_utf8(content)?;
        return Ok(Value::String(text.to_string()));
    }

    Ok(Value::String(format!(
        "{}{}",
        BASE64_MAGIC,
        BASE64.encode(content)
    )))
}

/// Inverse of [`encode_body`]: strings are text or magic-marked base64,
/// everything else is a raw JSON body serialized back to bytes.
fn decode_body(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => {
            if let Some(encoded) = s.strip_prefix(BASE64_MAGIC) {
                BASE64
                    .decode(encoded)
                    .map_err(|e| Error::Decode(format!("Invalid base64 body: {}", e)))
            } else {
                Ok(s.into_bytes())
            }
        }
        other => serde_json::to_vec(&other)
            .map_err(|e| Error::Decode(format!("Unserializable body: {}", e))),
    }
}
