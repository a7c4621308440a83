//! Subprotocol templates negotiated during the upgrade handshake.

use crate::rest::{BinaryCodec, FrameCipher, JsonCodec, PayloadCodec};

/// Subprotocol name for the JSON encoding.
pub const PROTO_JSON: &str = "synopsejson";
/// Subprotocol name for the binary encoding.
pub const PROTO_BINARY: &str = "synopsebinary";

/// What a subprotocol does with data frames.
#[derive(Debug, Clone)]
pub enum SubprotocolKind {
    /// Raw one-way frames, bypassing the REST machinery.
    Chat,
    /// REST request/answer frames under the given payload codec.
    Rest(PayloadCodec),
}

/// A registered subprotocol template.
///
/// Templates are immutable once registered; each accepted connection gets
/// its own clone so per-connection codec state (such as a cipher key
/// schedule) stays isolated.
#[derive(Debug, Clone)]
pub struct Subprotocol {
    /// The name advertised via `Sec-WebSocket-Protocol`.
    pub name: String,
    /// Exact request path this template binds to; empty matches any path.
    pub uri: String,
    /// Frame handling behavior.
    pub kind: SubprotocolKind,
}

impl Subprotocol {
    /// The JSON REST protocol bound to `uri`.
    #[must_use]
    pub fn json(uri: impl Into<String>) -> Self {
        Self {
            name: PROTO_JSON.into(),
            uri: uri.into(),
            kind: SubprotocolKind::Rest(PayloadCodec::Json(JsonCodec)),
        }
    }

    /// The binary REST protocol bound to `uri`, with optional compression
    /// and encryption.
    #[must_use]
    pub fn binary(uri: impl Into<String>, compressed: bool, cipher: Option<FrameCipher>) -> Self {
        Self {
            name: PROTO_BINARY.into(),
            uri: uri.into(),
            kind: SubprotocolKind::Rest(PayloadCodec::Binary(BinaryCodec::new(
                compressed, cipher,
            ))),
        }
    }

    /// A push-only chat protocol under a custom name.
    #[must_use]
    pub fn chat(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            kind: SubprotocolKind::Chat,
        }
    }

    /// Whether this template serves `uri`: an empty registered URI matches
    /// any path, otherwise the match is exact.
    #[must_use]
    pub fn matches_uri(&self, uri: &str) -> bool {
        self.uri.is_empty() || self.uri == uri
    }

    /// The REST payload codec, if this is a REST protocol.
    #[must_use]
    pub fn payload_codec(&self) -> Option<&PayloadCodec> {
        match &self.kind {
            SubprotocolKind::Rest(codec) => Some(codec),
            SubprotocolKind::Chat => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_template() {
        let proto = Subprotocol::json("");
        assert_eq!(proto.name, "synopsejson");
        assert!(proto.payload_codec().is_some());
    }

    #[test]
    fn test_binary_template() {
        let proto = Subprotocol::binary("/api", true, Some(FrameCipher::from_text("k")));
        assert_eq!(proto.name, "synopsebinary");
        assert_eq!(proto.uri, "/api");
        match proto.kind {
            SubprotocolKind::Rest(PayloadCodec::Binary(ref codec)) => {
                assert!(codec.compressed);
                assert!(codec.cipher.is_some());
            }
            _ => panic!("expected binary REST kind"),
        }
    }

    #[test]
    fn test_chat_template_has_no_codec() {
        let proto = Subprotocol::chat("mychat", "");
        assert!(proto.payload_codec().is_none());
    }

    #[test]
    fn test_uri_matching() {
        let any = Subprotocol::json("");
        assert!(any.matches_uri("/anything"));
        assert!(any.matches_uri(""));

        let exact = Subprotocol::json("/api");
        assert!(exact.matches_uri("/api"));
        assert!(!exact.matches_uri("/api/v2"));
        assert!(!exact.matches_uri("/"));
    }
}
