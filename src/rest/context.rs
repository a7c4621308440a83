//! Request and answer contexts carried by REST frames.

/// Well-known status values used across the substrate.
pub mod status {
    /// Successful call.
    pub const OK: u16 = 200;
    /// No matching handler, socket not acquired, or callback timed out.
    pub const NOT_FOUND: u16 = 404;
    /// No push handler was installed.
    pub const NOT_IMPLEMENTED: u16 = 501;
    /// Internal sentinel: the connection closed mid-call. Translated to
    /// [`NOT_FOUND`] at the public boundary.
    pub const WEBSOCKET_CLOSED: u16 = 0;
}

/// An inbound or outbound REST request.
///
/// Lives across one frame dispatch or one callback invocation; all fields
/// are owned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestContext {
    /// HTTP-style method ("GET", "POST", ...).
    pub method: String,
    /// Request URL/path.
    pub url: String,
    /// Raw header block, CRLF-separated `Name: value` lines.
    pub headers: String,
    /// When true the caller expects no answer frame.
    pub no_answer: bool,
    /// Body content type; empty means unspecified.
    pub content_type: String,
    /// Body bytes.
    pub content: Vec<u8>,
}

impl RequestContext {
    /// Create a bodyless request.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Attach a body and its content type.
    #[must_use]
    pub fn with_body(mut self, content_type: impl Into<String>, content: Vec<u8>) -> Self {
        self.content_type = content_type.into();
        self.content = content;
        self
    }

    /// Attach a raw header block.
    #[must_use]
    pub fn with_headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Mark the request as fire-and-forget.
    #[must_use]
    pub fn without_answer(mut self) -> Self {
        self.no_answer = true;
        self
    }
}

/// An inbound or outbound REST answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseContext {
    /// HTTP-style status code.
    pub status: u16,
    /// Raw header block, CRLF-separated `Name: value` lines.
    pub headers: String,
    /// Body content type; empty means unspecified.
    pub content_type: String,
    /// Body bytes.
    pub content: Vec<u8>,
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self {
            status: status::OK,
            headers: String::new(),
            content_type: String::new(),
            content: Vec::new(),
        }
    }
}

impl ResponseContext {
    /// Create a bodyless answer with the given status.
    #[must_use]
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Attach a body and its content type.
    #[must_use]
    pub fn with_body(mut self, content_type: impl Into<String>, content: Vec<u8>) -> Self {
        self.content_type = content_type.into();
        self.content = content;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = RequestContext::new("POST", "/items")
            .with_headers("Accept: application/json")
            .with_body("application/json", br#"{"a":1}"#.to_vec());

        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/items");
        assert_eq!(req.headers, "Accept: application/json");
        assert!(!req.no_answer);
        assert_eq!(req.content_type, "application/json");
    }

    #[test]
    fn test_request_without_answer() {
        let req = RequestContext::new("GET", "/fire").without_answer();
        assert!(req.no_answer);
    }

    #[test]
    fn test_response_defaults_to_ok() {
        let resp = ResponseContext::default();
        assert_eq!(resp.status, status::OK);
        assert!(resp.content.is_empty());
    }

    #[test]
    fn test_response_with_status() {
        let resp = ResponseContext::with_status(status::NOT_FOUND);
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn test_status_sentinels() {
        assert_eq!(status::WEBSOCKET_CLOSED, 0);
        assert_eq!(status::NOT_FOUND, 404);
    }
}
