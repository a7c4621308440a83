//! Thread-safe registry of subprotocol templates.

use std::sync::{Arc, RwLock};

use crate::subproto::Subprotocol;

/// Ordered collection of subprotocol templates, shared between the accept
/// path and registration calls.
///
/// Lookup cost is linear; template counts are small (typically 1-3).
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    inner: Arc<RwLock<Vec<Subprotocol>>>,
}

impl ProtocolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a template. Returns false without inserting when a template
    /// with the same `(name, uri)` pair is already registered.
    pub fn add(&self, template: Subprotocol) -> bool {
        let mut list = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if list
            .iter()
            .any(|t| t.name == template.name && t.uri == template.uri)
        {
            return false;
        }
        list.push(template);
        true
    }

    /// Insert a template, replacing in place any existing one with the same
    /// `(name, uri)` pair.
    pub fn add_once(&self, template: Subprotocol) {
        let mut list = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = list
            .iter_mut()
            .find(|t| t.name == template.name && t.uri == template.uri)
        {
            *slot = template;
        } else {
            list.push(template);
        }
    }

    /// Remove the template with the given `(name, uri)` pair. Returns
    /// whether one was removed.
    pub fn remove(&self, name: &str, uri: &str) -> bool {
        let mut list = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = list.len();
        list.retain(|t| !(t.name == name && t.uri == uri));
        list.len() != before
    }

    /// Number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone the first template whose name matches and whose URI serves
    /// `uri`.
    #[must_use]
    pub fn clone_by_name(&self, name: &str, uri: &str) -> Option<Subprotocol> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.name == name && t.matches_uri(uri))
            .cloned()
    }

    /// Clone the first template serving `uri`, regardless of name.
    #[must_use]
    pub fn clone_by_uri(&self, uri: &str) -> Option<Subprotocol> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.matches_uri(uri))
            .cloned()
    }
}
