//! Resource root validation.
//!
//! Each session may declare a set of URI prefixes its resources live
//! under. Resource reads are gated on membership by prefix. A session
//! with no declared roots is unrestricted; gating is opt-in.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Per-session permitted URI roots.
#[derive(Default)]
pub struct RootManager {
    roots: RwLock<HashMap<String, Vec<String>>>,
}

impl RootManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the permitted roots for a session. Replaces prior roots.
    pub fn set_roots(&self, session_id: &str, roots: Vec<String>) {
        if roots.is_empty() {
            self.roots.write().remove(session_id);
        } else {
            self.roots.write().insert(session_id.to_owned(), roots);
        }
    }

    /// Drop all roots for a session.
    pub fn clear_session(&self, session_id: &str) {
        self.roots.write().remove(session_id);
    }

    /// Is this URI within the session's permitted roots?
    pub fn validate(&self, session_id: &str, uri: &str) -> bool {
        match self.roots.read().get(session_id) {
            None => true,
            Some(roots) => roots.iter().any(|root| uri.starts_with(root.as_str())),
        }
    }

    /// The roots currently recorded for a session.
    pub fn roots_of(&self, session_id: &str) -> Vec<String> {
        self.roots
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}
