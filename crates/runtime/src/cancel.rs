//! Session-keyed cancellation registry.
//!
//! The facade registers the token of each keyed run here so embedders can
//! abort by session key (a stop endpoint, a CLI ^C handler). Cascading to
//! tool calls and transports happens through child tokens, not this map.

use std::collections::HashMap;

use parking_lot::Mutex;

use maestro_domain::cancel::CancelToken;

/// Active run tokens by session key.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a run's token under a key. A newer run replaces the older
    /// entry; the older token keeps working for its own run.
    pub fn insert(&self, key: &str, token: CancelToken) {
        self.tokens.lock().insert(key.to_owned(), token);
    }

    /// Cancel the run registered under a key. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tokens.lock().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a key (the run completed).
    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
    }

    /// Whether a run is registered under this key.
    pub fn is_running(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }
}
