//! In-memory history store, for tests and hosts without persistence
//! requirements.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use maestro_domain::error::Result;
use maestro_domain::tool::Message;

use crate::provider::StorageProvider;

/// A [`StorageProvider`] backed by a process-local map.
#[derive(Default)]
pub struct MemoryHistoryStore {
    histories: RwLock<HashMap<(String, String), Vec<Message>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored histories.
    pub fn len(&self) -> usize {
        self.histories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.read().is_empty()
    }
}

#[async_trait]
impl StorageProvider for MemoryHistoryStore {
    async fn load_history(
        &self,
        agent_name: &str,
        session_key: &str,
    ) -> Result<Option<Vec<Message>>> {
        Ok(self
            .histories
            .read()
            .get(&(agent_name.to_owned(), session_key.to_owned()))
            .cloned())
    }

    async fn save_history(
        &self,
        agent_name: &str,
        session_key: &str,
        messages: &[Message],
    ) -> Result<()> {
        self.histories.write().insert(
            (agent_name.to_owned(), session_key.to_owned()),
            messages.to_vec(),
        );
        Ok(())
    }

    async fn exists_session(&self, session_key: &str) -> Result<bool> {
        Ok(self
            .histories
            .read()
            .keys()
            .any(|(_, key)| key == session_key))
    }
}
