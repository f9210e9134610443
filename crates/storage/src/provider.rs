use async_trait::async_trait;

use maestro_domain::error::Result;
use maestro_domain::tool::Message;

/// History persistence contract.
///
/// Implementations must round-trip message sequences exactly: whatever was
/// saved is what a later load returns. Absence of a provider disables
/// persistence; agents still run with per-call ephemeral history.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Load the history for `(agent_name, session_key)`, if any.
    async fn load_history(
        &self,
        agent_name: &str,
        session_key: &str,
    ) -> Result<Option<Vec<Message>>>;

    /// Persist the history for `(agent_name, session_key)`.
    async fn save_history(
        &self,
        agent_name: &str,
        session_key: &str,
        messages: &[Message],
    ) -> Result<()>;

    /// Whether any agent has history under this session key.
    async fn exists_session(&self, session_key: &str) -> Result<bool>;
}
