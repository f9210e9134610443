mod agents;
mod host;
mod llm;
mod sessions;
mod workflows;

pub use agents::*;
pub use host::*;
pub use llm::*;
pub use sessions::*;
pub use workflows::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fully-parsed runtime configuration.
///
/// The loader that produces this from TOML/JSON files lives in the
/// embedding application; the core only consumes the value objects.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    /// MCP sessions brought up at host start.
    #[serde(default)]
    pub sessions: Vec<SessionSpec>,
    /// LLM provider endpoints, keyed by tag.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Named LLM parameter sets referenced by agents.
    #[serde(default)]
    pub llm_configs: Vec<LlmConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub workflows: Vec<WorkflowConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Conversation history persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Base directory for the JSON-file history store.
    /// `None` disables persistence; agents run with ephemeral history.
    #[serde(default)]
    pub path: Option<PathBuf>,
}
