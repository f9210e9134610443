use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named LLM parameter set. Agents reference one via `llm_config_id`;
/// `provider_tag` selects the adapter instance from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Identifier agents reference.
    pub id: String,
    /// Which registered provider adapter serves this config.
    pub provider_tag: String,
    /// Model name passed to the provider.
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// System prompt used when the agent config does not carry one.
    #[serde(default)]
    pub default_system_prompt: Option<String>,
}

/// One LLM provider endpoint (data-driven: adding a provider = adding
/// config, not code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The tag referenced by [`LlmConfig::provider_tag`].
    pub tag: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Direct key (prefer `api_key_env` outside tests).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

/// Wire-format family of a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}
