use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative definition of one agent: which LLM it talks to, which
/// sessions and components it may reach, and how its loop is bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    /// System prompt. Falls back to the LLM config's default when unset.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Which named [`super::LlmConfig`] this agent uses.
    pub llm_config_id: String,

    /// Sessions this agent may dispatch to. `None` = all sessions.
    #[serde(default)]
    pub allowed_sessions: Option<Vec<String>>,

    /// Component names this agent must never see or call.
    #[serde(default)]
    pub excluded_components: HashSet<String>,

    /// Upper bound on tool-use loop iterations. Clamped to at least 1.
    #[serde(default = "d_10")]
    pub max_iterations: u32,

    /// Load and persist conversation history keyed by session.
    #[serde(default)]
    pub include_history: bool,

    /// Optional JSON Schema the final assistant text must satisfy.
    #[serde(default)]
    pub response_schema: Option<serde_json::Value>,

    /// Wall-clock ceiling for one run, milliseconds. 0 = no limit.
    #[serde(default)]
    pub max_duration_ms: u64,
}

impl AgentConfig {
    /// `max_iterations` with the ≥ 1 invariant applied.
    pub fn iteration_cap(&self) -> u32 {
        self.max_iterations.max(1)
    }

    /// Whether this agent may talk to the given session at all.
    pub fn session_allowed(&self, session_id: &str) -> bool {
        match &self.allowed_sessions {
            None => true,
            Some(allowed) => allowed.iter().any(|s| s == session_id),
        }
    }

    /// Whether this agent may see or call the given component.
    pub fn component_allowed(&self, component_name: &str) -> bool {
        !self.excluded_components.contains(component_name)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_10() -> u32 {
    10
}
