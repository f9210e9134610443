//! Prompt registration and dispatch resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use maestro_domain::config::{AgentConfig, SessionSpec};

use crate::filter::FilteringManager;
use crate::host::McpError;
use crate::protocol::PromptDef;
use crate::router::{ComponentKind, MessageRouter};

/// Holds prompt definitions per session and resolves fetches to providers.
pub struct PromptManager {
    router: Arc<MessageRouter>,
    defs: RwLock<HashMap<String, Vec<PromptDef>>>,
}

impl PromptManager {
    pub fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            defs: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register_session(&self, spec: &SessionSpec, prompts: Vec<PromptDef>) -> usize {
        let mut defs = self.defs.write();
        let entry = defs.entry(spec.id.clone()).or_default();
        let mut kept = 0;
        for prompt in prompts {
            if !FilteringManager::allow_registration(spec, &prompt.name) {
                tracing::debug!(
                    session_id = %spec.id,
                    prompt = %prompt.name,
                    "prompt denied at registration"
                );
                continue;
            }
            self.router
                .register_component(ComponentKind::Prompt, &prompt.name, &spec.id);
            entry.push(prompt);
            kept += 1;
        }
        kept
    }

    pub(crate) fn unregister_session(&self, session_id: &str) {
        self.defs.write().remove(session_id);
    }

    /// All registered prompts visible to an agent, ordered by name.
    pub fn list_prompts(&self, agent: &AgentConfig) -> Vec<PromptDef> {
        let mut out = Vec::new();
        for name in self.router.component_names(ComponentKind::Prompt) {
            if !FilteringManager::allow_component_for_agent(agent, &name) {
                continue;
            }
            let providers = self.router.providers_of(ComponentKind::Prompt, &name);
            let eligible = FilteringManager::filter_sessions_for_agent(agent, &providers);
            let Some(session_id) = eligible.first() else {
                continue;
            };
            let defs = self.defs.read();
            if let Some(def) = defs
                .get(session_id)
                .and_then(|prompts| prompts.iter().find(|p| p.name == name))
            {
                out.push(def.clone());
            }
        }
        out
    }

    /// Pick the session a prompt fetch dispatches to.
    pub fn resolve(&self, prompt_name: &str, agent: &AgentConfig) -> Result<String, McpError> {
        if !FilteringManager::allow_component_for_agent(agent, prompt_name) {
            return Err(McpError::PromptNotFound(prompt_name.to_owned()));
        }
        let providers = self.router.providers_of(ComponentKind::Prompt, prompt_name);
        let eligible = FilteringManager::filter_sessions_for_agent(agent, &providers);
        eligible
            .into_iter()
            .next()
            .ok_or_else(|| McpError::PromptNotFound(prompt_name.to_owned()))
    }
}
