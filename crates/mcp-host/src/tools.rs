//! Tool registration and dispatch resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use maestro_domain::config::{AgentConfig, SessionSpec};
use maestro_domain::tool::ToolDefinition;

use crate::filter::FilteringManager;
use crate::host::McpError;
use crate::protocol::McpToolDef;
use crate::router::{ComponentKind, MessageRouter};

/// Holds tool definitions per session and resolves calls to providers.
pub struct ToolManager {
    router: Arc<MessageRouter>,
    defs: RwLock<HashMap<String, Vec<McpToolDef>>>,
}

impl ToolManager {
    pub fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            defs: RwLock::new(HashMap::new()),
        }
    }

    /// Register the tools a newly-ready session discovered, applying the
    /// session's deny list. Returns the number of tools kept.
    pub(crate) fn register_session(&self, spec: &SessionSpec, tools: Vec<McpToolDef>) -> usize {
        let mut defs = self.defs.write();
        let entry = defs.entry(spec.id.clone()).or_default();
        let mut kept = 0;
        for tool in tools {
            if !FilteringManager::allow_registration(spec, &tool.name) {
                tracing::debug!(
                    session_id = %spec.id,
                    tool = %tool.name,
                    "tool denied at registration"
                );
                continue;
            }
            self.router
                .register_component(ComponentKind::Tool, &tool.name, &spec.id);
            entry.push(tool);
            kept += 1;
        }
        kept
    }

    pub(crate) fn unregister_session(&self, session_id: &str) {
        self.defs.write().remove(session_id);
    }

    /// All registered tools as `(session_id, def)` pairs.
    pub fn list_tools(&self) -> Vec<(String, McpToolDef)> {
        self.defs
            .read()
            .iter()
            .flat_map(|(sid, tools)| tools.iter().map(move |t| (sid.clone(), t.clone())))
            .collect()
    }

    /// Build the tool descriptors an agent's LLM may see, ordered by tool
    /// name. For a tool with several providers the definition comes from
    /// the best-routed eligible session.
    pub fn format_tools_for_agent(&self, agent: &AgentConfig) -> Vec<ToolDefinition> {
        let mut out = Vec::new();
        for name in self.router.component_names(ComponentKind::Tool) {
            if !FilteringManager::allow_component_for_agent(agent, &name) {
                continue;
            }
            let providers = self.router.providers_of(ComponentKind::Tool, &name);
            let eligible = FilteringManager::filter_sessions_for_agent(agent, &providers);
            let Some(session_id) = eligible.first() else {
                continue;
            };
            let defs = self.defs.read();
            if let Some(def) = defs
                .get(session_id)
                .and_then(|tools| tools.iter().find(|t| t.name == name))
            {
                out.push(ToolDefinition {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    parameters: def.input_schema.clone(),
                });
            }
        }
        out
    }

    /// Pick the session a tool call dispatches to.
    ///
    /// Excluded or unknown tools are indistinguishable to the caller (both
    /// are `ToolNotFound`), so filtering can never leak a hidden tool's
    /// existence. With several eligible providers the highest-weighted wins
    /// unless the caller asked for strict dispatch.
    pub fn resolve(
        &self,
        tool_name: &str,
        agent: &AgentConfig,
        strict: bool,
    ) -> Result<String, McpError> {
        if !FilteringManager::allow_component_for_agent(agent, tool_name) {
            return Err(McpError::ToolNotFound(tool_name.to_owned()));
        }
        let providers = self.router.providers_of(ComponentKind::Tool, tool_name);
        if providers.is_empty() {
            return Err(McpError::ToolNotFound(tool_name.to_owned()));
        }
        let mut eligible = FilteringManager::filter_sessions_for_agent(agent, &providers);
        if eligible.is_empty() {
            return Err(McpError::ToolNotFound(tool_name.to_owned()));
        }
        if eligible.len() > 1 && strict {
            return Err(McpError::ToolAmbiguous {
                tool: tool_name.to_owned(),
                providers: eligible,
            });
        }
        Ok(eligible.remove(0))
    }
}
