//! Resource registration and dispatch resolution.
//!
//! Resources are identified by URI. Reads additionally pass through the
//! [`crate::roots::RootManager`] gate, applied by the host at dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use maestro_domain::config::{AgentConfig, SessionSpec};

use crate::filter::FilteringManager;
use crate::host::McpError;
use crate::protocol::ResourceDef;
use crate::router::{ComponentKind, MessageRouter};

/// Holds resource definitions per session and resolves reads to providers.
pub struct ResourceManager {
    router: Arc<MessageRouter>,
    defs: RwLock<HashMap<String, Vec<ResourceDef>>>,
}

impl ResourceManager {
    pub fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            defs: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register_session(&self, spec: &SessionSpec, resources: Vec<ResourceDef>) -> usize {
        let mut defs = self.defs.write();
        let entry = defs.entry(spec.id.clone()).or_default();
        let mut kept = 0;
        for resource in resources {
            if !FilteringManager::allow_registration(spec, &resource.uri) {
                tracing::debug!(
                    session_id = %spec.id,
                    uri = %resource.uri,
                    "resource denied at registration"
                );
                continue;
            }
            self.router
                .register_component(ComponentKind::Resource, &resource.uri, &spec.id);
            entry.push(resource);
            kept += 1;
        }
        kept
    }

    pub(crate) fn unregister_session(&self, session_id: &str) {
        self.defs.write().remove(session_id);
    }

    /// All registered resources visible to an agent, ordered by URI.
    pub fn list_resources(&self, agent: &AgentConfig) -> Vec<ResourceDef> {
        let mut out = Vec::new();
        for uri in self.router.component_names(ComponentKind::Resource) {
            if !FilteringManager::allow_component_for_agent(agent, &uri) {
                continue;
            }
            let providers = self.router.providers_of(ComponentKind::Resource, &uri);
            let eligible = FilteringManager::filter_sessions_for_agent(agent, &providers);
            let Some(session_id) = eligible.first() else {
                continue;
            };
            let defs = self.defs.read();
            if let Some(def) = defs
                .get(session_id)
                .and_then(|resources| resources.iter().find(|r| r.uri == uri))
            {
                out.push(def.clone());
            }
        }
        out
    }

    /// Pick the session a resource read dispatches to.
    pub fn resolve(&self, uri: &str, agent: &AgentConfig) -> Result<String, McpError> {
        if !FilteringManager::allow_component_for_agent(agent, uri) {
            return Err(McpError::ResourceNotFound(uri.to_owned()));
        }
        let providers = self.router.providers_of(ComponentKind::Resource, uri);
        let eligible = FilteringManager::filter_sessions_for_agent(agent, &providers);
        eligible
            .into_iter()
            .next()
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_owned()))
    }
}
