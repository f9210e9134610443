//! MCP host — owns the session fleet and supervises lifecycles.
//!
//! The host brings sessions up in parallel (one failure degrades the fleet,
//! never aborts it), routes tool/prompt/resource operations to the right
//! session through the managers, and tears everything down under a bounded
//! grace window on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;

use maestro_domain::cancel::CancelToken;
use maestro_domain::config::{AgentConfig, CapabilityKind, HostConfig, SessionSpec};
use maestro_domain::error::Error;
use maestro_domain::tool::{ToolCall, ToolDefinition, ToolResult};

use crate::prompts::PromptManager;
use crate::protocol::{
    initialize_params, GetPromptResult, McpToolDef, PromptDef, PromptsListResult,
    ReadResourceResult, ResourceDef, ResourcesListResult, ToolCallResult, ToolsListResult,
};
use crate::resources::ResourceManager;
use crate::roots::RootManager;
use crate::router::MessageRouter;
use crate::session::{spawn_session, SessionHandle, SessionState};
use crate::tools::ToolManager;
use crate::transport::{open_transport, McpTransport, TransportError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors specific to MCP host operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session id already registered: {0}")]
    DuplicateSession(String),

    /// An in-flight operation aborted by session teardown or transport
    /// failure.
    #[error("session {session_id}: {message}")]
    SessionTransport {
        session_id: String,
        message: String,
    },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool '{tool}' is ambiguous, provided by sessions {providers:?}")]
    ToolAmbiguous {
        tool: String,
        providers: Vec<String>,
    },

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("dynamic session registration is disabled")]
    RegistrationDisabled,
}

impl From<McpError> for Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Transport(t) => t.into(),
            McpError::Protocol(m) => Error::Protocol(m),
            McpError::SessionNotFound(s) => Error::NotFound(format!("session '{s}'")),
            McpError::DuplicateSession(s) => {
                Error::Validation(format!("session id already registered: {s}"))
            }
            McpError::SessionTransport {
                session_id,
                message,
            } => Error::SessionTransport {
                session_id,
                message,
            },
            McpError::ToolNotFound(t) => Error::ToolNotFound(t),
            McpError::ToolAmbiguous { tool, providers } => {
                Error::ToolAmbiguous { tool, providers }
            }
            McpError::PromptNotFound(p) => Error::NotFound(format!("prompt '{p}'")),
            McpError::ResourceNotFound(r) => Error::NotFound(format!("resource '{r}'")),
            McpError::AccessDenied(m) => Error::AccessDenied(m),
            McpError::ToolExecution(m) => Error::ToolExecution(m),
            McpError::RegistrationDisabled => {
                Error::PolicyViolation("dynamic session registration is disabled".into())
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionSlot {
    state: SessionState,
    handle: Option<SessionHandle>,
    weight: f64,
    registered_at: DateTime<Utc>,
}

type SessionTable = Arc<RwLock<HashMap<String, SessionSlot>>>;

/// Per-session outcomes of [`McpHost::start`].
#[derive(Debug, Default)]
pub struct StartReport {
    pub ready: Vec<String>,
    pub failed: Vec<(String, McpError)>,
}

/// Sessions that did not terminate within the shutdown grace window.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub lingering: Vec<String>,
}

/// What a session's discovery phase produced.
#[derive(Default)]
struct Discovered {
    tools: Vec<McpToolDef>,
    prompts: Vec<PromptDef>,
    resources: Vec<ResourceDef>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpHost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The MCP host: session fleet, routing table, and component managers.
pub struct McpHost {
    cfg: HostConfig,
    sessions: SessionTable,
    router: Arc<MessageRouter>,
    tools: ToolManager,
    prompts: PromptManager,
    resources: ResourceManager,
    roots: RootManager,
}

impl McpHost {
    pub fn new(cfg: HostConfig) -> Self {
        let router = Arc::new(MessageRouter::new());
        Self {
            cfg,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tools: ToolManager::new(router.clone()),
            prompts: PromptManager::new(router.clone()),
            resources: ResourceManager::new(router.clone()),
            roots: RootManager::new(),
            router,
        }
    }

    // ── Startup / registration ─────────────────────────────────────

    /// Bring up all sessions in parallel. Returns once every session is
    /// ready or failed; a failing session degrades the fleet but never
    /// aborts its siblings.
    pub async fn start(&self, specs: Vec<SessionSpec>) -> StartReport {
        let outcomes = join_all(specs.into_iter().map(|spec| {
            let id = spec.id.clone();
            async move { (id, self.register_session_inner(spec).await) }
        }))
        .await;

        let mut report = StartReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.ready.push(id),
                Err(e) => {
                    tracing::warn!(
                        session_id = %id,
                        error = %e,
                        "failed to initialize MCP session, continuing with degraded fleet"
                    );
                    report.failed.push((id, e));
                }
            }
        }
        tracing::info!(
            ready = report.ready.len(),
            failed = report.failed.len(),
            "MCP host started"
        );
        report
    }

    /// Dynamically add a session after start.
    pub async fn register_session(&self, spec: SessionSpec) -> Result<(), McpError> {
        if !self.cfg.allow_dynamic_registration {
            return Err(McpError::RegistrationDisabled);
        }
        self.register_session_inner(spec).await
    }

    /// Register a session over a caller-supplied transport. This is the
    /// seam embedders (and tests) use to plug in custom transports.
    pub async fn register_session_with_transport(
        &self,
        spec: SessionSpec,
        transport: Box<dyn McpTransport>,
    ) -> Result<(), McpError> {
        self.reserve_slot(&spec)?;
        self.attach_session(spec, transport).await
    }

    async fn register_session_inner(&self, spec: SessionSpec) -> Result<(), McpError> {
        self.reserve_slot(&spec)?;
        let transport = match open_transport(&spec) {
            Ok(t) => t,
            Err(e) => {
                self.sessions.write().remove(&spec.id);
                return Err(e.into());
            }
        };
        self.attach_session(spec, transport).await
    }

    /// Claim the session id, in state `Proposed`.
    fn reserve_slot(&self, spec: &SessionSpec) -> Result<(), McpError> {
        let mut sessions = self.sessions.write();
        if let Some(slot) = sessions.get(&spec.id) {
            if slot.state != SessionState::Terminated {
                return Err(McpError::DuplicateSession(spec.id.clone()));
            }
        }
        sessions.insert(
            spec.id.clone(),
            SessionSlot {
                state: SessionState::Proposed,
                handle: None,
                weight: spec.routing_weight,
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Drive a reserved session through handshake and discovery to Ready.
    async fn attach_session(
        &self,
        spec: SessionSpec,
        transport: Box<dyn McpTransport>,
    ) -> Result<(), McpError> {
        let handle = spawn_session(spec.id.clone(), transport);
        {
            let mut sessions = self.sessions.write();
            if let Some(slot) = sessions.get_mut(&spec.id) {
                slot.state = SessionState::Initializing;
                slot.handle = Some(handle.clone());
            }
        }

        match self.initialize_session(&spec, &handle).await {
            Ok(discovered) => {
                // Routing and component state flip together with the
                // session state, under the table's write lock. A slot that
                // is no longer Initializing was torn down underneath us
                // (host shutdown mid-registration).
                let registered = {
                    let mut sessions = self.sessions.write();
                    match sessions.get_mut(&spec.id) {
                        Some(slot) if slot.state == SessionState::Initializing => {
                            slot.state = SessionState::Ready;
                            self.router.register_session(&spec.id, spec.routing_weight);
                            self.roots.set_roots(&spec.id, spec.roots.clone());
                            let tools = self.tools.register_session(&spec, discovered.tools);
                            let prompts =
                                self.prompts.register_session(&spec, discovered.prompts);
                            let resources =
                                self.resources.register_session(&spec, discovered.resources);
                            tracing::info!(
                                session_id = %spec.id,
                                tools,
                                prompts,
                                resources,
                                "MCP session ready"
                            );
                            true
                        }
                        _ => false,
                    }
                };
                if registered {
                    Ok(())
                } else {
                    handle.shutdown().await;
                    Err(McpError::SessionTransport {
                        session_id: spec.id.clone(),
                        message: "session torn down during initialization".into(),
                    })
                }
            }
            Err(e) => {
                // Initializing goes straight to Terminated, never Ready.
                handle.shutdown().await;
                self.sessions.write().remove(&spec.id);
                Err(e)
            }
        }
    }

    /// Handshake plus capability discovery.
    async fn initialize_session(
        &self,
        spec: &SessionSpec,
        handle: &SessionHandle,
    ) -> Result<Discovered, McpError> {
        let cancel = CancelToken::new();
        let params = serde_json::to_value(initialize_params())
            .map_err(|e| McpError::Protocol(format!("serializing initialize params: {e}")))?;

        let resp = handle.request("initialize", Some(params), &cancel).await?;
        if let Err(err) = resp.into_result() {
            return Err(McpError::Protocol(format!("initialize failed: {err}")));
        }
        handle.notify("notifications/initialized").await?;
        tracing::debug!(session_id = %spec.id, "MCP handshake complete");

        let mut discovered = Discovered::default();
        for capability in spec.effective_capabilities() {
            match capability {
                CapabilityKind::Tools => {
                    let value = self.discover(spec, handle, "tools/list", &cancel).await?;
                    discovered.tools = value
                        .map(|v| match serde_json::from_value::<ToolsListResult>(v) {
                            Ok(r) => r.tools,
                            Err(e) => {
                                tracing::warn!(session_id = %spec.id, error = %e, "failed to parse tools/list result");
                                Vec::new()
                            }
                        })
                        .unwrap_or_default();
                }
                CapabilityKind::Prompts => {
                    let value = self.discover(spec, handle, "prompts/list", &cancel).await?;
                    discovered.prompts = value
                        .map(|v| match serde_json::from_value::<PromptsListResult>(v) {
                            Ok(r) => r.prompts,
                            Err(e) => {
                                tracing::warn!(session_id = %spec.id, error = %e, "failed to parse prompts/list result");
                                Vec::new()
                            }
                        })
                        .unwrap_or_default();
                }
                CapabilityKind::Resources => {
                    let value = self.discover(spec, handle, "resources/list", &cancel).await?;
                    discovered.resources = value
                        .map(|v| match serde_json::from_value::<ResourcesListResult>(v) {
                            Ok(r) => r.resources,
                            Err(e) => {
                                tracing::warn!(session_id = %spec.id, error = %e, "failed to parse resources/list result");
                                Vec::new()
                            }
                        })
                        .unwrap_or_default();
                }
            }
        }
        Ok(discovered)
    }

    /// One discovery call. A transport failure is fatal to initialization;
    /// a JSON-RPC error (capability not actually supported) yields `None`.
    async fn discover(
        &self,
        spec: &SessionSpec,
        handle: &SessionHandle,
        method: &str,
        cancel: &CancelToken,
    ) -> Result<Option<serde_json::Value>, McpError> {
        let resp = handle.request(method, None, cancel).await?;
        match resp.into_result() {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(
                    session_id = %spec.id,
                    method,
                    error = %err,
                    "capability list returned error, treating as empty"
                );
                Ok(None)
            }
        }
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Tear down one session. Idempotent; purges all component state
    /// synchronously with the state flip, then asks the owning task to
    /// close its transport.
    pub async fn deregister_session(&self, session_id: &str) {
        let handle = {
            let mut sessions = self.sessions.write();
            let Some(slot) = sessions.get_mut(session_id) else {
                return;
            };
            if matches!(
                slot.state,
                SessionState::ShuttingDown | SessionState::Terminated
            ) {
                return;
            }
            slot.state = SessionState::ShuttingDown;
            self.purge_components(session_id);
            slot.handle.clone()
        };
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.sessions.write().remove(session_id);
        tracing::info!(session_id, "MCP session deregistered");
    }

    /// A transport failure was observed on a ready session: flip it to
    /// ShuttingDown, purge its components, and close it in the background.
    fn mark_failed(&self, session_id: &str) {
        let handle = {
            let mut sessions = self.sessions.write();
            let Some(slot) = sessions.get_mut(session_id) else {
                return;
            };
            if slot.state != SessionState::Ready {
                return;
            }
            tracing::warn!(session_id, "transport failure on ready session, shutting down");
            slot.state = SessionState::ShuttingDown;
            self.purge_components(session_id);
            slot.handle.clone()
        };
        let sessions = self.sessions.clone();
        let id = session_id.to_owned();
        tokio::spawn(async move {
            if let Some(handle) = handle {
                handle.shutdown().await;
            }
            sessions.write().remove(&id);
        });
    }

    fn purge_components(&self, session_id: &str) {
        self.router.unregister_session(session_id);
        self.tools.unregister_session(session_id);
        self.prompts.unregister_session(session_id);
        self.resources.unregister_session(session_id);
        self.roots.clear_session(session_id);
    }

    /// Cancel every session's supervision, waiting a bounded grace per
    /// session. Stragglers are reported, never raised.
    pub async fn shutdown(&self) -> ShutdownReport {
        let grace = Duration::from_millis(self.cfg.shutdown_grace_ms);
        let targets: Vec<(String, Option<SessionHandle>)> = {
            let mut sessions = self.sessions.write();
            sessions
                .iter_mut()
                .map(|(id, slot)| {
                    slot.state = SessionState::ShuttingDown;
                    (id.clone(), slot.handle.clone())
                })
                .collect()
        };
        for (id, _) in &targets {
            self.purge_components(id);
        }

        let outcomes = join_all(targets.into_iter().map(|(id, handle)| async move {
            let clean = match handle {
                Some(h) => tokio::time::timeout(grace, h.shutdown()).await.is_ok(),
                None => true,
            };
            (id, clean)
        }))
        .await;

        let mut lingering = Vec::new();
        {
            let mut sessions = self.sessions.write();
            for (id, clean) in outcomes {
                sessions.remove(&id);
                if !clean {
                    tracing::warn!(session_id = %id, "session did not terminate within grace window");
                    lingering.push(id);
                }
            }
        }
        tracing::info!(lingering = lingering.len(), "MCP host shut down");
        ShutdownReport { lingering }
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Execute one tool call on behalf of an agent.
    pub async fn call_tool(
        &self,
        call: &ToolCall,
        agent: &AgentConfig,
        strict: bool,
        cancel: &CancelToken,
    ) -> Result<ToolResult, McpError> {
        let session_id = self.tools.resolve(&call.tool_name, agent, strict)?;
        let handle = self.ready_handle(&session_id)?;
        let params = serde_json::json!({
            "name": call.tool_name,
            "arguments": call.arguments,
        });
        let resp = match handle.request("tools/call", Some(params), cancel).await {
            Ok(resp) => resp,
            Err(e) => return Err(self.dispatch_failure(&session_id, e)),
        };
        let value = resp
            .into_result()
            .map_err(|err| McpError::ToolExecution(format!("tools/call failed: {err}")))?;
        let result: ToolCallResult = serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))?;
        Ok(ToolResult {
            call_id: call.call_id.clone(),
            content: result.content,
            is_error: result.is_error,
        })
    }

    /// Fetch a rendered prompt on behalf of an agent.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        agent: &AgentConfig,
        cancel: &CancelToken,
    ) -> Result<GetPromptResult, McpError> {
        let session_id = self.prompts.resolve(name, agent)?;
        let handle = self.ready_handle(&session_id)?;
        let mut params = serde_json::json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        let resp = match handle.request("prompts/get", Some(params), cancel).await {
            Ok(resp) => resp,
            Err(e) => return Err(self.dispatch_failure(&session_id, e)),
        };
        let value = resp
            .into_result()
            .map_err(|err| McpError::Protocol(format!("prompts/get failed: {err}")))?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("failed to parse prompts/get result: {e}")))
    }

    /// Read a resource on behalf of an agent, gated by root validation.
    pub async fn read_resource(
        &self,
        uri: &str,
        agent: &AgentConfig,
        cancel: &CancelToken,
    ) -> Result<ReadResourceResult, McpError> {
        let session_id = self.resources.resolve(uri, agent)?;
        if !self.roots.validate(&session_id, uri) {
            return Err(McpError::AccessDenied(format!(
                "uri '{uri}' is outside the permitted roots of session '{session_id}'"
            )));
        }
        let handle = self.ready_handle(&session_id)?;
        let params = serde_json::json!({ "uri": uri });
        let resp = match handle.request("resources/read", Some(params), cancel).await {
            Ok(resp) => resp,
            Err(e) => return Err(self.dispatch_failure(&session_id, e)),
        };
        let value = resp
            .into_result()
            .map_err(|err| McpError::Protocol(format!("resources/read failed: {err}")))?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("failed to parse resources/read result: {e}")))
    }

    /// The schema-bearing tool descriptors an agent's LLM may see.
    pub fn format_tools_for_agent(&self, agent: &AgentConfig) -> Vec<ToolDefinition> {
        self.tools.format_tools_for_agent(agent)
    }

    pub fn list_tools(&self) -> Vec<(String, McpToolDef)> {
        self.tools.list_tools()
    }

    pub fn list_prompts(&self, agent: &AgentConfig) -> Vec<PromptDef> {
        self.prompts.list_prompts(agent)
    }

    pub fn list_resources(&self, agent: &AgentConfig) -> Vec<ResourceDef> {
        self.resources.list_resources(agent)
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().get(session_id).map(|s| s.state)
    }

    pub fn session_weight(&self, session_id: &str) -> Option<f64> {
        self.sessions.read().get(session_id).map(|s| s.weight)
    }

    pub fn session_registered_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions.read().get(session_id).map(|s| s.registered_at)
    }

    /// Session ids currently in `Ready`, sorted.
    pub fn ready_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, slot)| slot.state == SessionState::Ready)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    // ── Internals ──────────────────────────────────────────────────

    fn ready_handle(&self, session_id: &str) -> Result<SessionHandle, McpError> {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(slot) if slot.state == SessionState::Ready => slot
                .handle
                .clone()
                .ok_or_else(|| McpError::SessionNotFound(session_id.to_owned())),
            Some(slot) => Err(McpError::SessionTransport {
                session_id: session_id.to_owned(),
                message: format!("session is {}", slot.state),
            }),
            None => Err(McpError::SessionNotFound(session_id.to_owned())),
        }
    }

    /// Classify a transport error from a dispatch. Cancellation and
    /// timeouts pass through; anything else means the transport is
    /// unusable and the session comes down.
    fn dispatch_failure(&self, session_id: &str, e: TransportError) -> McpError {
        match e {
            TransportError::Cancelled | TransportError::Timeout(_) => McpError::Transport(e),
            other => {
                self.mark_failed(session_id);
                McpError::SessionTransport {
                    session_id: session_id.to_owned(),
                    message: other.to_string(),
                }
            }
        }
    }
}
