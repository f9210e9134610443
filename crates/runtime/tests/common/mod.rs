//! Shared test doubles: a scripted LLM provider and an in-memory MCP
//! transport, plus a facade builder wiring them together.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use maestro_domain::cancel::CancelToken;
use maestro_domain::config::{Config, SessionSpec};
use maestro_domain::error::{Error, Result};
use maestro_domain::stream::{BoxStream, CompletionEvent, Usage};
use maestro_domain::tool::{Message, Role, ToolCall};
use maestro_mcp::protocol::JsonRpcResponse;
use maestro_mcp::transport::{McpTransport, TransportError};
use maestro_mcp::McpHost;
use maestro_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
use maestro_runtime::{ExecutionFacade, WorkflowRegistry};
use maestro_storage::StorageProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted assistant turn.
#[derive(Clone)]
pub struct ScriptedTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ScriptedTurn {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call_id: &str, tool_name: &str, arguments: Value) -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![ToolCall {
                call_id: call_id.to_owned(),
                tool_name: tool_name.to_owned(),
                arguments,
            }],
        }
    }

    pub fn with_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
        }
    }
}

/// An LLM adapter that replays scripted turns.
pub struct ScriptedProvider {
    tag: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Played when the sequence is exhausted.
    repeat: Option<ScriptedTurn>,
    /// How many completions have been served.
    completions: AtomicUsize,
    /// The last user-role text of each request, in order.
    inputs: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(tag: &str, turns: Vec<ScriptedTurn>) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_owned(),
            turns: Mutex::new(turns.into()),
            repeat: None,
            completions: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    /// A provider that replays the same turn forever.
    pub fn repeating(tag: &str, turn: ScriptedTurn) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_owned(),
            turns: Mutex::new(VecDeque::new()),
            repeat: Some(turn),
            completions: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn seen_inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    fn next_turn(&self, req: &ChatRequest) -> Result<ScriptedTurn> {
        if let Some(last_user) = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.extract_all_text())
        {
            self.inputs.lock().push(last_user);
        }
        self.completions.fetch_add(1, Ordering::SeqCst);
        let turn = self.turns.lock().pop_front().or_else(|| self.repeat.clone());
        turn.ok_or_else(|| Error::Provider {
            provider: self.tag.clone(),
            message: "script exhausted".into(),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let turn = self.next_turn(req)?;
        Ok(ChatResponse {
            content: turn.text,
            tool_calls: turn.tool_calls,
            usage: Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
            metadata: None,
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<CompletionEvent>>> {
        let turn = self.next_turn(req)?;
        let mut events: Vec<Result<CompletionEvent>> = Vec::new();
        if !turn.text.is_empty() {
            events.push(Ok(CompletionEvent::TextDelta {
                text: turn.text.clone(),
            }));
        }
        for call in turn.tool_calls {
            events.push(Ok(CompletionEvent::ToolCallStarted {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            }));
            events.push(Ok(CompletionEvent::ToolCallFinished {
                call_id: call.call_id,
                tool_name: call.tool_name,
                arguments: call.arguments,
            }));
        }
        events.push(Ok(CompletionEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
            finish_reason: Some("stop".into()),
            metadata: None,
        }));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn provider_tag(&self) -> &str {
        &self.tag
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake MCP server + transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One fake tool with a canned response.
#[derive(Clone)]
pub struct FakeTool {
    pub name: String,
    pub response_text: String,
    pub is_error: bool,
    /// Per-tool latency, overriding the server-wide delay.
    pub delay: Option<Duration>,
}

impl FakeTool {
    pub fn ok(name: &str, response_text: &str) -> Self {
        Self {
            name: name.to_owned(),
            response_text: response_text.to_owned(),
            is_error: false,
            delay: None,
        }
    }

    pub fn failing(name: &str, response_text: &str) -> Self {
        Self {
            is_error: true,
            ..Self::ok(name, response_text)
        }
    }

    pub fn slow(name: &str, response_text: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::ok(name, response_text)
        }
    }
}

/// Shared state of a fake MCP server, observable from tests.
#[derive(Default)]
pub struct FakeServer {
    pub tools: Vec<FakeTool>,
    pub call_delay: Option<Duration>,
    pub dead: AtomicBool,
    pub closes: AtomicUsize,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl FakeServer {
    pub fn new(tools: Vec<FakeTool>) -> Arc<Self> {
        Arc::new(Self {
            tools,
            ..Default::default()
        })
    }

    pub fn with_delay(tools: Vec<FakeTool>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tools,
            call_delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

pub struct FakeTransport {
    server: Arc<FakeServer>,
    open: AtomicBool,
    shutdown: CancelToken,
}

impl FakeTransport {
    pub fn new(server: Arc<FakeServer>) -> Box<Self> {
        Box::new(Self {
            server,
            open: AtomicBool::new(true),
            shutdown: CancelToken::new(),
        })
    }
}

fn ok_response(result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id: 0,
        result: Some(result),
        error: None,
    }
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelToken,
    ) -> std::result::Result<JsonRpcResponse, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        match method {
            "initialize" => Ok(ok_response(json!({ "capabilities": {} }))),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .server
                    .tools
                    .iter()
                    .map(|t| json!({ "name": t.name, "description": "fake tool" }))
                    .collect();
                Ok(ok_response(json!({ "tools": tools })))
            }
            "prompts/list" => Ok(ok_response(json!({ "prompts": [] }))),
            "resources/list" => Ok(ok_response(json!({ "resources": [] }))),
            "tools/call" => {
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_owned();
                let tool_delay = self
                    .server
                    .tools
                    .iter()
                    .find(|t| t.name == name)
                    .and_then(|t| t.delay);
                if let Some(delay) = tool_delay.or(self.server.call_delay) {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = self.shutdown.cancelled() => return Err(TransportError::Closed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if !self.is_open() {
                    return Err(TransportError::Closed);
                }
                let args = params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .cloned()
                    .unwrap_or(Value::Null);
                self.server.calls.lock().push((name.clone(), args));

                let Some(tool) = self.server.tools.iter().find(|t| t.name == name) else {
                    return Ok(JsonRpcResponse {
                        jsonrpc: "2.0".into(),
                        id: 0,
                        result: None,
                        error: Some(maestro_mcp::protocol::JsonRpcError {
                            code: -32602,
                            message: format!("unknown tool {name}"),
                            data: None,
                        }),
                    });
                };
                Ok(ok_response(json!({
                    "content": [{ "type": "text", "text": tool.response_text }],
                    "isError": tool.is_error,
                })))
            }
            other => Err(TransportError::Protocol(format!("unexpected method {other}"))),
        }
    }

    async fn notify(&self, _method: &str) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.server.dead.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.server.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Facade builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn session_spec(id: &str, weight: f64) -> SessionSpec {
    serde_json::from_value(json!({
        "id": id,
        "routing_weight": weight,
        "capabilities": ["tools"],
    }))
    .unwrap()
}

/// Build a facade over fake sessions and scripted providers.
pub async fn build_facade(
    config: Config,
    sessions: Vec<(SessionSpec, Arc<FakeServer>)>,
    providers: Vec<Arc<dyn LlmProvider>>,
    storage: Option<Arc<dyn StorageProvider>>,
) -> ExecutionFacade {
    let host = Arc::new(McpHost::new(config.host.clone()));
    for (spec, server) in sessions {
        host.register_session_with_transport(spec, FakeTransport::new(server))
            .await
            .unwrap();
    }
    let registry = Arc::new(ProviderRegistry::from_providers(providers));
    let custom = Arc::new(WorkflowRegistry::new(config.host.project_root.clone()));
    ExecutionFacade::new(&config, host, registry, storage, custom)
}

/// Parse a full config from JSON.
pub fn config_from(value: Value) -> Config {
    serde_json::from_value(value).unwrap()
}

/// Count messages with the given role.
pub fn count_role(history: &[Message], role: Role) -> usize {
    history.iter().filter(|m| m.role == role).count()
}
