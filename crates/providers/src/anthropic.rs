//! Anthropic Messages adapter.
//!
//! System messages travel in the top-level `system` field, tool results as
//! user messages with `tool_result` content blocks, and streamed tool
//! calls are assembled from `content_block_*` events.

use serde_json::Value;

use maestro_domain::config::ProviderConfig;
use maestro_domain::error::{Error, Result};
use maestro_domain::stream::{BoxStream, CompletionEvent, Usage};
use maestro_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::registry::resolve_api_key;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// An adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    tag: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(cfg)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Provider {
                provider: cfg.tag.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            tag: cfg.tag.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".into()),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut wire_messages: Vec<Value> = Vec::new();
        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User => wire_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.extract_all_text(),
                })),
                Role::Assistant => wire_messages.push(assistant_to_wire(msg)),
                // Tool results are user messages with tool_result blocks.
                Role::Tool => wire_messages.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": wire_messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if !req.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(req.stop_sequences);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn assistant_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({ "type": "text", "text": t })],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => {
                    Some(serde_json::json!({ "type": "text", "text": text }))
                }
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                _ => None,
            })
            .collect(),
    };
    serde_json::json!({ "role": "assistant", "content": content })
}

fn tool_result_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({ "role": "user", "content": content })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

fn parse_messages_response(body: &Value) -> Result<ChatResponse> {
    let empty = Vec::new();
    let blocks = body
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                call_id: block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                tool_name: block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                arguments: block
                    .get("input")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
            }),
            _ => {}
        }
    }

    Ok(ChatResponse {
        content: text,
        tool_calls,
        usage: body.get("usage").and_then(parse_messages_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(map_stop_reason),
        metadata: body.get("id").map(|id| serde_json::json!({ "id": id })),
    })
}

fn parse_messages_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-call assembly state across stream payloads
/// (block index -> (call_id, name, argument buffer)).
#[derive(Default)]
struct StreamState {
    active: std::collections::HashMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    done_emitted: bool,
}

fn parse_stream_payload(data: &str, state: &mut StreamState) -> Vec<Result<CompletionEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };
    let mut events = Vec::new();

    match v.get("type").and_then(|v| v.as_str()).unwrap_or("") {
        "message_start" => {
            state.usage = v
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(parse_messages_usage);
        }
        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let call_id = block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    events.push(Ok(CompletionEvent::ToolCallStarted {
                        call_id: call_id.clone(),
                        tool_name: name.clone(),
                    }));
                    state.active.insert(idx, (call_id, name, String::new()));
                }
            }
        }
        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(CompletionEvent::TextDelta {
                                    text: text.to_string(),
                                }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(tc) = state.active.get_mut(&idx) {
                                tc.2.push_str(partial);
                                events.push(Ok(CompletionEvent::ToolCallDelta {
                                    call_id: tc.0.clone(),
                                    delta: partial.to_string(),
                                }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some((call_id, tool_name, args)) = state.active.remove(&idx) {
                let arguments =
                    serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()));
                events.push(Ok(CompletionEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }));
            }
        }
        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
            {
                if let Some(usage) = &mut state.usage {
                    usage.completion_tokens = output as u32;
                    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
                }
            }
            if let Some(reason) = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
            {
                state.done_emitted = true;
                events.push(Ok(CompletionEvent::Done {
                    usage: state.usage.clone(),
                    finish_reason: Some(map_stop_reason(reason)),
                    metadata: None,
                }));
            }
        }
        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(CompletionEvent::Done {
                    usage: state.usage.clone(),
                    finish_reason: Some("stop".into()),
                    metadata: None,
                }));
            }
        }
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            events.push(Ok(CompletionEvent::Error {
                message: message.to_string(),
            }));
        }
        // ping and future event kinds.
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!(provider = %self.tag, url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&self.build_body(req, false))
            .send()
            .await
            .map_err(|e| Error::Provider {
                provider: self.tag.clone(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Provider {
            provider: self.tag.clone(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.tag.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        parse_messages_response(&serde_json::from_str(&text)?)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<CompletionEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!(provider = %self.tag, url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&self.build_body(req, true))
            .send()
            .await
            .map_err(|e| Error::Provider {
                provider: self.tag.clone(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.tag.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let mut state = StreamState::default();
        Ok(crate::sse::sse_event_stream(resp, move |data| {
            parse_stream_payload(data, &mut state)
        }))
    }

    fn provider_tag(&self) -> &str {
        &self.tag
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_tool_use_block() {
        let body = serde_json::json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "content": [
                { "type": "text", "text": "Let me check." },
                { "type": "tool_use", "id": "toolu_1", "name": "weather_lookup",
                  "input": { "city": "London" } }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 20 }
        });
        let resp = parse_messages_response(&body).unwrap();
        assert_eq!(resp.content, "Let me check.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "weather_lookup");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.unwrap().total_tokens, 30);
    }

    #[test]
    fn streamed_tool_call_assembles_across_payloads() {
        let mut state = StreamState::default();
        let started = parse_stream_payload(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"echo"}}"#,
            &mut state,
        );
        assert!(matches!(started[0], Ok(CompletionEvent::ToolCallStarted { .. })));

        parse_stream_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"x\":"}}"#,
            &mut state,
        );
        parse_stream_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"1}"}}"#,
            &mut state,
        );
        let finished = parse_stream_payload(
            r#"{"type":"content_block_stop","index":0}"#,
            &mut state,
        );
        match &finished[0] {
            Ok(CompletionEvent::ToolCallFinished { arguments, .. }) => {
                assert_eq!(arguments["x"], 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn message_delta_reports_usage_and_done() {
        let mut state = StreamState::default();
        parse_stream_payload(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":7,"output_tokens":0}}}"#,
            &mut state,
        );
        let events = parse_stream_payload(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
            &mut state,
        );
        match &events[0] {
            Ok(CompletionEvent::Done {
                usage: Some(u),
                finish_reason,
                ..
            }) => {
                assert_eq!(u.total_tokens, 10);
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // message_stop after a Done is suppressed.
        let extra = parse_stream_payload(r#"{"type":"message_stop"}"#, &mut state);
        assert!(extra.is_empty());
    }

    #[test]
    fn system_messages_lift_into_system_field() {
        let cfg: ProviderConfig = serde_json::from_value(serde_json::json!({
            "tag": "claude",
            "kind": "anthropic",
            "base_url": "https://api.anthropic.com",
            "api_key": "test-key",
        }))
        .unwrap();
        let provider = AnthropicProvider::from_config(&cfg).unwrap();
        let req = ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            ..Default::default()
        };
        let body = provider.build_body(&req, false);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_result_becomes_user_message() {
        let wire = tool_result_to_wire(&Message::tool_result("toolu_1", "rate limited", true));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["is_error"], true);
    }
}
