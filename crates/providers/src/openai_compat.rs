//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, and any other endpoint that follows
//! the OpenAI chat completions contract.

use serde_json::Value;

use maestro_domain::config::ProviderConfig;
use maestro_domain::error::{Error, Result};
use maestro_domain::stream::{BoxStream, CompletionEvent, Usage};
use maestro_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::registry::resolve_api_key;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

/// An adapter for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatProvider {
    tag: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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
            default_model: cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into()),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();
        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if !req.stop_sequences.is_empty() {
            body["stop"] = serde_json::json!(req.stop_sequences);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    fn provider_error(&self, status: reqwest::StatusCode, body: &str) -> Error {
        Error::Provider {
            provider: self.tag.clone(),
            message: format!("HTTP {} - {}", status.as_u16(), body),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_wire(msg),
        Role::Tool => tool_result_to_wire(msg),
        _ => serde_json::json!({
            "role": role_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({ "role": "assistant" });
    let text = msg.content.extract_all_text();
    let tool_calls: Vec<Value> = msg
        .tool_calls()
        .iter()
        .map(|tc| {
            serde_json::json!({
                "id": tc.call_id,
                "type": "function",
                "function": {
                    "name": tc.tool_name,
                    "arguments": tc.arguments.to_string(),
                }
            })
        })
        .collect();

    obj["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(tag: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: tag.to_owned(),
            message: "no choices in response".into(),
        })?;
    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: tag.to_owned(),
        message: "no message in choice".into(),
    })?;

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_calls: parse_wire_tool_calls(message),
        usage: body.get("usage").and_then(parse_wire_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
        metadata: body.get("id").map(|id| serde_json::json!({ "id": id })),
    })
}

fn parse_wire_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_wire_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_stream_payload(data: &str) -> Vec<Result<CompletionEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(CompletionEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
            metadata: None,
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_wire_usage) {
            return vec![Ok(CompletionEvent::Done {
                usage: Some(usage),
                finish_reason: None,
                metadata: None,
            })];
        }
        return Vec::new();
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        return vec![Ok(CompletionEvent::Done {
            usage: v.get("usage").and_then(parse_wire_usage),
            finish_reason: Some(fr.to_string()),
            metadata: None,
        })];
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut events = Vec::new();

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                events.push(Ok(CompletionEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }
            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                if !args.is_empty() {
                    events.push(Ok(CompletionEvent::ToolCallDelta {
                        call_id: idx.to_string(),
                        delta: args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(CompletionEvent::TextDelta {
                text: text.to_string(),
            }));
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
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
            return Err(self.provider_error(status, &text));
        }
        parse_chat_response(&self.tag, &serde_json::from_str(&text)?)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<CompletionEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
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
            return Err(self.provider_error(status, &text));
        }
        Ok(crate::sse::sse_event_stream(resp, parse_stream_payload))
    }

    fn provider_tag(&self) -> &str {
        &self.tag
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
