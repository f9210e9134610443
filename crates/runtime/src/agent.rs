//! The agent execution loop.
//!
//! One run: load history, then up to `max_iterations` rounds of
//! stream the LLM, dispatch tool calls, feed results back. Tool calls
//! within a round execute concurrently, but their result messages are
//! appended in the assistant's original call order, which keeps
//! transcripts deterministic and replayable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use maestro_domain::cancel::CancelToken;
use maestro_domain::config::{AgentConfig, LlmConfig};
use maestro_domain::error::Error;
use maestro_domain::stream::{CompletionEvent, StreamEvent, Usage};
use maestro_domain::tool::{Message, ToolCall};
use maestro_mcp::McpHost;
use maestro_providers::{ChatRequest, ProviderRegistry};
use maestro_storage::{HistoryLocks, StorageProvider};

/// Everything an agent run needs, bundled for cheap cloning into spawned
/// streaming runs.
#[derive(Clone)]
pub struct AgentDeps {
    pub host: Arc<McpHost>,
    pub providers: Arc<ProviderRegistry>,
    pub llm_configs: Arc<HashMap<String, LlmConfig>>,
    pub storage: Option<Arc<dyn StorageProvider>>,
    pub history_locks: Arc<HistoryLocks>,
}

/// Terminal status of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Error,
    MaxIterationsReached,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Success => "success",
            AgentStatus::Error => "error",
            AgentStatus::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

/// The outcome of one agent run. History is preserved on every terminal
/// path, including errors.
#[derive(Debug)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub final_text: Option<String>,
    pub history: Vec<Message>,
    pub usage: Usage,
    pub error: Option<Error>,
}

/// Run an agent to completion and return the aggregate result.
pub async fn run_agent(
    deps: &AgentDeps,
    cfg: &AgentConfig,
    user_message: &str,
    session_key: Option<&str>,
    cancel: &CancelToken,
) -> AgentResult {
    run_with_events(
        deps.clone(),
        cfg.clone(),
        user_message.to_owned(),
        session_key.map(|s| s.to_owned()),
        cancel.clone(),
        None,
    )
    .await
}

/// Run an agent, yielding [`StreamEvent`]s as it goes. The final event is
/// `final` or `error`; the channel closes when the run ends.
pub fn stream_agent(
    deps: &AgentDeps,
    cfg: &AgentConfig,
    user_message: &str,
    session_key: Option<&str>,
    cancel: &CancelToken,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    let deps = deps.clone();
    let cfg = cfg.clone();
    let user_message = user_message.to_owned();
    let session_key = session_key.map(|s| s.to_owned());
    let cancel = cancel.clone();
    tokio::spawn(async move {
        run_with_events(deps, cfg, user_message, session_key, cancel, Some(tx)).await;
    });
    rx
}

pub(crate) async fn run_with_events(
    deps: AgentDeps,
    cfg: AgentConfig,
    user_message: String,
    session_key: Option<String>,
    cancel: CancelToken,
    events: Option<mpsc::Sender<StreamEvent>>,
) -> AgentResult {
    // The loop observes one token; the caller's cancellation and the
    // agent deadline both feed it.
    let effective = cancel.child();
    let deadline_hit = Arc::new(AtomicBool::new(false));
    let watcher = (cfg.max_duration_ms > 0).then(|| {
        let token = effective.clone();
        let hit = deadline_hit.clone();
        let ms = cfg.max_duration_ms;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            hit.store(true, Ordering::SeqCst);
            token.cancel();
        })
    });

    let mut result = run_loop(&deps, &cfg, user_message, session_key, &effective, &events).await;

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    if deadline_hit.load(Ordering::SeqCst) && matches!(result.error, Some(Error::Cancelled)) {
        result.error = Some(Error::Timeout(format!(
            "agent '{}' exceeded {}ms",
            cfg.name, cfg.max_duration_ms
        )));
    }

    match &result.error {
        Some(err) => {
            emit(
                &events,
                StreamEvent::Error {
                    message: err.to_string(),
                    kind: err.kind().to_owned(),
                },
            )
            .await;
        }
        None => {
            emit(
                &events,
                StreamEvent::Final {
                    text: result.final_text.clone().unwrap_or_default(),
                    status: result.status.as_str().to_owned(),
                },
            )
            .await;
        }
    }
    result
}

async fn emit(events: &Option<mpsc::Sender<StreamEvent>>, event: StreamEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_loop(
    deps: &AgentDeps,
    cfg: &AgentConfig,
    user_message: String,
    session_key: Option<String>,
    cancel: &CancelToken,
    events: &Option<mpsc::Sender<StreamEvent>>,
) -> AgentResult {
    let mut history: Vec<Message> = Vec::new();

    let fail = |error: Error, history: Vec<Message>| AgentResult {
        status: AgentStatus::Error,
        final_text: None,
        history,
        usage: Usage::default(),
        error: Some(error),
    };

    // 1. Resolve LLM config and adapter.
    let Some(llm_cfg) = deps.llm_configs.get(&cfg.llm_config_id) else {
        return fail(
            Error::NotFound(format!("llm config '{}'", cfg.llm_config_id)),
            history,
        );
    };
    let Some(provider) = deps.providers.get(&llm_cfg.provider_tag) else {
        return fail(
            Error::NotFound(format!("llm provider '{}'", llm_cfg.provider_tag)),
            history,
        );
    };

    // 2. History: lock the key for the whole run, then load.
    let persistence = match (&deps.storage, &session_key) {
        (Some(store), Some(key)) if cfg.include_history => Some((store.clone(), key.clone())),
        _ => None,
    };
    let _history_permit = match &persistence {
        Some((_, key)) => {
            let lock_key = format!("{}:{key}", cfg.name);
            match deps.history_locks.acquire(&lock_key).await {
                Ok(permit) => Some(permit),
                Err(e) => return fail(e, history),
            }
        }
        None => None,
    };
    if let Some((store, key)) = &persistence {
        match store.load_history(&cfg.name, key).await {
            Ok(Some(previous)) => history = previous,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(agent = %cfg.name, error = %e, "failed to load history, starting fresh");
            }
        }
    }
    if history.is_empty() {
        if let Some(system) = cfg
            .system_prompt
            .clone()
            .or_else(|| llm_cfg.default_system_prompt.clone())
        {
            history.push(Message::system(system));
        }
    }

    // 3. Append the user message.
    history.push(Message::user(user_message));

    // 4. The bounded loop.
    let cap = cfg.iteration_cap();
    let mut total_usage = Usage::default();
    let mut final_text: Option<String> = None;
    let mut status = AgentStatus::MaxIterationsReached;
    let mut error: Option<Error> = None;

    'iterations: for iteration in 1..=cap {
        emit(events, StreamEvent::IterationStart { iteration }).await;
        tracing::debug!(agent = %cfg.name, iteration, "agent loop iteration");

        if cancel.is_cancelled() {
            status = AgentStatus::Error;
            error = Some(Error::Cancelled);
            break;
        }

        // a. Format the allowed tool set.
        let tools = deps.host.format_tools_for_agent(cfg);

        // b. Call the LLM (streaming).
        let req = ChatRequest {
            messages: history.clone(),
            tools,
            temperature: llm_cfg.temperature,
            max_tokens: llm_cfg.max_tokens,
            stop_sequences: llm_cfg.stop_sequences.clone(),
            model: Some(llm_cfg.model.clone()),
        };
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => {
                status = AgentStatus::Error;
                error = Some(Error::Cancelled);
                break 'iterations;
            }
            opened = provider.chat_stream(&req) => match opened {
                Ok(stream) => stream,
                // Provider failures are fatal to the run; no retry here.
                Err(e) => {
                    status = AgentStatus::Error;
                    error = Some(e);
                    break 'iterations;
                }
            }
        };

        let mut text_buf = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        // call_id -> (tool_name, argument buffer), for providers that
        // stream arguments without a final assembled event.
        let mut assembly: HashMap<String, (String, String)> = HashMap::new();
        let mut stream_error: Option<Error> = None;
        let mut was_cancelled = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                item = stream.next() => match item {
                    None => break,
                    Some(Err(e)) => {
                        stream_error = Some(e);
                        break;
                    }
                    Some(Ok(event)) => match event {
                        CompletionEvent::TextDelta { text } => {
                            emit(events, StreamEvent::LlmTextDelta { text: text.clone() }).await;
                            text_buf.push_str(&text);
                        }
                        CompletionEvent::ToolCallStarted { call_id, tool_name } => {
                            assembly.insert(call_id, (tool_name, String::new()));
                        }
                        CompletionEvent::ToolCallDelta { call_id, delta } => {
                            if let Some((_, args)) = assembly.get_mut(&call_id) {
                                args.push_str(&delta);
                            }
                        }
                        CompletionEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                            assembly.remove(&call_id);
                            pending.push(ToolCall { call_id, tool_name, arguments });
                        }
                        CompletionEvent::Done { usage, .. } => {
                            if let Some(usage) = usage {
                                total_usage.add(&usage);
                            }
                        }
                        CompletionEvent::Error { message } => {
                            stream_error = Some(Error::Provider {
                                provider: llm_cfg.provider_tag.clone(),
                                message,
                            });
                            break;
                        }
                    }
                }
            }
        }

        if was_cancelled {
            status = AgentStatus::Error;
            error = Some(Error::Cancelled);
            break;
        }
        if let Some(e) = stream_error {
            status = AgentStatus::Error;
            error = Some(e);
            break;
        }

        // Assemble calls that only came through start/delta.
        for (call_id, (tool_name, args)) in assembly.drain() {
            let arguments = if args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON, using empty object"
                    );
                    serde_json::Value::Object(Default::default())
                })
            };
            pending.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        // e. No tool calls: this is the final answer.
        if pending.is_empty() {
            history.push(Message::assistant(text_buf.clone()));
            if let Some(schema) = &cfg.response_schema {
                if let Err(e) = validate_final_response(schema, &text_buf) {
                    status = AgentStatus::Error;
                    error = Some(e);
                    final_text = Some(text_buf);
                    break;
                }
            }
            final_text = Some(text_buf);
            status = AgentStatus::Success;
            break;
        }

        // d. Dispatch tool calls concurrently; results append in call
        //    order regardless of completion order.
        history.push(Message::assistant_with_tool_calls(&text_buf, &pending));
        for call in &pending {
            emit(
                events,
                StreamEvent::ToolCallStarted {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;
        }

        let dispatches: Vec<_> = pending
            .iter()
            .map(|call| {
                let child = cancel.child();
                let host = deps.host.clone();
                async move { host.call_tool(call, cfg, false, &child).await }
            })
            .collect();
        let results = join_all(dispatches).await;

        let mut cancelled_in_tools = false;
        for (call, outcome) in pending.iter().zip(results) {
            match outcome {
                Ok(tool_result) => {
                    let content = tool_result.text();
                    emit(
                        events,
                        StreamEvent::ToolCallCompleted {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            content: content.clone(),
                            is_error: tool_result.is_error,
                        },
                    )
                    .await;
                    history.push(Message::tool_result(
                        &call.call_id,
                        &content,
                        tool_result.is_error,
                    ));
                }
                Err(e) => {
                    let domain_error: Error = e.into();
                    if matches!(domain_error, Error::Cancelled) {
                        cancelled_in_tools = true;
                        continue;
                    }
                    // Tool failures are not fatal: they go back to the
                    // LLM as error results and the loop continues.
                    let content = domain_error.to_string();
                    tracing::warn!(
                        agent = %cfg.name,
                        tool = %call.tool_name,
                        error = %content,
                        "tool call failed"
                    );
                    emit(
                        events,
                        StreamEvent::ToolCallCompleted {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            content: content.clone(),
                            is_error: true,
                        },
                    )
                    .await;
                    history.push(Message::tool_result(&call.call_id, &content, true));
                }
            }
        }
        if cancelled_in_tools {
            status = AgentStatus::Error;
            error = Some(Error::Cancelled);
            break;
        }
        if iteration == cap {
            final_text = Some(text_buf);
            tracing::info!(agent = %cfg.name, cap, "iteration cap reached");
        }
    }

    // 7. Persist on every terminal path.
    if let Some((store, key)) = &persistence {
        if let Err(e) = store.save_history(&cfg.name, key, &history).await {
            tracing::warn!(agent = %cfg.name, error = %e, "failed to persist history");
        }
    }

    AgentResult {
        status,
        final_text,
        history,
        usage: total_usage,
        error,
    }
}

/// Parse the final assistant text as JSON and validate it against the
/// agent's declared schema. No retry on failure.
fn validate_final_response(schema: &serde_json::Value, text: &str) -> Result<(), Error> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::SchemaValidation(format!("final response is not valid JSON: {e}")))?;
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::SchemaValidation(format!("invalid response schema: {e}")))?;
    validator
        .validate(&value)
        .map_err(|e| Error::SchemaValidation(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_validation_accepts_conforming_json() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["temp"],
            "properties": { "temp": { "type": "number" } }
        });
        assert!(validate_final_response(&schema, r#"{"temp": 12}"#).is_ok());
    }

    #[test]
    fn schema_validation_rejects_non_json() {
        let schema = serde_json::json!({ "type": "object" });
        let err = validate_final_response(&schema, "plain prose").unwrap_err();
        assert!(matches!(err, Error::SchemaValidation(_)));
    }

    #[test]
    fn schema_validation_rejects_schema_mismatch() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["temp"]
        });
        let err = validate_final_response(&schema, r#"{"condition": "cloudy"}"#).unwrap_err();
        assert!(matches!(err, Error::SchemaValidation(_)));
    }

    #[test]
    fn status_strings() {
        assert_eq!(AgentStatus::Success.as_str(), "success");
        assert_eq!(
            AgentStatus::MaxIterationsReached.as_str(),
            "max_iterations_reached"
        );
    }
}
