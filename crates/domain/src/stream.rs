use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Wire-level events emitted by an LLM provider adapter while streaming
/// one completion. Adapters translate their native stream grammar into
/// these; the agent loop assembles them into text and tool calls.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CompletionEvent {
    /// A text token chunk.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// A tool call has started.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// The completion finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
        /// Provider-native metadata, carried through uninterpreted.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// An error occurred mid-stream.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Events surfaced to callers of an agent run (facade `stream_agent`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A new loop iteration is starting (1-based).
    #[serde(rename = "iteration_start")]
    IterationStart { iteration: u32 },

    /// Incremental assistant text.
    #[serde(rename = "llm_text_delta")]
    LlmTextDelta { text: String },

    /// The agent is dispatching a tool call.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// A tool call finished (successfully or not).
    #[serde(rename = "tool_call_completed")]
    ToolCallCompleted {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// The final assistant message.
    #[serde(rename = "final")]
    Final { text: String, status: String },

    /// The run failed.
    #[serde(rename = "error")]
    Error { message: String, kind: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another completion's usage into this one.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
