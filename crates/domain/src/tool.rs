use serde::{Deserialize, Serialize};

/// A tool invocation issued by an LLM, in the canonical internal shape.
/// Every provider adapter converts its own wire format to/from this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of dispatching one [`ToolCall`] to an MCP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Join the text of all text blocks, newline-separated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One content block of an MCP response.
///
/// Only `text` blocks are interpreted; any other kind (image, audio, ...)
/// is carried through untouched in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentBlock {
    pub fn text_block(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: text.into(),
            extra: Default::default(),
        }
    }
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// An assistant message carrying text plus the tool calls it issued.
    pub fn assistant_with_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.into() });
        }
        for call in calls {
            parts.push(ContentPart::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }]),
        }
    }

    /// The tool calls issued by this message, if any.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        match &self.content {
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                        call_id: id.clone(),
                        tool_name: name.clone(),
                        arguments: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }
}

impl MessageContent {
    /// Extract and join all text content, returning an owned String.
    ///
    /// Non-text parts (tool_use, tool_result) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_skips_tool_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "one".into() },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "echo".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text { text: "two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "one\ntwo");
    }

    #[test]
    fn assistant_with_tool_calls_round_trips() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "weather_lookup".into(),
            arguments: serde_json::json!({"city": "London"}),
        }];
        let msg = Message::assistant_with_tool_calls("checking", &calls);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.tool_calls(), calls);
        assert_eq!(msg.content.extract_all_text(), "checking");
    }

    #[test]
    fn tool_result_text_joins_text_blocks_only() {
        let result = ToolResult {
            call_id: "c1".into(),
            content: vec![
                ContentBlock::text_block("a"),
                ContentBlock {
                    kind: "image".into(),
                    text: String::new(),
                    extra: Default::default(),
                },
                ContentBlock::text_block("b"),
            ],
            is_error: false,
        };
        assert_eq!(result.text(), "a\nb");
    }

    #[test]
    fn content_block_opaque_passthrough() {
        let raw = r#"{"type":"image","data":"base64...","mimeType":"image/png"}"#;
        let block: ContentBlock = serde_json::from_str(raw).unwrap();
        assert_eq!(block.kind, "image");
        assert!(block.text.is_empty());
        let back = serde_json::to_value(&block).unwrap();
        assert_eq!(back.get("data").unwrap(), "base64...");
        assert_eq!(back.get("mimeType").unwrap(), "image/png");
    }

    #[test]
    fn message_serde_round_trip() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant_with_tool_calls(
                "",
                &[ToolCall {
                    call_id: "1".into(),
                    tool_name: "t".into(),
                    arguments: serde_json::json!({"k": 1}),
                }],
            ),
            Message::tool_result("1", "ok", false),
        ];
        let json = serde_json::to_string(&msgs).unwrap();
        let back: Vec<Message> = serde_json::from_str(&json).unwrap();
        assert_eq!(msgs, back);
    }
}
