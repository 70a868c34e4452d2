//! The completion source abstraction and its wire types.

use crate::error::ModelError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vocalis_types::{ConversationTurn, Role, ToolInvocation};

/// A message in the chat format the model service speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
            tool_calls: turn.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_name: turn.tool_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl From<&ToolInvocation> for WireToolCall {
    fn from(call: &ToolInvocation) -> Self {
        Self {
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<WireToolCall> for ToolInvocation {
    fn from(call: WireToolCall) -> Self {
        // Some models send arguments as a JSON-encoded string.
        let arguments = match call.function.arguments {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        };
        ToolInvocation::new(call.function.name, arguments)
    }
}

/// One streaming chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Function-calling schemas. Empty means the model must answer in text.
    pub tools: Vec<Value>,
    pub temperature: Option<f32>,
}

/// An incremental piece of model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChunk {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    /// Set on the final chunk of a response.
    pub done: bool,
}

impl ModelChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<ModelChunk, ModelError>>;

/// A streaming chat completion service.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Starts a completion. Errors before the first chunk are returned
    /// directly; errors mid-stream arrive as stream items.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_arguments_are_decoded() {
        let call: WireToolCall = serde_json::from_value(json!({
            "function": {"name": "get_table_count", "arguments": "{\"table_name\":\"usuarios\"}"}
        }))
        .unwrap();
        let inv = ToolInvocation::from(call);
        assert_eq!(inv.arguments, json!({"table_name": "usuarios"}));
    }

    #[test]
    fn tool_turn_serializes_with_tool_name() {
        let turn = ConversationTurn {
            ordinal: 3,
            role: Role::Tool,
            content: "10".to_string(),
            tool_name: Some("get_table_count".to_string()),
            tool_calls: vec![],
        };
        let value = serde_json::to_value(ChatMessage::from(&turn)).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "content": "10", "tool_name": "get_table_count"})
        );
    }
}
