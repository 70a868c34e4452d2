//! Conversation turn types.

use crate::tool::ToolInvocation;
use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system prompt. Never evicted from history.
    System,
    /// Input typed or spoken by the user.
    User,
    /// Text generated by the model, possibly carrying tool calls.
    Assistant,
    /// The rendered result of a tool invocation.
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single immutable entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Position of the turn within its conversation. Strictly increasing,
    /// never reused after eviction or rollback.
    pub ordinal: u64,
    pub role: Role,
    /// Text content. For tool turns this is the rendered [`ToolResult`](crate::ToolResult).
    pub content: String,
    /// Name of the tool that produced this turn (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool calls requested by the model (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

impl ConversationTurn {
    /// Returns `true` if this turn belongs to a tool exchange: either a tool
    /// result or an assistant turn that requested tools.
    pub fn is_tool_exchange(&self) -> bool {
        self.role == Role::Tool || !self.tool_calls.is_empty()
    }
}
