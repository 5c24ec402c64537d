use crate::tool::ToolExecution;
use crate::usage::TokenUsage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One ordered piece of an assistant message.
///
/// A tool segment's `id` is always its execution's `call_id`, which is what
/// lets later events update it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageSegment {
    Text {
        id: String,
        text: String,
    },
    Tool {
        id: String,
        execution: ToolExecution,
    },
}

impl MessageSegment {
    pub fn tool(execution: ToolExecution) -> Self {
        Self::Tool {
            id: execution.call_id.clone(),
            execution,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Text { id, .. } | Self::Tool { id, .. } => id,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolExecution> {
        match self {
            Self::Tool { execution, .. } => Some(execution),
            Self::Text { .. } => None,
        }
    }

    pub fn as_tool_mut(&mut self) -> Option<&mut ToolExecution> {
        match self {
            Self::Tool { execution, .. } => Some(execution),
            Self::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    pub created_at_ms: i64,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<MessageSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ChatMessage {
    pub fn user(id: impl Into<String>, content: impl Into<String>, created_at_ms: i64) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::User,
            content: content.into(),
            created_at_ms,
            streaming: false,
            segments: Vec::new(),
            usage: None,
        }
    }

    /// Empty assistant message that is still being appended to.
    pub fn streaming_assistant(id: impl Into<String>, created_at_ms: i64) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            content: String::new(),
            created_at_ms,
            streaming: true,
            segments: Vec::new(),
            usage: None,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    /// Whether finalizing this message would keep anything worth showing.
    pub fn has_content(&self) -> bool {
        !self.content.is_empty() || !self.segments.is_empty()
    }

    pub fn tool_executions(&self) -> impl Iterator<Item = &ToolExecution> {
        self.segments.iter().filter_map(MessageSegment::as_tool)
    }

    pub fn find_tool_mut(&mut self, call_id: &str) -> Option<&mut ToolExecution> {
        self.segments
            .iter_mut()
            .filter_map(MessageSegment::as_tool_mut)
            .find(|execution| execution.call_id == call_id)
    }
}
