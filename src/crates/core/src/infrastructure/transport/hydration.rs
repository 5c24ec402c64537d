//! Conversion from the server's persisted conversation shape into transcript messages.

use crate::util::{new_id, now_ms};
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use turnwise_core_types::{
    ChatMessage, MessageRole, MessageSegment, TokenUsage, ToolExecution, ToolExecutionUpdate,
    ToolStatus,
};

#[derive(Debug, Deserialize)]
pub struct ConversationResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<StoredMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    id: Option<String>,
    /// Older records store the role under `type`; `role` wins when both are present.
    #[serde(default)]
    role: Option<String>,
    #[serde(default, rename = "type")]
    legacy_role: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default, alias = "createdAtMs")]
    timestamp: Option<i64>,
    #[serde(default)]
    segments: Vec<Value>,
    #[serde(default, alias = "token_usage")]
    usage: Option<TokenUsage>,
}

impl ConversationResponse {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(StoredMessage::into_chat_message)
            .collect()
    }
}

impl StoredMessage {
    fn into_chat_message(self) -> Option<ChatMessage> {
        let role = match self.role.as_deref().or(self.legacy_role.as_deref()) {
            Some("user") => MessageRole::User,
            Some("assistant") => MessageRole::Assistant,
            other => {
                warn!("Skipping stored message with unsupported role: {:?}", other);
                return None;
            }
        };

        let segments: Vec<MessageSegment> = if role == MessageRole::Assistant {
            self.segments.into_iter().filter_map(stored_segment).collect()
        } else {
            Vec::new()
        };

        let content = match self.content {
            Value::String(text) if !text.is_empty() => text,
            _ => segments
                .iter()
                .filter_map(|segment| match segment {
                    MessageSegment::Text { text, .. } => Some(text.as_str()),
                    MessageSegment::Tool { .. } => None,
                })
                .collect(),
        };

        Some(ChatMessage {
            id: self.id.unwrap_or_else(new_id),
            role,
            content,
            created_at_ms: self.timestamp.unwrap_or_else(now_ms),
            streaming: false,
            segments,
            usage: self.usage.filter(|usage| role == MessageRole::Assistant && !usage.is_empty()),
        })
    }
}

fn stored_segment(value: Value) -> Option<MessageSegment> {
    let id = value.get("id").and_then(Value::as_str).map(str::to_string);
    match value.get("kind").and_then(Value::as_str) {
        Some("text") => Some(MessageSegment::Text {
            id: id.unwrap_or_else(new_id),
            text: value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        Some("tool") => {
            let mut execution = ["execution", "toolExecution", "tool_execution"]
                .iter()
                .find_map(|key| value.get(*key))
                .and_then(Value::as_object)
                .cloned()?;
            if !execution.contains_key("call_id") && !execution.contains_key("callId") {
                execution.insert("call_id".to_string(), Value::String(id?));
            }
            match serde_json::from_value::<ToolExecutionUpdate>(Value::Object(execution)) {
                Ok(update) => Some(MessageSegment::tool(ToolExecution::from_update(
                    &update,
                    ToolStatus::Pending,
                ))),
                Err(e) => {
                    warn!("Skipping unreadable stored tool segment: {}", e);
                    None
                }
            }
        }
        other => {
            warn!("Skipping stored segment with unknown kind: {:?}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_persisted_conversation() {
        let response: ConversationResponse = serde_json::from_value(json!({
            "status": "success",
            "exists": true,
            "id": "conv-1",
            "messages": [
                {"id": "u1", "type": "user", "content": "deploy web", "timestamp": 1},
                {
                    "id": "a1",
                    "type": "assistant",
                    "content": "",
                    "timestamp": 2,
                    "segments": [
                        {"kind": "text", "id": "t1", "text": "Checking. "},
                        {"kind": "tool", "id": "c1", "toolExecution": {
                            "call_id": "c1", "tool": "argo_sync", "args": {"app": "web"},
                            "status": "awaiting_approval", "requires_approval": true
                        }},
                        {"kind": "mystery"}
                    ],
                    "token_usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10,
                                    "cached_tokens": 0, "cost": 0.1, "ttft_ms": 90, "ttr_ms": null}
                },
                {"type": "system", "content": "ignored"}
            ]
        }))
        .unwrap();

        let messages = response.into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "deploy web");

        let assistant = &messages[1];
        assert!(!assistant.streaming);
        assert_eq!(assistant.content, "Checking. ");
        assert_eq!(assistant.segments.len(), 2);
        let tool = assistant.segments[1].as_tool().unwrap();
        assert_eq!(tool.status, ToolStatus::AwaitingApproval);
        assert!(tool.is_approvable());
        assert_eq!(assistant.usage.unwrap().total_tokens, 10);
        assert_eq!(assistant.usage.unwrap().time_to_first_token, Some(90));
    }

    #[test]
    fn tool_segment_without_call_id_uses_segment_id() {
        let segment = stored_segment(json!({
            "kind": "tool",
            "id": "c9",
            "toolExecution": {"tool": "helm_list", "status": "completed"}
        }))
        .unwrap();
        assert_eq!(segment.id(), "c9");
        assert_eq!(segment.as_tool().unwrap().status, ToolStatus::Completed);
    }

    #[test]
    fn null_messages_hydrate_to_empty() {
        let response: ConversationResponse =
            serde_json::from_value(json!({"id": "c", "messages": null})).unwrap();
        assert!(response.into_messages().is_empty());
    }

    #[test]
    fn role_field_wins_over_legacy_type() {
        let response: ConversationResponse = serde_json::from_value(json!({
            "id": "c",
            "messages": [
                {"id": "m1", "type": "user", "role": "assistant", "content": "both"},
                {"id": "m2", "role": "user", "content": "role only"},
                {"id": "m3", "content": "neither"}
            ]
        }))
        .unwrap();
        let messages = response.into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].content, "both");
        assert_eq!(messages[1].role, MessageRole::User);
    }
}
