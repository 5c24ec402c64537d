//! Pure segment reducers applied to the in-progress assistant message.

use crate::util::new_id;
use log::{debug, warn};
use turnwise_core_types::{
    ChatMessage, MessageSegment, ToolExecution, ToolExecutionUpdate, ToolStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMerge {
    Created,
    Merged,
    Ignored,
}

impl ToolMerge {
    pub fn changed(self) -> bool {
        self != Self::Ignored
    }
}

/// Extend the trailing text segment, or start one after a tool segment.
pub fn append_token(message: &mut ChatMessage, text: &str) {
    if text.is_empty() {
        return;
    }
    match message.segments.last_mut() {
        Some(MessageSegment::Text { text: last, .. }) => last.push_str(text),
        _ => message.segments.push(MessageSegment::Text {
            id: new_id(),
            text: text.to_string(),
        }),
    }
    message.content.push_str(text);
}

/// Append unseen executions in arrival order and merge the rest in place.
pub fn apply_pending(message: &mut ChatMessage, executions: &[ToolExecutionUpdate]) -> bool {
    let mut changed = false;
    for update in executions {
        changed |= apply_tool_update(message, update, true).changed();
    }
    changed
}

/// Merge `update` into the tool segment with the same call id.
///
/// When no such segment exists a new one is appended only if
/// `create_if_missing` is set; otherwise the update is dropped.
pub fn apply_tool_update(
    message: &mut ChatMessage,
    update: &ToolExecutionUpdate,
    create_if_missing: bool,
) -> ToolMerge {
    if let Some(execution) = message.find_tool_mut(&update.call_id) {
        warn_on_regression(execution, update);
        execution.merge(update);
        return ToolMerge::Merged;
    }

    if !create_if_missing {
        debug!(
            "Dropping update for unknown tool call: call_id={}, status={:?}",
            update.call_id, update.status
        );
        return ToolMerge::Ignored;
    }

    let fallback = update.status.unwrap_or(ToolStatus::Pending);
    message
        .segments
        .push(MessageSegment::tool(ToolExecution::from_update(update, fallback)));
    ToolMerge::Created
}

fn warn_on_regression(execution: &ToolExecution, update: &ToolExecutionUpdate) {
    if let Some(next) = update.status {
        if execution.status.is_terminal() && !next.is_terminal() {
            warn!(
                "Tool status regression applied: call_id={}, from={}, to={}",
                execution.call_id,
                execution.status.as_str(),
                next.as_str()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant() -> ChatMessage {
        ChatMessage::streaming_assistant("a1", 0)
    }

    fn pending(call_id: &str) -> ToolExecutionUpdate {
        ToolExecutionUpdate {
            call_id: call_id.to_string(),
            name: Some("kubectl_apply".to_string()),
            status: Some(ToolStatus::Pending),
            requires_approval: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn tokens_accumulate_into_one_text_segment() {
        let mut message = assistant();
        for chunk in ["Hel", "lo ", "", "world"] {
            append_token(&mut message, chunk);
        }
        assert_eq!(message.content, "Hello world");
        assert_eq!(message.segments.len(), 1);
    }

    #[test]
    fn tool_segment_forces_new_text_segment() {
        let mut message = assistant();
        append_token(&mut message, "Checking. ");
        apply_pending(&mut message, &[pending("c1")]);
        append_token(&mut message, "Done.");

        assert_eq!(message.segments.len(), 3);
        assert_eq!(message.segments[1].id(), "c1");
        assert!(matches!(
            &message.segments[2],
            MessageSegment::Text { text, .. } if text == "Done."
        ));
        assert_eq!(message.content, "Checking. Done.");
    }

    #[test]
    fn pending_merges_existing_without_reordering() {
        let mut message = assistant();
        apply_pending(&mut message, &[pending("c1"), pending("c2")]);
        let mut again = pending("c1");
        again.arguments = Some(json!({"file": "deploy.yaml"}));
        apply_pending(&mut message, &[pending("c3"), again]);

        let ids: Vec<&str> = message.segments.iter().map(MessageSegment::id).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(
            message.segments[0].as_tool().unwrap().arguments,
            json!({"file": "deploy.yaml"})
        );
    }

    #[test]
    fn duplicate_executing_event_is_idempotent() {
        let update = ToolExecutionUpdate {
            call_id: "c1".to_string(),
            name: Some("helm_list".to_string()),
            status: Some(ToolStatus::Executing),
            ..Default::default()
        };
        let mut once = assistant();
        assert_eq!(apply_tool_update(&mut once, &update, true), ToolMerge::Created);
        let mut twice = once.clone();
        assert_eq!(apply_tool_update(&mut twice, &update, true), ToolMerge::Merged);
        assert_eq!(once, twice);
    }

    #[test]
    fn update_only_event_for_unknown_call_is_dropped() {
        let mut message = assistant();
        let result = ToolExecutionUpdate {
            call_id: "ghost".to_string(),
            status: Some(ToolStatus::Completed),
            result: Some(json!("ok")),
            ..Default::default()
        };
        assert_eq!(apply_tool_update(&mut message, &result, false), ToolMerge::Ignored);
        assert!(message.segments.is_empty());
    }

    #[test]
    fn regression_is_still_applied() {
        let mut message = assistant();
        let completed = ToolExecutionUpdate::with_status("c1", ToolStatus::Completed);
        let executing = ToolExecutionUpdate::with_status("c1", ToolStatus::Executing);
        apply_tool_update(&mut message, &completed, true);
        apply_tool_update(&mut message, &executing, true);
        assert_eq!(message.segments[0].as_tool().unwrap().status, ToolStatus::Executing);
    }
}
