//! Plain-text rendering of session updates.

use std::collections::HashMap;
use turnwise_core::types::{ChatMessage, MessageRole, TokenUsage, ToolStatus};
use turnwise_core::{SessionUpdate, TurnOutcome};

/// Turns the update stream into incremental terminal output.
#[derive(Debug, Default)]
pub struct Renderer {
    /// Bytes of each assistant message's content already written.
    printed: HashMap<String, usize>,
    tool_status: HashMap<String, ToolStatus>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for `update`, if any.
    pub fn render(&mut self, update: &SessionUpdate) -> Option<String> {
        let out = match update {
            SessionUpdate::MessageUpdated(message) => self.render_message(message, false),
            SessionUpdate::MessageFinalized(message) => self.render_message(message, true),
            SessionUpdate::ApprovalProgress(Some(progress)) => format!(
                "[approvals] {}/{} {:?}\n",
                progress.completed, progress.total, progress.decision
            ),
            SessionUpdate::QueueChanged(queue) if !queue.is_empty() => {
                format!("[queue] {} waiting\n", queue.len())
            }
            SessionUpdate::TurnFinished(TurnOutcome::Cancelled) => "[cancelled]\n".to_string(),
            SessionUpdate::TurnFinished(TurnOutcome::Failed { message }) => {
                format!("[error] {}\n", message)
            }
            _ => String::new(),
        };
        (!out.is_empty()).then_some(out)
    }

    fn render_message(&mut self, message: &ChatMessage, finalized: bool) -> String {
        if message.role != MessageRole::Assistant {
            return String::new();
        }

        let mut out = String::new();
        let printed = match self.printed.get(&message.id) {
            Some(printed) => *printed,
            None => {
                out.push_str("\nassistant> ");
                0
            }
        };

        // Tool lines go on their own line; text resumes after them.
        for execution in message.tool_executions() {
            if self.tool_status.get(&execution.call_id) == Some(&execution.status) {
                continue;
            }
            self.tool_status
                .insert(execution.call_id.clone(), execution.status);
            out.push_str(&format!(
                "\n  [tool] {} ({}) {}{}\n",
                execution.display_title(),
                execution.call_id,
                execution.status.as_str(),
                if execution.is_approvable() {
                    " - /approve or /deny"
                } else {
                    ""
                }
            ));
        }

        let delta = message.content.get(printed..).unwrap_or_default();
        out.push_str(delta);
        self.printed
            .insert(message.id.clone(), printed + delta.len());

        if finalized {
            out.push('\n');
        }
        out
    }
}

pub fn format_usage(turn: &TokenUsage, session: &TokenUsage) -> String {
    format!(
        "turn: prompt={} completion={} total={} cached={} ttft={} ttr={}\n\
         session: prompt={} completion={} total={} generation_ms={}",
        turn.prompt_tokens,
        turn.completion_tokens,
        turn.total_tokens,
        turn.cached_tokens,
        millis(turn.time_to_first_token),
        millis(turn.time_to_response),
        session.prompt_tokens,
        session.completion_tokens,
        session.total_tokens,
        session.total_generation_ms,
    )
}

fn millis(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms))
}
