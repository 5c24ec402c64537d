use super::payload::{
    error_message, millis, token_text, usage_report, PendingToolsPayload, ReadyPayload,
};
use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde_json::Value;
use turnwise_core_types::{TokenUsage, ToolExecutionUpdate, ToolStatus, UsageSource};

/// Single-execution tool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEventKind {
    Executing,
    Result,
    Error,
    AwaitingApproval,
    Approved,
    Denied,
}

impl ToolEventKind {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "tool.executing" => Some(Self::Executing),
            "tool.result" => Some(Self::Result),
            "tool.error" => Some(Self::Error),
            "tool.awaiting_approval" => Some(Self::AwaitingApproval),
            "tool.approved" => Some(Self::Approved),
            "tool.denied" => Some(Self::Denied),
            _ => None,
        }
    }

    /// Status implied by the event name when the payload carries none.
    pub fn implied_status(self) -> ToolStatus {
        match self {
            Self::Executing => ToolStatus::Executing,
            Self::Result => ToolStatus::Completed,
            Self::Error => ToolStatus::Error,
            Self::AwaitingApproval => ToolStatus::AwaitingApproval,
            Self::Approved => ToolStatus::Approved,
            Self::Denied => ToolStatus::Denied,
        }
    }

    /// `tool.result` and `tool.approved` only ever update a segment that already exists.
    pub fn creates_segment(self) -> bool {
        !matches!(self, Self::Result | Self::Approved)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Ready {
        run_id: String,
    },
    Token {
        text: String,
    },
    ToolsPending {
        executions: Vec<ToolExecutionUpdate>,
    },
    Tool {
        kind: ToolEventKind,
        update: ToolExecutionUpdate,
    },
    TokenUsage {
        usage: TokenUsage,
        source: UsageSource,
    },
    Ttft {
        duration_ms: u64,
    },
    /// `duration_ms` is `None` only when the server omitted it.
    Completed {
        duration_ms: Option<u64>,
    },
    Error {
        message: String,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Token { .. } => "token",
            Self::ToolsPending { .. } => "tools.pending",
            Self::Tool { kind, .. } => match kind {
                ToolEventKind::Executing => "tool.executing",
                ToolEventKind::Result => "tool.result",
                ToolEventKind::Error => "tool.error",
                ToolEventKind::AwaitingApproval => "tool.awaiting_approval",
                ToolEventKind::Approved => "tool.approved",
                ToolEventKind::Denied => "tool.denied",
            },
            Self::TokenUsage { .. } => "token_usage",
            Self::Ttft { .. } => "ttft",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }
}

/// Decode one named SSE event.
///
/// Returns `Ok(None)` for events that carry nothing for the client (heartbeats,
/// progress markers, names this client does not know). Returns `Err` for a known
/// event whose payload does not parse; callers drop it and keep reading.
pub fn decode_turn_event(event: &str, data: &str) -> Result<Option<TurnEvent>> {
    let decoded = match event {
        "ready" => {
            let payload: ReadyPayload = parse(event, data)?;
            TurnEvent::Ready {
                run_id: payload.run_id,
            }
        }
        "token" => TurnEvent::Token {
            text: token_text(data),
        },
        "tools.pending" => {
            let payload: PendingToolsPayload = parse(event, data)?;
            let executions = payload
                .executions
                .into_iter()
                .map(|mut update| {
                    update.status.get_or_insert(ToolStatus::Pending);
                    update
                })
                .collect();
            TurnEvent::ToolsPending { executions }
        }
        "token_usage" | "token.usage" => {
            let value: Value = parse(event, data)?;
            let (usage, source) = usage_report(value)
                .map_err(|e| anyhow!("invalid {} payload: {}, data: {}", event, e, data))?;
            TurnEvent::TokenUsage { usage, source }
        }
        "ttft" => {
            let value: Value = parse(event, data)?;
            let duration_ms = millis(&value, &["duration_ms", "duration"])
                .ok_or_else(|| anyhow!("ttft without duration, data: {}", data))?;
            TurnEvent::Ttft { duration_ms }
        }
        "completed" => {
            let value = parse_or_empty(event, data)?;
            if value.get("status").and_then(Value::as_str) == Some("stopped") {
                debug!("Turn stopped by server");
            }
            TurnEvent::Completed {
                duration_ms: millis(&value, &["duration_ms"]),
            }
        }
        "workflow_complete" => {
            let value = parse_or_empty(event, data)?;
            debug!(
                "Workflow complete: status={}",
                value
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>")
            );
            TurnEvent::Completed { duration_ms: None }
        }
        "error" | "workflow.error" | "workflow_error" => {
            let value = parse_or_empty(event, data).unwrap_or(Value::Null);
            TurnEvent::Error {
                message: error_message(&value).unwrap_or_else(|| "agent turn failed".to_string()),
            }
        }
        "rate_limit" | "transient_error" => {
            warn!("Agent server reported {}: data={}", event, data);
            return Ok(None);
        }
        name => match ToolEventKind::from_event_name(name) {
            Some(kind) => {
                let mut update: ToolExecutionUpdate = parse(event, data)?;
                update.status.get_or_insert(kind.implied_status());
                TurnEvent::Tool { kind, update }
            }
            None => return Ok(None),
        },
    };
    Ok(Some(decoded))
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| anyhow!("invalid {} payload: {}, data: {}", event, e, data))
}

fn parse_or_empty(event: &str, data: &str) -> Result<Value> {
    if data.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    parse(event, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(event: &str, data: &str) -> TurnEvent {
        decode_turn_event(event, data)
            .expect("decodes")
            .expect("not ignored")
    }

    #[test]
    fn decodes_ready_and_tokens() {
        assert_eq!(
            decode("ready", r#"{"run_id":"r-1"}"#),
            TurnEvent::Ready {
                run_id: "r-1".to_string()
            }
        );
        assert_eq!(
            decode("token", "Hello "),
            TurnEvent::Token {
                text: "Hello ".to_string()
            }
        );
    }

    #[test]
    fn pending_tools_default_to_pending_status() {
        let event = decode(
            "tools.pending",
            r#"{"tools":[{"call_id":"c1","tool":"kubectl_delete","requires_approval":true}]}"#,
        );
        let TurnEvent::ToolsPending { executions } = event else {
            panic!("expected tools.pending");
        };
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, Some(ToolStatus::Pending));
        assert_eq!(executions[0].requires_approval, Some(true));
    }

    #[test]
    fn tool_event_name_supplies_missing_status() {
        let event = decode(
            "tool.result",
            r#"{"call_id":"c1","tool":"helm_list","result":[{"type":"text","text":"ok"}]}"#,
        );
        let TurnEvent::Tool { kind, update } = event else {
            panic!("expected tool event");
        };
        assert_eq!(kind, ToolEventKind::Result);
        assert_eq!(update.status, Some(ToolStatus::Completed));
        assert!(update.result.is_some());
        assert!(!kind.creates_segment());
    }

    #[test]
    fn explicit_status_wins_over_event_name() {
        let TurnEvent::Tool { update, .. } = decode(
            "tool.awaiting_approval",
            r#"{"callId":"c1","status":"awaiting_approval"}"#,
        ) else {
            panic!("expected tool event");
        };
        assert_eq!(update.status, Some(ToolStatus::AwaitingApproval));
    }

    #[test]
    fn completed_keeps_explicit_zero_duration() {
        assert_eq!(
            decode("completed", r#"{"duration_ms":0}"#),
            TurnEvent::Completed {
                duration_ms: Some(0)
            }
        );
        assert_eq!(
            decode("completed", "{}"),
            TurnEvent::Completed { duration_ms: None }
        );
        assert_eq!(
            decode("completed", ""),
            TurnEvent::Completed { duration_ms: None }
        );
    }

    #[test]
    fn error_variants_share_one_shape() {
        for name in ["error", "workflow.error", "workflow_error"] {
            assert_eq!(
                decode(name, r#"{"error":"max iterations"}"#),
                TurnEvent::Error {
                    message: "max iterations".to_string()
                }
            );
        }
        assert_eq!(
            decode("error", "not json"),
            TurnEvent::Error {
                message: "agent turn failed".to_string()
            }
        );
    }

    #[test]
    fn usage_and_ttft_accept_both_spellings() {
        assert!(matches!(
            decode("token.usage", r#"{"prompt_tokens":3,"source":"turn_check"}"#),
            TurnEvent::TokenUsage {
                source: UsageSource::TurnCheck,
                ..
            }
        ));
        assert_eq!(
            decode("ttft", r#"{"duration":250}"#),
            TurnEvent::Ttft { duration_ms: 250 }
        );
    }

    #[test]
    fn ignores_heartbeats_and_unknown_events() {
        assert!(decode_turn_event("heartbeat", r#"{"timestamp":1}"#)
            .unwrap()
            .is_none());
        assert!(decode_turn_event("generation.start", "{}").unwrap().is_none());
        assert!(decode_turn_event("something.new", "{}").unwrap().is_none());
    }

    #[test]
    fn malformed_known_payload_is_an_error() {
        assert!(decode_turn_event("tool.executing", "{not json").is_err());
        assert!(decode_turn_event("ready", "{}").is_err());
    }
}
