use serde::{Deserialize, Serialize};
use turnwise_core_types::{
    ApprovalProgress, ChatMessage, QueuedMessage, TokenUsage, ToolExecution,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Streaming,
    /// Streaming an approval continuation that belongs to a bulk decision.
    DrainingApprovals,
    Cancelling,
}

impl SessionState {
    pub fn is_busy(self) -> bool {
        self != Self::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    NewTurn,
    ApprovalContinuation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started,
    Queued(QueuedMessage),
}

/// Notifications broadcast to every subscriber of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged(SessionState),
    /// The in-progress message changed.
    MessageUpdated(ChatMessage),
    /// A message entered the finalized transcript.
    MessageFinalized(ChatMessage),
    UsageTick {
        turn: TokenUsage,
        session: TokenUsage,
    },
    /// `None` once a bulk decision has finished or been abandoned.
    ApprovalProgress(Option<ApprovalProgress>),
    QueueChanged(Vec<QueuedMessage>),
    TurnFinished(TurnOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub conversation_id: String,
    pub state: SessionState,
    pub generation: u64,
    pub run_id: Option<String>,
    /// Finalized messages followed by the in-progress one.
    pub messages: Vec<ChatMessage>,
    pub queue: Vec<QueuedMessage>,
    pub approvable: Vec<ToolExecution>,
    pub approval_progress: Option<ApprovalProgress>,
    pub turn_usage: TokenUsage,
    pub session_usage: TokenUsage,
    pub last_error: Option<String>,
}
