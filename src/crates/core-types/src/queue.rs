use serde::{Deserialize, Serialize};

/// User input submitted while a turn was still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub content: String,
    pub enqueued_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

impl ApprovalDecision {
    pub fn from_approve(approve: bool) -> Self {
        if approve {
            Self::Approve
        } else {
            Self::Deny
        }
    }

    pub fn is_approve(self) -> bool {
        self == Self::Approve
    }
}

/// Progress of a bulk decision being applied one call at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalProgress {
    pub completed: usize,
    pub total: usize,
    pub decision: ApprovalDecision,
}

impl ApprovalProgress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}
