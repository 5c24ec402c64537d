//! Approval coordinator
//!
//! Finds tool calls waiting on a human decision and sequences bulk decisions
//! so that exactly one approval continuation is in flight at a time.

use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::VecDeque;
use turnwise_core_types::{ApprovalDecision, ApprovalProgress, ChatMessage, ToolExecution};

/// Every approvable call in `current`, or in the last finalized assistant
/// message when there is no in-progress one. One entry per call id, keeping
/// the most recently seen snapshot.
pub fn collect_approvable(
    current: Option<&ChatMessage>,
    finalized: &[ChatMessage],
) -> Vec<ToolExecution> {
    let source = current.or_else(|| finalized.iter().rev().find(|message| message.is_assistant()));
    let Some(source) = source else {
        return Vec::new();
    };

    let mut by_call_id: IndexMap<&str, &ToolExecution> = IndexMap::new();
    for execution in source.tool_executions() {
        by_call_id.insert(execution.call_id.as_str(), execution);
    }

    by_call_id
        .into_values()
        .filter(|execution| execution.is_approvable())
        .cloned()
        .collect()
}

/// What the session should do after an approval continuation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkStep {
    /// Open the next continuation.
    Next {
        call_id: String,
        decision: ApprovalDecision,
        progress: ApprovalProgress,
    },
    /// The last queued call just completed.
    Finished(ApprovalProgress),
    /// No bulk decision is running.
    Idle,
}

#[derive(Debug, Default)]
pub struct ApprovalCoordinator {
    queue: VecDeque<String>,
    progress: Option<ApprovalProgress>,
}

impl ApprovalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> Option<ApprovalProgress> {
        self.progress
    }

    pub fn is_draining(&self) -> bool {
        self.progress.is_some()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Queue `call_ids` under one decision and hand back the first call to start.
    pub fn begin_bulk(
        &mut self,
        decision: ApprovalDecision,
        call_ids: Vec<String>,
    ) -> Option<(String, ApprovalProgress)> {
        if self.is_draining() {
            warn!("Replacing a bulk decision that was still running");
        }
        self.queue = call_ids.into();
        let first = self.queue.pop_front()?;
        let progress = ApprovalProgress {
            completed: 0,
            total: self.queue.len() + 1,
            decision,
        };
        info!(
            "Bulk decision started: decision={:?}, total={}",
            decision, progress.total
        );
        self.progress = Some(progress);
        Some((first, progress))
    }

    pub fn on_continuation_completed(&mut self) -> BulkStep {
        let Some(mut progress) = self.progress else {
            return BulkStep::Idle;
        };
        progress.completed += 1;

        match self.queue.pop_front() {
            Some(call_id) => {
                debug!(
                    "Bulk decision advancing: completed={}, total={}, next={}",
                    progress.completed, progress.total, call_id
                );
                self.progress = Some(progress);
                BulkStep::Next {
                    call_id,
                    decision: progress.decision,
                    progress,
                }
            }
            None => {
                info!(
                    "Bulk decision finished: decision={:?}, total={}",
                    progress.decision, progress.total
                );
                self.progress = None;
                BulkStep::Finished(progress)
            }
        }
    }

    /// Drop any remaining bulk work. Returns the progress that was abandoned.
    pub fn abort(&mut self) -> Option<ApprovalProgress> {
        let progress = self.progress.take();
        if let Some(progress) = progress {
            warn!(
                "Bulk decision aborted: completed={}, total={}, skipped={}",
                progress.completed,
                progress.total,
                self.queue.len()
            );
        }
        self.queue.clear();
        progress
    }
}
