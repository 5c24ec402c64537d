//! Transcript store
//!
//! Finalized messages in order, plus at most one in-progress assistant message
//! addressed by the turn generation that created it. Only the in-progress
//! message is ever marked `streaming`.

pub mod reducer;

pub use reducer::{append_token, apply_pending, apply_tool_update, ToolMerge};

use crate::util::{new_id, now_ms};
use log::{debug, warn};
use turnwise_core_types::{ChatMessage, TokenUsage};

#[derive(Debug, Clone)]
struct InProgress {
    generation: u64,
    message: ChatMessage,
    /// Pulled back out of the finalized list to continue after an approval.
    resumed: bool,
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    messages: Vec<ChatMessage>,
    in_progress: Option<InProgress>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Finalized messages followed by the in-progress one, if any.
    pub fn all_messages(&self) -> Vec<ChatMessage> {
        let mut all = self.messages.clone();
        if let Some(current) = &self.in_progress {
            all.push(current.message.clone());
        }
        all
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.in_progress.is_none()
    }

    pub fn push_finalized(&mut self, mut message: ChatMessage) {
        message.streaming = false;
        self.messages.push(message);
    }

    pub fn current(&self) -> Option<&ChatMessage> {
        self.in_progress.as_ref().map(|current| &current.message)
    }

    /// The in-progress message, only if it belongs to `generation`.
    pub fn current_mut(&mut self, generation: u64) -> Option<&mut ChatMessage> {
        self.in_progress
            .as_mut()
            .filter(|current| current.generation == generation)
            .map(|current| &mut current.message)
    }

    /// The in-progress message for `generation`, created empty on first use.
    ///
    /// An in-progress message left over from an older generation is finalized first.
    pub fn current_or_begin(&mut self, generation: u64) -> &mut ChatMessage {
        if self
            .in_progress
            .as_ref()
            .is_some_and(|current| current.generation != generation)
        {
            warn!("Finalizing message left by an older turn: generation={}", generation);
            self.finalize(None);
        }

        &mut self
            .in_progress
            .get_or_insert_with(|| {
                debug!("Creating in-progress assistant message: generation={}", generation);
                InProgress {
                    generation,
                    message: ChatMessage::streaming_assistant(new_id(), now_ms()),
                    resumed: false,
                }
            })
            .message
    }

    /// Remove the last finalized message if it came from the assistant.
    pub fn take_last_assistant(&mut self) -> Option<ChatMessage> {
        match self.messages.last() {
            Some(message) if message.is_assistant() => self.messages.pop(),
            _ => None,
        }
    }

    /// Reopen a previously finalized message as the in-progress one.
    pub fn resume(&mut self, generation: u64, mut message: ChatMessage) {
        if self.in_progress.is_some() {
            self.finalize(None);
        }
        message.streaming = true;
        self.in_progress = Some(InProgress {
            generation,
            message,
            resumed: true,
        });
    }

    /// Move the in-progress message into the finalized list.
    ///
    /// An empty fresh message is discarded. A resumed message is always kept so a
    /// failed continuation never loses what was already shown.
    pub fn finalize(&mut self, usage: Option<TokenUsage>) -> Option<ChatMessage> {
        let InProgress {
            mut message,
            resumed,
            generation,
        } = self.in_progress.take()?;

        message.streaming = false;
        if let Some(usage) = usage.filter(|usage| !usage.is_empty()) {
            message.usage = Some(usage);
        }

        if !message.has_content() && !resumed {
            debug!("Discarding empty assistant message: generation={}", generation);
            return None;
        }

        self.messages.push(message.clone());
        Some(message)
    }

    /// Seed an empty store from a stored conversation. Returns whether anything was applied.
    pub fn hydrate(&mut self, messages: Vec<ChatMessage>) -> bool {
        if !self.is_empty() {
            warn!(
                "Ignoring hydration into a non-empty transcript: existing={}",
                self.messages.len()
            );
            return false;
        }
        self.messages = messages
            .into_iter()
            .map(|mut message| {
                message.streaming = false;
                message
            })
            .collect();
        true
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.streaming).count()
            + self
                .in_progress
                .as_ref()
                .map_or(0, |current| usize::from(current.message.streaming))
    }
}
