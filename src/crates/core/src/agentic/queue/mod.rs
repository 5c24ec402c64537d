//! Input queue
//!
//! FIFO of user input submitted while a turn is running, plus the single-flight
//! latch guarding out-of-order immediate submission.

use crate::util::errors::{TurnwiseError, TurnwiseResult};
use crate::util::{new_id, now_ms};
use log::debug;
use std::collections::VecDeque;
use turnwise_core_types::QueuedMessage;

#[derive(Debug, Default)]
pub struct InputQueue {
    entries: VecDeque<QueuedMessage>,
    immediate_in_flight: bool,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, content: impl Into<String>) -> QueuedMessage {
        let entry = QueuedMessage {
            id: new_id(),
            content: content.into(),
            enqueued_at_ms: now_ms(),
        };
        debug!("Input queued: id={}, position={}", entry.id, self.entries.len());
        self.entries.push_back(entry.clone());
        entry
    }

    pub fn remove(&mut self, id: &str) -> Option<QueuedMessage> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(index)
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.entries.pop_front()
    }

    /// Pull `id` out of order and take the immediate-submission latch.
    pub fn take_for_immediate(&mut self, id: &str) -> TurnwiseResult<QueuedMessage> {
        if self.immediate_in_flight {
            return Err(TurnwiseError::InvalidState(
                "An immediate submission is already in flight".to_string(),
            ));
        }
        let entry = self
            .remove(id)
            .ok_or_else(|| TurnwiseError::NotFound(format!("Queued message not found: {}", id)))?;
        self.immediate_in_flight = true;
        Ok(entry)
    }

    pub fn release_immediate(&mut self) {
        self.immediate_in_flight = false;
    }

    pub fn is_immediate_in_flight(&self) -> bool {
        self.immediate_in_flight
    }

    pub fn entries(&self) -> Vec<QueuedMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = InputQueue::new();
        queue.enqueue("first");
        queue.enqueue("second");
        assert_eq!(queue.pop_front().unwrap().content, "first");
        assert_eq!(queue.pop_front().unwrap().content, "second");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn immediate_submission_bypasses_order_once() {
        let mut queue = InputQueue::new();
        queue.enqueue("first");
        let second = queue.enqueue("second");
        let third = queue.enqueue("third");

        let taken = queue.take_for_immediate(&third.id).unwrap();
        assert_eq!(taken.content, "third");
        assert!(queue.is_immediate_in_flight());

        let blocked = queue.take_for_immediate(&second.id);
        assert!(matches!(blocked, Err(TurnwiseError::InvalidState(_))));
        assert_eq!(queue.len(), 2);

        queue.release_immediate();
        assert_eq!(queue.take_for_immediate(&second.id).unwrap().content, "second");
    }

    #[test]
    fn unknown_id_does_not_take_latch() {
        let mut queue = InputQueue::new();
        assert!(matches!(
            queue.take_for_immediate("missing"),
            Err(TurnwiseError::NotFound(_))
        ));
        assert!(!queue.is_immediate_in_flight());
    }

    #[test]
    fn remove_drops_only_named_entry() {
        let mut queue = InputQueue::new();
        let a = queue.enqueue("a");
        queue.enqueue("b");
        assert_eq!(queue.remove(&a.id).unwrap().content, "a");
        assert!(queue.remove(&a.id).is_none());
        assert_eq!(queue.entries()[0].content, "b");
    }
}
