//! Usage accumulator
//!
//! Pure merge functions over [`TokenUsage`] plus a wall-clock throttle for
//! display ticks. Canonical state is never throttled.

use std::time::{Duration, Instant};
use turnwise_core_types::{ChatMessage, TokenUsage};

pub fn empty() -> TokenUsage {
    TokenUsage::default()
}

/// Fold one wire delta into the running turn usage.
///
/// Counters add. Timing fields are last-value-wins. Generation time grows only
/// when the delta carries a response time later than the known first-token time.
pub fn merge(current: &TokenUsage, delta: &TokenUsage) -> TokenUsage {
    let time_to_first_token = delta.time_to_first_token.or(current.time_to_first_token);
    let time_to_response = delta.time_to_response.or(current.time_to_response);

    let generation_delta = match (delta.time_to_response, time_to_first_token) {
        (Some(ttr), Some(ttft)) if ttr > ttft => ttr - ttft,
        _ => 0,
    };

    TokenUsage {
        prompt_tokens: current.prompt_tokens.saturating_add(delta.prompt_tokens),
        completion_tokens: current.completion_tokens.saturating_add(delta.completion_tokens),
        total_tokens: current.total_tokens.saturating_add(delta.total_tokens),
        cached_tokens: current.cached_tokens.saturating_add(delta.cached_tokens),
        time_to_first_token,
        time_to_response,
        total_generation_ms: current.total_generation_ms.saturating_add(generation_delta),
    }
}

/// Sum two already-accumulated snapshots, e.g. a resumed message's earlier
/// usage and the continuation's.
pub fn combine(earlier: &TokenUsage, later: &TokenUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: earlier.prompt_tokens.saturating_add(later.prompt_tokens),
        completion_tokens: earlier.completion_tokens.saturating_add(later.completion_tokens),
        total_tokens: earlier.total_tokens.saturating_add(later.total_tokens),
        cached_tokens: earlier.cached_tokens.saturating_add(later.cached_tokens),
        time_to_first_token: later.time_to_first_token.or(earlier.time_to_first_token),
        time_to_response: later.time_to_response.or(earlier.time_to_response),
        total_generation_ms: earlier
            .total_generation_ms
            .saturating_add(later.total_generation_ms),
    }
}

/// Session-wide usage for display: every finalized assistant message plus the
/// in-flight turn.
pub fn aggregate(messages: &[ChatMessage], current: Option<&TokenUsage>) -> TokenUsage {
    let finalized = messages
        .iter()
        .filter(|message| message.is_assistant())
        .filter_map(|message| message.usage.as_ref())
        .fold(empty(), |acc, usage| combine(&acc, usage));

    match current {
        Some(current) => combine(&finalized, current),
        None => finalized,
    }
}

/// Limits display recomputation to one tick per interval.
#[derive(Debug, Clone)]
pub struct UsageThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl UsageThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnwise_core_types::MessageRole;

    fn timing(ttft: Option<u64>, ttr: Option<u64>) -> TokenUsage {
        TokenUsage {
            time_to_first_token: ttft,
            time_to_response: ttr,
            ..Default::default()
        }
    }

    #[test]
    fn merge_sums_counters() {
        let usage = merge(
            &TokenUsage::counters(10, 2, 12, 1),
            &TokenUsage::counters(0, 5, 5, 0),
        );
        assert_eq!(usage, TokenUsage::counters(10, 7, 17, 1));
    }

    #[test]
    fn merge_derives_generation_time_from_consistent_pair() {
        let usage = merge(&empty(), &timing(Some(300), None));
        assert_eq!(usage.total_generation_ms, 0);

        let usage = merge(&usage, &timing(None, Some(1_300)));
        assert_eq!(usage.time_to_first_token, Some(300));
        assert_eq!(usage.time_to_response, Some(1_300));
        assert_eq!(usage.total_generation_ms, 1_000);
    }

    #[test]
    fn merge_skips_inconsistent_timing() {
        let usage = merge(&timing(Some(500), None), &timing(None, Some(200)));
        assert_eq!(usage.time_to_response, Some(200));
        assert_eq!(usage.total_generation_ms, 0);
    }

    #[test]
    fn counter_only_delta_keeps_timing() {
        let usage = merge(&timing(Some(40), Some(90)), &TokenUsage::counters(1, 1, 2, 0));
        assert_eq!(usage.time_to_first_token, Some(40));
        assert_eq!(usage.time_to_response, Some(90));
    }

    #[test]
    fn aggregate_includes_in_flight_usage() {
        let mut done = ChatMessage::streaming_assistant("a1", 0);
        done.streaming = false;
        done.usage = Some(TokenUsage::counters(10, 5, 15, 0));
        let user = ChatMessage {
            usage: Some(TokenUsage::counters(100, 100, 200, 0)),
            ..ChatMessage::user("u1", "hi", 0)
        };
        assert_eq!(user.role, MessageRole::User);

        let total = aggregate(&[user, done], Some(&TokenUsage::counters(3, 1, 4, 0)));
        assert_eq!(total, TokenUsage::counters(13, 6, 19, 0));
    }

    #[test]
    fn throttle_allows_one_tick_per_interval() {
        let mut throttle = UsageThrottle::new(Duration::from_millis(200));
        let start = Instant::now();
        assert!(throttle.should_emit(start));
        assert!(!throttle.should_emit(start + Duration::from_millis(50)));
        assert!(!throttle.should_emit(start + Duration::from_millis(199)));
        assert!(throttle.should_emit(start + Duration::from_millis(200)));

        throttle.reset();
        assert!(throttle.should_emit(start + Duration::from_millis(201)));
    }
}
