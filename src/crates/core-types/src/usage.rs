use serde::{Deserialize, Deserializer, Serialize};

/// Token and latency accounting for one assistant response.
///
/// Counters only grow within a turn. Timing fields are last-value-wins.
/// `total_generation_ms` is derived and never read from the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default, alias = "prompt_tokens", deserialize_with = "null_as_zero")]
    pub prompt_tokens: u64,
    #[serde(default, alias = "completion_tokens", deserialize_with = "null_as_zero")]
    pub completion_tokens: u64,
    #[serde(default, alias = "total_tokens", deserialize_with = "null_as_zero")]
    pub total_tokens: u64,
    #[serde(default, alias = "cached_tokens", deserialize_with = "null_as_zero")]
    pub cached_tokens: u64,
    #[serde(default, alias = "time_to_first_token", alias = "ttft_ms")]
    pub time_to_first_token: Option<u64>,
    #[serde(default, alias = "time_to_response", alias = "ttr_ms")]
    pub time_to_response: Option<u64>,
    #[serde(default, skip_deserializing)]
    pub total_generation_ms: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Counter-only delta, as carried by a `token_usage` event.
    pub fn counters(prompt: u64, completion: u64, total: u64, cached: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            cached_tokens: cached,
            ..Default::default()
        }
    }
}

/// Which model call produced a usage report. Only `Main` is accounted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    #[default]
    Main,
    TurnCheck,
    #[serde(other)]
    Other,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}
