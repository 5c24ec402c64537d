use serde::Deserialize;
use serde_json::Value;
use turnwise_core_types::{TokenUsage, ToolExecutionUpdate, UsageSource};

#[derive(Debug, Deserialize)]
pub(crate) struct ReadyPayload {
    #[serde(alias = "runId")]
    pub run_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PendingToolsPayload {
    #[serde(alias = "tools")]
    pub executions: Vec<ToolExecutionUpdate>,
}

/// `token` data is sent as raw text by some servers and as `{"text": ...}` by others.
pub(crate) fn token_text(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => data.to_string(),
        },
        Ok(Value::String(text)) => text,
        _ => data.to_string(),
    }
}

/// Usage comes either nested (`{"usage": {...}, "source": "main"}`) or flat
/// (`{"prompt_tokens": 1, ..., "source": "main"}`).
pub(crate) fn usage_report(value: Value) -> serde_json::Result<(TokenUsage, UsageSource)> {
    let source = match value.get("source") {
        Some(Value::Null) | None => UsageSource::Main,
        Some(source) => serde_json::from_value(source.clone())?,
    };
    let usage = match value.get("usage") {
        Some(nested @ Value::Object(_)) => serde_json::from_value(nested.clone())?,
        _ => serde_json::from_value(value)?,
    };
    Ok((usage, source))
}

/// Milliseconds from the first of `keys` present as a non-negative number.
pub(crate) fn millis(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| {
        let field = value.get(*key)?;
        field
            .as_u64()
            .or_else(|| field.as_f64().filter(|ms| *ms >= 0.0).map(|ms| ms.round() as u64))
    })
}

pub(crate) fn error_message(value: &Value) -> Option<String> {
    ["message", "error"].iter().find_map(|key| match value.get(*key) {
        Some(Value::String(message)) if !message.is_empty() => Some(message.clone()),
        Some(Value::Object(inner)) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_text_accepts_raw_and_json() {
        assert_eq!(token_text("Hello "), "Hello ");
        assert_eq!(token_text(r#"{"text":"world","run_id":"r"}"#), "world");
        assert_eq!(token_text(r#""quoted""#), "quoted");
        // Numbers are literal text, not JSON scalars to reinterpret.
        assert_eq!(token_text("42"), "42");
    }

    #[test]
    fn usage_report_reads_nested_and_flat_shapes() {
        let (usage, source) = usage_report(json!({
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12},
            "source": "main"
        }))
        .unwrap();
        assert_eq!(usage.total_tokens, 12);
        assert_eq!(source, UsageSource::Main);

        let (usage, source) = usage_report(json!({
            "prompt_tokens": 5,
            "completion_tokens": 1,
            "total_tokens": 6,
            "cached_tokens": null,
            "source": "turn_check",
            "model": "gpt"
        }))
        .unwrap();
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(source, UsageSource::TurnCheck);
    }

    #[test]
    fn millis_prefers_first_key_and_rounds_floats() {
        let value = json!({"duration": 12.6});
        assert_eq!(millis(&value, &["duration_ms", "duration"]), Some(13));
        assert_eq!(millis(&json!({"duration_ms": 0}), &["duration_ms"]), Some(0));
        assert_eq!(millis(&json!({}), &["duration_ms"]), None);
    }

    #[test]
    fn error_message_reads_either_key() {
        assert_eq!(
            error_message(&json!({"message": "boom"})).as_deref(),
            Some("boom")
        );
        assert_eq!(
            error_message(&json!({"error": "bad", "status": "error"})).as_deref(),
            Some("bad")
        );
        assert_eq!(
            error_message(&json!({"error": {"message": "nested"}})).as_deref(),
            Some("nested")
        );
        assert_eq!(error_message(&json!({})), None);
    }
}
