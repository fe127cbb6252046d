use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::protocol::openai_chat::Usage;

/// Text-to-token estimation capability.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str, model: &str) -> i64;
}

/// Lightweight heuristic (`bytes / 4`) that avoids loading model BPE tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str, model: &str) -> i64 {
        estimate_tokens(text, model)
    }
}

/// Estimate the number of tokens in `text` for the given model.
#[must_use]
pub fn estimate_tokens(text: &str, _model: &str) -> i64 {
    i64::try_from(text.len().div_ceil(4)).unwrap_or(i64::MAX)
}

/// Estimate the prompt tokens of a raw chat completion request body.
///
/// Sums message text (string content or `text` parts) and serialized tool
/// definitions.
#[must_use]
pub fn estimate_prompt_tokens(
    request: &Value,
    model: &str,
    estimator: &dyn TokenEstimator,
) -> i64 {
    let mut total: i64 = 0;

    if let Some(messages) = request.get("messages").and_then(Value::as_array) {
        for message in messages {
            match message.get("content") {
                Some(Value::String(text)) => {
                    total = total.wrapping_add(estimator.estimate(text, model));
                }
                Some(Value::Array(parts)) => {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            total = total.wrapping_add(estimator.estimate(text, model));
                        }
                    }
                }
                _ => {}
            }
            if let Some(tool_calls) = message.get("tool_calls") {
                total = total.wrapping_add(estimator.estimate(&tool_calls.to_string(), model));
            }
        }
    }

    if let Some(tools) = request.get("tools").and_then(Value::as_array) {
        for tool in tools {
            total = total.wrapping_add(estimator.estimate(&tool.to_string(), model));
        }
    }

    total
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(
    request_id: &str,
    model: &str,
    usage: &Usage,
    usage_source: &str,
    duration: Duration,
) {
    info!(
        request_id = request_id,
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        usage_source = usage_source,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens_nonempty() {
        assert_eq!(estimate_tokens("Hello, world!", "grok-3"), 4);
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens("", "grok-3"), 0);
    }

    #[test]
    fn test_estimate_prompt_tokens_counts_text_parts_and_tools() {
        let request = json!({
            "model": "grok-3",
            "messages": [
                {"role": "system", "content": "abcd"},
                {"role": "user", "content": [
                    {"type": "text", "text": "abcdefgh"},
                    {"type": "image_url", "image_url": {"url": "https://x"}}
                ]}
            ],
            "tools": [{"type": "function", "function": {"name": "f"}}]
        });
        let tool_tokens = estimate_tokens(&request["tools"][0].to_string(), "grok-3");
        assert_eq!(
            estimate_prompt_tokens(&request, "grok-3", &HeuristicEstimator),
            1 + 2 + tool_tokens
        );
    }

    #[test]
    fn test_estimate_prompt_tokens_without_messages() {
        assert_eq!(
            estimate_prompt_tokens(&json!({"model": "grok-3"}), "grok-3", &HeuristicEstimator),
            0
        );
    }
}
