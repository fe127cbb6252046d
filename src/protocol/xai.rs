//! xAI upstream decoding and usage correction.
//!
//! xAI reports `completion_tokens` including reasoning tokens, while the
//! canonical schema accounts reasoning separately; every provider-supplied
//! usage therefore gets `completion_tokens = total_tokens - prompt_tokens`.

use crate::error::RelayError;
use crate::protocol::openai_chat::{
    ChatCompletionChunk, ChatCompletionResponse, CompletionTokensDetails, Usage,
};

/// One decoded upstream streaming frame.
pub type XaiStreamChunk = ChatCompletionChunk;

/// The decoded upstream non-streaming document.
pub type XaiChatResponse = ChatCompletionResponse;

/// Decode one SSE `data:` payload into a stream chunk.
///
/// # Errors
///
/// Returns [`RelayError::FrameDecode`] when the payload is not a JSON chunk.
pub fn decode_stream_frame(data: &str) -> Result<XaiStreamChunk, RelayError> {
    serde_json::from_str(data).map_err(|e| RelayError::FrameDecode(e.to_string()))
}

/// Decode a complete non-streaming response body.
///
/// # Errors
///
/// Returns [`RelayError::BadResponseBody`] when the body is not a valid
/// chat completion document.
pub fn decode_response(body: &[u8]) -> Result<XaiChatResponse, RelayError> {
    serde_json::from_slice(body).map_err(|e| RelayError::BadResponseBody(e.to_string()))
}

/// Canonical completion count derived from prompt and total.
#[inline]
#[must_use]
pub fn derived_completion_tokens(prompt_tokens: i64, total_tokens: i64) -> i64 {
    total_tokens.wrapping_sub(prompt_tokens)
}

/// Rewrite a buffered usage block in place.
///
/// `text_tokens` becomes `completion_tokens - reasoning_tokens`; negative
/// results are kept as-is.
pub fn correct_buffered_usage(usage: &mut Usage) {
    usage.completion_tokens = derived_completion_tokens(usage.prompt_tokens, usage.total_tokens);
    let details = usage
        .completion_tokens_details
        .get_or_insert_with(CompletionTokensDetails::default);
    details.text_tokens = usage
        .completion_tokens
        .wrapping_sub(details.reasoning_tokens);
}

/// Convert a decoded upstream chunk into the canonical chunk.
///
/// `completion_tokens` is the reconciler's current value and only replaces
/// the upstream count when the chunk itself carries usage.
#[must_use]
pub fn stream_chunk_to_openai(
    mut chunk: XaiStreamChunk,
    completion_tokens: i64,
) -> ChatCompletionChunk {
    if let Some(usage) = chunk.usage.as_mut() {
        usage.completion_tokens = completion_tokens;
    }
    chunk
}

/// Convert a decoded upstream response into the canonical response.
#[must_use]
pub fn response_to_openai(mut response: XaiChatResponse) -> ChatCompletionResponse {
    if let Some(usage) = response.usage.as_mut() {
        correct_buffered_usage(usage);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_stream_frame_with_usage() {
        let chunk = decode_stream_frame(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"grok-3","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":40,"total_tokens":25}}"#,
        )
        .unwrap();
        let usage = chunk.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 25);
    }

    #[test]
    fn test_decode_stream_frame_rejects_garbage() {
        let err = decode_stream_frame("{\"id\":").unwrap_err();
        assert!(matches!(err, RelayError::FrameDecode(_)));
    }

    #[test]
    fn test_decode_response_rejects_truncated_body() {
        let err = decode_response(br#"{"id":"x","choices":["#).unwrap_err();
        assert!(matches!(err, RelayError::BadResponseBody(_)));
    }

    #[test]
    fn test_correct_buffered_usage_scenario() {
        let mut usage: Usage = serde_json::from_value(json!({
            "prompt_tokens": 5,
            "completion_tokens": 18,
            "total_tokens": 20,
            "completion_tokens_details": {"reasoning_tokens": 3}
        }))
        .unwrap();
        correct_buffered_usage(&mut usage);
        assert_eq!(usage.completion_tokens, 15);
        let details = usage.completion_tokens_details.unwrap();
        assert_eq!(details.reasoning_tokens, 3);
        assert_eq!(details.text_tokens, 12);
    }

    #[test]
    fn test_correct_buffered_usage_keeps_negative_text_tokens() {
        let mut usage = Usage::from_counts(10, 0, 12);
        usage.completion_tokens_details = Some(CompletionTokensDetails {
            reasoning_tokens: 5,
            ..CompletionTokensDetails::default()
        });
        correct_buffered_usage(&mut usage);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.completion_tokens_details.unwrap().text_tokens, -3);
    }

    #[test]
    fn test_correct_buffered_usage_without_details() {
        let mut usage = Usage::from_counts(4, 99, 9);
        correct_buffered_usage(&mut usage);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.completion_tokens_details.unwrap().text_tokens, 5);
    }

    #[test]
    fn test_stream_chunk_without_usage_is_untouched() {
        let chunk = decode_stream_frame(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"grok-3","choices":[{"index":0,"delta":{"content":"hey"}}]}"#,
        )
        .unwrap();
        let out = stream_chunk_to_openai(chunk, 77);
        assert!(out.usage.is_none());
        assert_eq!(out.choices[0].delta.content.as_deref(), Some("hey"));
    }

    #[test]
    fn test_response_without_usage_passes_through() {
        let response = decode_response(
            br#"{"id":"x","object":"chat.completion","created":1,"model":"grok-3","choices":[]}"#,
        )
        .unwrap();
        let out = response_to_openai(response);
        assert!(out.usage.is_none());
    }

    #[test]
    fn test_correct_buffered_usage_at_integer_bounds() {
        for (prompt, total, reasoning) in [
            (i64::MAX, 0, i64::MAX),
            (0, i64::MAX, 0),
            (i64::MAX, i64::MAX, i64::MAX),
            (0, 0, i64::MAX),
        ] {
            let mut usage = Usage::from_counts(prompt, 0, total);
            usage.completion_tokens_details = Some(CompletionTokensDetails {
                reasoning_tokens: reasoning,
                ..CompletionTokensDetails::default()
            });
            correct_buffered_usage(&mut usage);
            let completion = total.wrapping_sub(prompt);
            assert_eq!(usage.completion_tokens, completion);
            assert_eq!(
                usage.completion_tokens_details.unwrap().text_tokens,
                completion.wrapping_sub(reasoning)
            );
        }
    }

    #[test]
    fn test_decode_tolerates_null_choices_and_role() {
        let chunk = decode_stream_frame(
            r#"{"choices":null,"usage":{"prompt_tokens":10,"completion_tokens":3,"total_tokens":25}}"#,
        )
        .unwrap();
        assert_eq!(chunk.usage.unwrap().prompt_tokens, 10);

        let response = decode_response(
            br#"{"id":"x","choices":[{"index":0,"message":{"role":null,"content":"ok"}}],"usage":{"prompt_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(response_to_openai(response).usage.unwrap().completion_tokens, 3);
    }
}
