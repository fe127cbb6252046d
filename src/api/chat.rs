use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;

use crate::error::RelayError;
use crate::observability::token_counter::estimate_prompt_tokens;
use crate::relay::{dispatch, RelayInfo, RelayMode, UpstreamConnection};
use crate::state::AppState;

/// `POST /v1/chat/completions`.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match handler_inner(state, body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(code = err.code().as_str(), "chat completion failed: {err}");
            err.into_response()
        }
    }
}

async fn handler_inner(state: Arc<AppState>, body: Bytes) -> Result<Response, RelayError> {
    let mut request: Value = serde_json::from_slice(&body)
        .map_err(|e| RelayError::InvalidRequest(format!("request body is not valid JSON: {e}")))?;
    let Some(fields) = request.as_object_mut() else {
        return Err(RelayError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ));
    };

    if let Some(model) = state.config.upstream.model_override.as_deref() {
        fields.insert("model".to_string(), Value::String(model.to_string()));
    }
    let model = fields
        .get("model")
        .and_then(Value::as_str)
        .filter(|model| !model.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest("missing 'model'".to_string()))?
        .to_string();
    let mode = RelayMode::from_stream_flag(
        fields.get("stream").and_then(Value::as_bool).unwrap_or(false),
    );

    let prompt_tokens = if state.config.features.estimate_prompt_tokens {
        estimate_prompt_tokens(&request, &model, state.estimator.as_ref())
    } else {
        0
    };

    let upstream_body = serde_json::to_vec(&request)
        .map(Bytes::from)
        .map_err(|e| RelayError::Internal(format!("failed to encode upstream request: {e}")))?;
    let info = RelayInfo::new(model, prompt_tokens, mode);
    tracing::debug!(
        request_id = %info.request_id,
        model = %info.upstream_model,
        stream = mode == RelayMode::Streaming,
        prompt_tokens,
        "forwarding chat completion"
    );

    let response = state
        .transport
        .send_chat_completion(&state.config.upstream, upstream_body)
        .await?;

    dispatch(
        info,
        UpstreamConnection::from_reqwest(response),
        Arc::clone(&state.estimator),
        state.config.server.stream_channel_capacity,
    )
    .await
}
