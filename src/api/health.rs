use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "xai-relay is running",
        "config": {
            "upstream": config.upstream.base_url,
            "model_override": config.upstream.model_override,
            "features": {
                "log_level": config.features.log_level,
                "estimate_prompt_tokens": config.features.estimate_prompt_tokens,
            }
        }
    }))
}
