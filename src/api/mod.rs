pub mod chat;
pub mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Build the relay's HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health::health_handler))
        .route("/v1/chat/completions", post(chat::handler))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT_BYTES))
        .with_state(state)
}
