//! xAI → `OpenAI` response relay: mode dispatch, usage reconciliation and
//! outbound emission.

pub mod buffered;
pub mod emitter;
pub mod streaming;
pub mod upstream;
pub mod usage;

use std::sync::Arc;
use std::time::Instant;

use axum::response::Response;

use crate::error::RelayError;
use crate::observability::log_request_complete;
use crate::observability::token_counter::TokenEstimator;

pub use buffered::{buffered_handler, BufferedReply};
pub use emitter::{sse_channel, SseBody, SseEmitter};
pub use streaming::stream_handler;
pub use upstream::UpstreamConnection;
pub use usage::{
    FinalUsage, TextAccumulator, UsageReconciler, UsageSource, TOOL_CALL_TOKEN_OVERHEAD,
};

/// Which pipeline a request runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Streaming,
    Buffered,
}

impl RelayMode {
    #[must_use]
    pub fn from_stream_flag(stream: bool) -> Self {
        if stream {
            RelayMode::Streaming
        } else {
            RelayMode::Buffered
        }
    }
}

/// Per-request facts the pipelines need.
#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub request_id: String,
    pub upstream_model: String,
    /// Prompt tokens known from the request, used by the estimated regime.
    pub prompt_tokens: i64,
    pub mode: RelayMode,
    pub started_at: Instant,
}

impl RelayInfo {
    #[must_use]
    pub fn new(upstream_model: impl Into<String>, prompt_tokens: i64, mode: RelayMode) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            upstream_model: upstream_model.into(),
            prompt_tokens,
            mode,
            started_at: Instant::now(),
        }
    }
}

/// Run the pipeline matching `info.mode` and build the client response.
///
/// Buffered requests are relayed before returning. Streaming requests return
/// the event-stream response immediately while a spawned task drives the
/// upstream frames into it; the final usage is logged when that task ends.
///
/// # Errors
///
/// Returns [`RelayError::BadResponseBody`] when a buffered body cannot be
/// read or decoded. Streaming never fails here.
pub async fn dispatch(
    info: RelayInfo,
    conn: UpstreamConnection,
    estimator: Arc<dyn TokenEstimator>,
    channel_capacity: usize,
) -> Result<Response, RelayError> {
    match info.mode {
        RelayMode::Buffered => {
            let (reply, usage) = buffered_handler(&info, conn).await?;
            match usage {
                Some(usage) => log_request_complete(
                    &info.request_id,
                    &info.upstream_model,
                    &usage,
                    UsageSource::Provider.as_str(),
                    info.started_at,
                ),
                None => tracing::warn!(
                    request_id = %info.request_id,
                    "upstream response carried no usage"
                ),
            }
            Ok(reply.into_response())
        }
        RelayMode::Streaming => {
            let (emitter, body) = sse_channel(channel_capacity);
            tokio::spawn(async move {
                let result = stream_handler(&info, conn, &emitter, estimator.as_ref()).await;
                log_request_complete(
                    &info.request_id,
                    &info.upstream_model,
                    &result.usage,
                    result.source.as_str(),
                    info.started_at,
                );
            });
            Ok(body.into_response())
        }
    }
}
