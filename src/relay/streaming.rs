use futures_util::StreamExt;

use crate::observability::token_counter::TokenEstimator;
use crate::protocol::xai::{decode_stream_frame, stream_chunk_to_openai};
use crate::stream::sse_frame_stream;

use super::emitter::SseEmitter;
use super::upstream::UpstreamConnection;
use super::usage::{FinalUsage, TextAccumulator, UsageReconciler};
use super::RelayInfo;

/// Relay a streaming upstream response to the client.
///
/// Each upstream frame is decoded, folded into the usage state, corrected and
/// emitted before the next frame is read. Undecodable frames are logged and
/// skipped. A failed emission means the client is gone: scanning stops and
/// the usage seen so far is returned. The connection is released on every
/// path before this function returns.
pub async fn stream_handler(
    info: &RelayInfo,
    mut conn: UpstreamConnection,
    emitter: &SseEmitter,
    estimator: &dyn TokenEstimator,
) -> FinalUsage {
    let mut reconciler = UsageReconciler::new();
    let mut text = TextAccumulator::new();

    {
        let frames = sse_frame_stream(&mut conn);
        let mut frames = std::pin::pin!(frames);
        while let Some(frame) = frames.next().await {
            let chunk = match decode_stream_frame(&frame.data) {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::error!(
                        request_id = %info.request_id,
                        "error unmarshalling stream response: {err}"
                    );
                    continue;
                }
            };

            reconciler.observe(chunk.usage.as_ref());
            text.push_chunk(&chunk);
            let chunk = stream_chunk_to_openai(chunk, reconciler.completion_tokens());

            if let Err(err) = emitter.send_chunk(&chunk).await {
                tracing::warn!(request_id = %info.request_id, "stopping stream: {err}");
                break;
            }
        }
    }

    let final_usage = reconciler.finish(
        &text,
        info.prompt_tokens,
        &info.upstream_model,
        estimator,
    );

    if !emitter.is_closed() {
        if let Err(err) = emitter.send_done().await {
            tracing::debug!(request_id = %info.request_id, "failed to send [DONE]: {err}");
        }
    }
    conn.release();
    final_usage
}
