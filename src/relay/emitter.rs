use std::convert::Infallible;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::protocol::openai_chat::ChatCompletionChunk;
use crate::stream::{encode_data_frame, DONE_FRAME};

/// Create a bounded outbound SSE channel.
///
/// The emitter half is driven by the streaming pipeline; the body half
/// becomes the client response body. Dropping the body (client disconnect)
/// makes every later send fail.
#[must_use]
pub fn sse_channel(capacity: usize) -> (SseEmitter, SseBody) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SseEmitter { tx }, SseBody { rx })
}

/// Writes canonical chunks to the client, one SSE event per chunk.
#[derive(Debug, Clone)]
pub struct SseEmitter {
    tx: mpsc::Sender<Bytes>,
}

impl SseEmitter {
    /// Serialize and send one chunk immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Emission`] when the chunk cannot be encoded or
    /// the client has gone away.
    pub async fn send_chunk(&self, chunk: &ChatCompletionChunk) -> Result<(), RelayError> {
        let json = serde_json::to_vec(chunk)
            .map_err(|e| RelayError::Emission(format!("failed to encode chunk: {e}")))?;
        self.send_frame(encode_data_frame(&json)).await
    }

    /// Send the terminal `[DONE]` sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Emission`] when the client has gone away.
    pub async fn send_done(&self) -> Result<(), RelayError> {
        self.send_frame(Bytes::from_static(DONE_FRAME)).await
    }

    async fn send_frame(&self, frame: Bytes) -> Result<(), RelayError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RelayError::Emission("client disconnected".to_string()))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the outbound SSE channel.
#[derive(Debug)]
pub struct SseBody {
    rx: mpsc::Receiver<Bytes>,
}

impl SseBody {
    /// Receive the next encoded frame, `None` once the emitter is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Build the `200 OK` event-stream response around this body.
    #[must_use]
    pub fn into_response(self) -> Response {
        let frames = futures_util::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
        });
        let mut response = Response::new(Body::from_stream(frames));
        *response.status_mut() = http::StatusCode::OK;
        set_event_stream_headers(response.headers_mut());
        response
    }
}

/// Headers for an SSE response.
pub fn set_event_stream_headers(headers: &mut http::HeaderMap) {
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert("x-accel-buffering", http::HeaderValue::from_static("no"));
}
