use axum::body::Body;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::error::RelayError;
use crate::protocol::openai_chat::Usage;
use crate::protocol::xai::{decode_response, response_to_openai};

use super::upstream::UpstreamConnection;
use super::RelayInfo;

/// A fully corrected non-streaming reply, ready to write to the client.
#[derive(Debug, Clone)]
pub struct BufferedReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedReply {
    #[must_use]
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Relay a non-streaming upstream response.
///
/// The body is read once, decoded, usage-corrected and re-encoded. Any read,
/// decode or encode failure is fatal and yields
/// [`RelayError::BadResponseBody`]; the connection is released either way.
///
/// # Errors
///
/// Returns [`RelayError::BadResponseBody`] when the body cannot be read or is
/// not a chat completion document.
pub async fn buffered_handler(
    info: &RelayInfo,
    mut conn: UpstreamConnection,
) -> Result<(BufferedReply, Option<Usage>), RelayError> {
    let mut raw = BytesMut::new();
    while let Some(chunk) = conn.next().await {
        let chunk = chunk.map_err(|e| {
            RelayError::BadResponseBody(format!("failed to read upstream body: {e}"))
        })?;
        raw.extend_from_slice(&chunk);
    }

    let response = response_to_openai(decode_response(&raw)?);
    let body = serde_json::to_vec(&response)
        .map(Bytes::from)
        .map_err(|e| RelayError::BadResponseBody(e.to_string()))?;

    let reply = BufferedReply {
        status: conn.status(),
        headers: reply_headers(conn.headers(), body.len()),
        body,
    };
    conn.release();

    tracing::debug!(
        request_id = %info.request_id,
        body_len = reply.body.len(),
        "buffered response corrected"
    );
    Ok((reply, response.usage))
}

/// Copy upstream headers, dropping hop-by-hop and length headers, and set
/// `Content-Length` for the re-encoded body.
fn reply_headers(upstream: &HeaderMap, body_len: usize) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);
    for (name, value) in upstream {
        if is_dropped_header(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    headers
}

fn is_dropped_header(name: &header::HeaderName) -> bool {
    *name == header::CONTENT_LENGTH
        || *name == header::TRANSFER_ENCODING
        || *name == header::CONNECTION
        || *name == header::CONTENT_ENCODING
        || name.as_str() == "keep-alive"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayMode;
    use std::convert::Infallible;

    fn info() -> RelayInfo {
        RelayInfo::new("grok-3", 0, RelayMode::Buffered)
    }

    fn conn(headers: HeaderMap, body: &'static [u8]) -> UpstreamConnection {
        UpstreamConnection::new(
            StatusCode::OK,
            headers,
            futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(body))]),
        )
    }

    #[tokio::test]
    async fn test_content_length_matches_reencoded_body() {
        let mut upstream_headers = HeaderMap::new();
        upstream_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(9999_u32));
        upstream_headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream_headers.insert("x-request-id", HeaderValue::from_static("req-1"));

        let (reply, usage) = buffered_handler(
            &info(),
            conn(
                upstream_headers,
                br#"{"id":"x","object":"chat.completion","created":1,"model":"grok-3","choices":[],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":3}}"#,
            ),
        )
        .await
        .unwrap();

        assert_eq!(usage.unwrap().completion_tokens, 2);
        assert_eq!(
            reply.headers[header::CONTENT_LENGTH],
            reply.body.len().to_string().as_str()
        );
        assert!(!reply.headers.contains_key(header::TRANSFER_ENCODING));
        assert_eq!(reply.headers["x-request-id"], "req-1");
        assert_eq!(reply.headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_read_error_is_bad_response_body() {
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"id\":")),
            Err("connection reset"),
        ]);
        let upstream = UpstreamConnection::new(StatusCode::OK, HeaderMap::new(), body);
        let err = buffered_handler(&info(), upstream).await.unwrap_err();
        assert!(matches!(err, RelayError::BadResponseBody(_)));
    }
}
