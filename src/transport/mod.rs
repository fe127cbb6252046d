use std::time::Duration;

use bytes::Bytes;
use http::header;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::RelayError;

/// Longest upstream error body echoed back to the client.
const MAX_UPSTREAM_ERROR_BYTES: usize = 1024;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the xAI upstream.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the pooled client from server settings and the upstream proxy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(server: &ServerConfig, proxy: Option<&str>) -> Result<Self, RelayError> {
        let pool_idle_timeout = match server.http_pool_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host,
            pool_idle_timeout,
            Duration::from_secs(server.timeout),
            proxy,
        )?;
        Ok(Self { client })
    }

    /// POST a chat completion body to the upstream.
    ///
    /// Only 2xx responses are returned; anything else is read and turned into
    /// [`RelayError::Upstream`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent and
    /// [`RelayError::Upstream`] for non-success statuses.
    pub async fn send_chat_completion(
        &self,
        upstream: &UpstreamConfig,
        body: Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let url = upstream.chat_completions_url();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&upstream.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RelayError::Transport(format!("upstream request timed out: {url}"))
                } else {
                    RelayError::Transport(format!("upstream request failed: {err}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        Err(RelayError::Upstream {
            status: status.as_u16(),
            message: upstream_error_message(&body),
        })
    }
}

/// Pull a readable message out of an upstream error body.
///
/// Prefers `error.message` (or a string `error`) from a JSON body and falls
/// back to the raw text, truncated on a char boundary.
fn upstream_error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = value
            .pointer("/error/message")
            .and_then(serde_json::Value::as_str)
            .or_else(|| value.get("error").and_then(serde_json::Value::as_str));
        if let Some(message) = message {
            return truncate(message, MAX_UPSTREAM_ERROR_BYTES);
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "empty upstream error body".to_string()
    } else {
        truncate(text, MAX_UPSTREAM_ERROR_BYTES)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_message_prefers_json_message() {
        let body = br#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        assert_eq!(upstream_error_message(body), "model not found");
        assert_eq!(upstream_error_message(br#"{"error":"quota"}"#), "quota");
    }

    #[test]
    fn test_upstream_error_message_falls_back_to_text() {
        assert_eq!(upstream_error_message(b"  bad gateway \n"), "bad gateway");
        assert_eq!(upstream_error_message(b""), "empty upstream error body");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(600);
        let out = truncate(&text, MAX_UPSTREAM_ERROR_BYTES);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_UPSTREAM_ERROR_BYTES + 3);
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let err = HttpTransport::new(&ServerConfig::default(), Some("ftp://proxy.local:21"))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
