use serde_json::json;

/// Error type shared by the relay pipelines and the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Bad response body: {0}")]
    BadResponseBody(String),
    #[error("Frame decode error: {0}")]
    FrameDecode(String),
    #[error("Emission error: {0}")]
    Emission(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable failure kind carried in error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Config,
    InvalidRequest,
    Upstream,
    Transport,
    BadResponseBody,
    FrameDecode,
    Emission,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Config => "config_error",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Upstream => "upstream_error",
            ErrorCode::Transport => "transport_error",
            ErrorCode::BadResponseBody => "bad_response_body",
            ErrorCode::FrameDecode => "frame_decode_error",
            ErrorCode::Emission => "emission_error",
            ErrorCode::Internal => "internal_error",
        }
    }
}

impl RelayError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Config(_) => ErrorCode::Config,
            RelayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RelayError::Upstream { .. } => ErrorCode::Upstream,
            RelayError::Transport(_) => ErrorCode::Transport,
            RelayError::BadResponseBody(_) => ErrorCode::BadResponseBody,
            RelayError::FrameDecode(_) => ErrorCode::FrameDecode,
            RelayError::Emission(_) => ErrorCode::Emission,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }

    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        match self {
            RelayError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            RelayError::Upstream { status, .. } => http::StatusCode::from_u16(*status)
                .ok()
                .filter(|status| status.is_client_error() || status.is_server_error())
                .unwrap_or(http::StatusCode::BAD_GATEWAY),
            RelayError::Transport(_) | RelayError::BadResponseBody(_) => {
                http::StatusCode::BAD_GATEWAY
            }
            RelayError::Config(_)
            | RelayError::FrameDecode(_)
            | RelayError::Emission(_)
            | RelayError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Format an error as an OpenAI-style `(status, body)` pair.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let status = err.status();
    let error_type = if status.is_client_error() {
        "invalid_request_error"
    } else {
        "api_error"
    };
    let body = json!({
        "error": {
            "message": err.to_string(),
            "type": error_type,
            "code": err.code().as_str(),
        }
    });
    (status, body)
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_response_body_is_gateway_error() {
        let err = RelayError::BadResponseBody("unexpected EOF".to_string());
        assert_eq!(err.code(), ErrorCode::BadResponseBody);
        assert_eq!(err.status(), http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_stream_local_error_codes() {
        assert_eq!(
            RelayError::FrameDecode("x".to_string()).code().as_str(),
            "frame_decode_error"
        );
        assert_eq!(
            RelayError::Emission("x".to_string()).code().as_str(),
            "emission_error"
        );
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = RelayError::Upstream {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(err.status(), http::StatusCode::TOO_MANY_REQUESTS);

        let odd = RelayError::Upstream {
            status: 302,
            message: String::new(),
        };
        assert_eq!(odd.status(), http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_format_error_payload_shape() {
        let err = RelayError::InvalidRequest("body is not JSON".to_string());
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], "invalid_request");
        assert!(body["error"]["message"]
            .as_str()
            .is_some_and(|m| m.contains("body is not JSON")));
    }
}
