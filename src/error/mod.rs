use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded by rule '{rule}'")]
    RateLimitExceeded {
        rule: String,
        retry_after: Option<u64>,
    },

    #[error("Rate limiter backend error: {0}")]
    RateLimiterBackend(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::RateLimiterBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to external callers.
    ///
    /// Transport and internal causes stay in the logs only.
    pub fn client_message(&self) -> String {
        match self {
            ProxyError::RateLimitExceeded { .. } => "Too Many Requests".to_string(),
            ProxyError::UpstreamTimeout(_) => "Gateway Timeout".to_string(),
            ProxyError::CircuitOpen(_) => "Service Unavailable".to_string(),
            ProxyError::RateLimiterBackend(_) => "Service Unavailable".to_string(),
            ProxyError::Transport(_) => "Bad Gateway".to_string(),
            ProxyError::InvalidRequest(msg) => format!("Bad Request: {}", msg),
            ProxyError::Config(_) | ProxyError::Internal(_) | ProxyError::Io(_) => {
                "Internal Server Error".to_string()
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Rejections carry no body, only the status and the optional hint
        if let ProxyError::RateLimitExceeded { retry_after, .. } = &self {
            let mut response = status.into_response();
            if let Some(secs) = retry_after {
                response
                    .headers_mut()
                    .insert("Retry-After", HeaderValue::from(*secs));
            }
            return response;
        }

        let body = Json(json!({
            "error": self.client_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
