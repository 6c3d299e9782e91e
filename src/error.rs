use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Crate-wide result alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Every way a proxied request can end without a body from the origin.
///
/// Each variant maps to one status code; the body is the short display text.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request carried no `url` query parameter
    #[error("Missing URL parameter")]
    MissingUrl,

    /// `url` did not parse, used a forbidden scheme, or pointed at a blocked host
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    /// Origin answered with a non-2xx status, passed through unchanged
    #[error("Stream provider returned {0}")]
    UpstreamStatus(StatusCode),

    /// Upstream fetch exceeded the configured timeout
    #[error("Proxy error: upstream timed out after {0}s")]
    UpstreamTimeout(u64),

    /// Connect, DNS or body-read failure talking to the origin
    #[error("Proxy error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Proxy error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingUrl | GatewayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamStatus(status) => *status,
            GatewayError::UpstreamTimeout(_)
            | GatewayError::Upstream(_)
            | GatewayError::Internal(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            GatewayError::Internal(msg) => error!("Gateway internal error: {}", msg),
            GatewayError::UpstreamTimeout(_) | GatewayError::Upstream(_) => {
                warn!("Upstream failure: {}", self)
            }
            _ => {}
        }
        (status, self.to_string()).into_response()
    }
}
