use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub mod error_codes {
    /// The client exhausted its requests for the current window (429).
    pub const RATE_LIMITED: &str = "rate_limited";
    /// The request carried more tokens than allowed (400).
    pub const TOO_MANY_TOKENS: &str = "too_many_tokens";
    /// The service is draining and no longer accepts work (503).
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
    /// Anything not attributable to the request (500).
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Request-level error body: `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(error_codes::SERVICE_UNAVAILABLE, "Service is shutting down")
    }

    pub fn status(&self) -> StatusCode {
        use error_codes::*;

        match self.code.as_str() {
            RATE_LIMITED => StatusCode::TOO_MANY_REQUESTS,
            TOO_MANY_TOKENS => StatusCode::BAD_REQUEST,
            SERVICE_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<tokengate::Error> for ApiError {
    fn from(err: tokengate::Error) -> Self {
        match &err {
            tokengate::Error::RateLimited => Self::new(
                error_codes::RATE_LIMITED,
                "Too many requests, please try again later",
            ),
            tokengate::Error::BatchTooLarge { max, .. } => Self::new(
                error_codes::TOO_MANY_TOKENS,
                format!("At most {max} tokens can be checked per request"),
            ),
            tokengate::Error::InvalidConfig { .. } => {
                Self::new(error_codes::INTERNAL_ERROR, err.to_string())
            }
        }
    }
}
