//! Console-originated error responses
//!
//! Upstream errors are forwarded with their own status and body. Errors the
//! console raises itself use one JSON shape:
//!
//! ```json
//! {"message":"...","error":{"type":"console_error","message":"...","request_id":"req_..."}}
//! ```
//!
//! The top-level `message` matches what the upstream API sends, so clients
//! read both kinds of failure the same way.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Per-request failures raised by the console itself.
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream timeout after {0}s")]
    UpstreamTimeout(u64),

    #[error("{0}")]
    Internal(String),
}

impl ConsoleError {
    pub fn status(&self) -> StatusCode {
        match self {
            ConsoleError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ConsoleError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ConsoleError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ConsoleError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ConsoleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for `console_upstream_errors_total`, if this is an upstream
    /// failure.
    pub fn upstream_error_type(&self) -> Option<&'static str> {
        match self {
            ConsoleError::UpstreamUnavailable(_) => Some("connection"),
            ConsoleError::UpstreamTimeout(_) => Some("timeout"),
            _ => None,
        }
    }

    pub fn into_response_with_id(self, request_id: &str) -> Response {
        if let Some(error_type) = self.upstream_error_type() {
            crate::metrics::record_upstream_error(error_type);
        }
        error_response(self.status(), &self.to_string(), request_id)
    }
}

/// Map a member-api failure onto the console's own error.
///
/// Only transport failures arrive here; upstream status errors are
/// forwarded by the caller before this is reached.
pub fn from_upstream(err: &member_api::Error, timeout_secs: u64) -> ConsoleError {
    match err {
        member_api::Error::Timeout(_) => ConsoleError::UpstreamTimeout(timeout_secs),
        member_api::Error::Http(msg) => ConsoleError::UpstreamUnavailable(msg.clone()),
        other => ConsoleError::Internal(other.to_string()),
    }
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "message": message,
        "error": {
            "type": "console_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
