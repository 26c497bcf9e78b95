//! Error response rendering for the access middleware.
//!
//! Every rejection is rendered as the same JSON body:
//!
//! ```json
//! { "code": "compliance_gdpr", "message": "GDPR requires X-DPA-Version", "trace_id": "..." }
//! ```
//!
//! Server-side failures carry a generic message; the detail stays in the logs.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::AccessError;
use crate::headers;

/// `X-RateLimit-Limit` response header.
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// `X-RateLimit-Remaining` response header.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// JSON body of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message, safe to show to the client.
    pub message: String,
    /// Request trace identifier, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ErrorBody {
    /// Builds the body for `error`.
    #[must_use]
    pub fn from_error(error: &AccessError, trace_id: Option<&str>) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.public_message(),
            trace_id: trace_id.map(str::to_string),
        }
    }
}

/// Renders `error` as an HTTP response.
#[must_use]
pub fn error_response(error: &AccessError, trace_id: Option<&str>) -> Response {
    let status = error.status_code();
    let mut response_headers = HeaderMap::new();

    match error {
        AccessError::RateLimited { limit, retry_after } => {
            // Round up so clients never retry before the window frees a slot.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response_headers.insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
            response_headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(*limit));
            response_headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(0u32));
        }
        AccessError::Unauthenticated { .. } => {
            response_headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        _ => {}
    }

    if let Some(trace_id) = trace_id
        && let Ok(value) = HeaderValue::from_str(trace_id)
    {
        response_headers.insert(headers::REQUEST_ID, value);
    }

    (status, response_headers, Json(ErrorBody::from_error(error, trace_id))).into_response()
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        error_response(&self, None)
    }
}

/// Response for a request whose handler panicked.
#[must_use]
pub fn panic_response(trace_id: &str) -> Response {
    error_response(
        &AccessError::internal("request handler panicked"),
        Some(trace_id),
    )
}
