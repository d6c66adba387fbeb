//! Per-request spans.
//!
//! Each proxied request (and each WebSocket session it turns into) runs inside
//! a span carrying a fresh UUID so interleaved retry loops can be told apart
//! in the logs.

use axum::http::Method;
use tracing::Span;
use uuid::Uuid;

/// Generate a request ID.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span for one inbound request.
pub fn request_span(request_id: &str, method: &Method, path: &str) -> Span {
    tracing::info_span!("request", request_id = %request_id, method = %method, path = %path)
}
