//! Request capture.
//!
//! # Responsibilities
//! - Buffer the inbound request once into an immutable [`ProxyRequest`]
//! - Enforce the body size limit while buffering
//! - Resolve the client address for logging
//!
//! # Design Decisions
//! - The captured request is replayed on every retry attempt, so nothing in
//!   it is ever mutated after capture
//! - Header and body buffers are cheap to clone (`Bytes`, shared header values)

use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request};
use http_body_util::LengthLimitError;
use thiserror::Error;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Failure to buffer the inbound request.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),
}

/// A fully buffered inbound request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers,
            body,
        }
    }

    /// Buffer an axum request, reading at most `limit` body bytes.
    pub async fn capture(request: Request<Body>, limit: usize) -> Result<Self, CaptureError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let body = axum::body::to_bytes(body, limit).await.map_err(|e| {
            if is_length_limit(&e) {
                CaptureError::TooLarge { limit }
            } else {
                CaptureError::Body(e)
            }
        })?;

        Ok(Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Best-effort client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the TCP peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first) = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn capture_keeps_method_path_headers_and_body() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/chat/completions?stream=true")
            .header("authorization", "Bearer abc")
            .body(Body::from("{\"prompt\":\"hi\"}"))
            .unwrap();

        let captured = ProxyRequest::capture(request, 1024).await.unwrap();
        assert_eq!(captured.method(), Method::POST);
        assert_eq!(captured.path_and_query(), "/v1/chat/completions?stream=true");
        assert_eq!(captured.headers()["authorization"], "Bearer abc");
        assert_eq!(captured.body().as_ref(), b"{\"prompt\":\"hi\"}");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let request = Request::builder()
            .uri("/upload")
            .body(Body::from(vec![0u8; 64]))
            .unwrap();

        assert!(matches!(
            ProxyRequest::capture(request, 16).await,
            Err(CaptureError::TooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn stream_errors_are_not_mistaken_for_the_size_limit() {
        let failing = futures_util::stream::iter(vec![Err::<Bytes, std::io::Error>(
            std::io::Error::other("length limit reached upstream"),
        )]);
        let request = Request::builder()
            .uri("/upload")
            .body(Body::from_stream(failing))
            .unwrap();

        assert!(matches!(
            ProxyRequest::capture(request, 1024).await,
            Err(CaptureError::Body(_))
        ));
    }

    #[test]
    fn client_address_prefers_forwarded_headers() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_address(&headers, Some(peer)), "10.0.0.9");
        assert_eq!(client_address(&headers, None), "unknown");

        headers.insert(X_REAL_IP, HeaderValue::from_static("192.168.1.2"));
        assert_eq!(client_address(&headers, Some(peer)), "192.168.1.2");

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_address(&headers, Some(peer)), "203.0.113.7");
    }
}
