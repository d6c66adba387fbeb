//! Single forwarding attempt to the backend.
//!
//! # Responsibilities
//! - Build the outbound request from a captured [`ProxyRequest`]
//! - Apply the per-attempt connect and response-header timeouts
//! - Report every network failure as a [`ForwardError`]
//!
//! # Design Decisions
//! - Headers are cloned per attempt, never borrowed mutably from the capture
//! - `Host`, `Content-Length` and `Transfer-Encoding` describe the inbound
//!   hop and are recomputed by the client
//! - Redirects are passed through to the caller, never followed
//! - The response-header timeout is a ceiling; callers with a deadline of
//!   their own pass a smaller budget through [`RequestForwarder::forward_within`]

use std::time::Duration;

use axum::http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::HeaderMap;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::{TargetConfig, TimeoutConfig};
use crate::http::request::ProxyRequest;

/// Network-level failure of a forwarding attempt.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream did not send response headers within {0:?}")]
    TimedOut(Duration),
}

/// Performs one forwarding attempt per call.
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    client: reqwest::Client,
    base_url: String,
    response_timeout: Duration,
}

impl RequestForwarder {
    pub fn new(target: &TargetConfig, timeouts: &TimeoutConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base_url: target.normalized_base_url().to_string(),
            response_timeout: timeouts.response_headers(),
        })
    }

    /// Full upstream URL for a request path.
    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Send the request once and return the raw upstream response.
    pub async fn forward(&self, request: &ProxyRequest) -> Result<reqwest::Response, ForwardError> {
        self.forward_within(request, self.response_timeout).await
    }

    /// Like [`forward`](Self::forward), waiting for response headers no longer
    /// than `budget`.
    pub async fn forward_within(
        &self,
        request: &ProxyRequest,
        budget: Duration,
    ) -> Result<reqwest::Response, ForwardError> {
        let wait = self.response_timeout.min(budget);
        let url = self.target_url(request.path_and_query());

        let outbound = self
            .client
            .request(request.method().clone(), url)
            .headers(outbound_headers(request.headers()))
            .body(request.body().clone());

        match timeout(wait, outbound.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ForwardError::Transport(e)),
            Err(_) => Err(ForwardError::TimedOut(wait)),
        }
    }
}

/// Clone the captured headers minus the ones tied to the inbound connection.
pub fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut outbound = headers.clone();
    outbound.remove(HOST);
    outbound.remove(CONTENT_LENGTH);
    outbound.remove(TRANSFER_ENCODING);
    outbound
}
