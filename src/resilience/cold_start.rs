//! Cold start retry loop.
//!
//! Replays one captured request against the backend until it gives a real
//! answer, waking the backend on the first "absent" response of an episode.
//!
//! ```text
//! attempt → 502/530 → claim episode? → start() → sleep(interval) → attempt
//!         → 503     →                            sleep(interval) → attempt
//!         → other   → mark_ready → return response
//!         → network error → fail (500)
//! elapsed > start-time limit before an attempt → fail (504)
//! attempt still waiting for headers at the limit → fail (504)
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::http::forward::{ForwardError, RequestForwarder};
use crate::http::request::ProxyRequest;
use crate::lifecycle::BackendLifecycle;
use crate::observability::metrics;
use crate::resilience::retries::{RetryContext, UpstreamVerdict};

/// Terminal failure of the retry loop.
#[derive(Debug, Error)]
pub enum ColdStartError {
    #[error("backend did not become ready within {limit:?} ({attempts} attempts)")]
    Timeout { limit: Duration, attempts: u32 },

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

/// Drives forwarding attempts through a cold start.
#[derive(Debug, Clone)]
pub struct ColdStartRetry {
    forwarder: RequestForwarder,
    lifecycle: Arc<BackendLifecycle>,
    start_time_limit: Duration,
    retry_interval: Duration,
}

impl ColdStartRetry {
    pub fn new(
        forwarder: RequestForwarder,
        lifecycle: Arc<BackendLifecycle>,
        start_time_limit: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            forwarder,
            lifecycle,
            start_time_limit,
            retry_interval,
        }
    }

    /// Forward `request` until the backend answers with a relayable response.
    pub async fn run(&self, request: &ProxyRequest) -> Result<reqwest::Response, ColdStartError> {
        let ctx = RetryContext::start(self.start_time_limit, self.retry_interval);
        let mut attempts: u32 = 0;

        loop {
            if ctx.expired() {
                return Err(give_up(&ctx, attempts));
            }

            attempts += 1;
            let response = match self.forwarder.forward_within(request, ctx.remaining()).await {
                Ok(response) => response,
                Err(ForwardError::TimedOut(_)) if ctx.remaining().is_zero() => {
                    return Err(give_up(&ctx, attempts));
                }
                Err(e) => {
                    tracing::error!(attempt = attempts, error = %e, "Error forwarding request");
                    return Err(e.into());
                }
            };

            let status = response.status();
            match UpstreamVerdict::classify(status) {
                UpstreamVerdict::Absent => {
                    drop(response);
                    if self.lifecycle.try_claim_start() {
                        tracing::info!(
                            status = status.as_u16(),
                            "Backend is not running, starting it"
                        );
                        // A failed start releases the claim; the next 502 retries the wake.
                        let _ = self.lifecycle.start().await;
                    } else {
                        tracing::info!(
                            status = status.as_u16(),
                            attempt = attempts,
                            "Backend is still starting, retrying"
                        );
                    }
                }
                UpstreamVerdict::NotReady => {
                    drop(response);
                    tracing::info!(
                        status = status.as_u16(),
                        attempt = attempts,
                        "Service is not ready, retrying"
                    );
                }
                UpstreamVerdict::Ready => {
                    self.lifecycle.mark_ready();
                    if attempts > 1 {
                        tracing::info!(
                            attempts,
                            waited_ms = ctx.elapsed().as_millis() as u64,
                            "Backend answered after cold start"
                        );
                        metrics::record_cold_start_wait(ctx.elapsed());
                    }
                    return Ok(response);
                }
            }

            tokio::time::sleep(ctx.interval()).await;
        }
    }
}

fn give_up(ctx: &RetryContext, attempts: u32) -> ColdStartError {
    tracing::warn!(
        attempts,
        waited_secs = ctx.elapsed().as_secs(),
        "Service did not start in time, giving up"
    );
    metrics::record_cold_start_wait(ctx.elapsed());
    ColdStartError::Timeout {
        limit: ctx.deadline(),
        attempts,
    }
}
