//! Retry classification and per-request retry context.
//!
//! # Responsibilities
//! - Map an upstream status to a cold start verdict
//! - Track elapsed time against the start-time limit for one request
//!
//! # Design Decisions
//! - 502 and 530 mean the backend is absent (wake it)
//! - 503 means the backend is up but its service is still loading (wait)
//! - Everything else, including other 5xx, is the backend's real answer
//! - Network errors are never retried here; they fail the request

use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::Instant;

/// Cloudflare "origin unreachable", used by some pod gateways.
pub const ORIGIN_UNREACHABLE: u16 = 530;

/// What an upstream status says about the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamVerdict {
    /// No instance behind the gateway (502/530).
    Absent,
    /// Instance up, service not ready (503).
    NotReady,
    /// A real response to relay.
    Ready,
}

impl UpstreamVerdict {
    pub fn classify(status: StatusCode) -> Self {
        match status.as_u16() {
            502 | ORIGIN_UNREACHABLE => UpstreamVerdict::Absent,
            503 => UpstreamVerdict::NotReady,
            _ => UpstreamVerdict::Ready,
        }
    }
}

/// Timing state for one retry loop invocation.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    started: Instant,
    deadline: Duration,
    interval: Duration,
}

impl RetryContext {
    pub fn start(deadline: Duration, interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            deadline,
            interval,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the overall wait exceeded the start-time limit.
    pub fn expired(&self) -> bool {
        self.elapsed() > self.deadline
    }

    /// Time left before the start-time limit, zero once it passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.elapsed())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}
