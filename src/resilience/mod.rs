//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Captured request:
//!     → cold_start.rs (attempt loop, wake on 502/530, wait on 503)
//!     → retries.rs (status verdict, elapsed vs. start-time limit)
//!     → http/forward.rs (one attempt, per-attempt timeouts)
//! ```
//!
//! # Design Decisions
//! - Fixed retry interval, no backoff or jitter
//! - One overall deadline per request, checked before every attempt
//! - Network errors fail fast; only gateway statuses are retried

pub mod cold_start;
pub mod retries;

pub use cold_start::{ColdStartError, ColdStartRetry};
pub use retries::{RetryContext, UpstreamVerdict};
