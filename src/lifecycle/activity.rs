//! Process-wide last-activity timestamp.
//!
//! Every unit of observed traffic (request receipt, streamed chunk, WebSocket
//! message) calls [`ActivityClock::touch`]. The inactivity monitor reads
//! [`ActivityClock::idle_for`] to decide when the backend may be stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic last-activity clock.
///
/// Stores milliseconds elapsed since the clock was created. Updates use
/// `fetch_max`, so concurrent writers can never move the timestamp backwards.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    /// Create a clock whose last activity is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record activity at the current instant.
    pub fn touch(&self) {
        let now = self.elapsed_ms();
        self.last_ms.fetch_max(now, Ordering::AcqRel);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Acquire);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Opaque reading of the last activity; equal readings mean no traffic
    /// was observed in between.
    pub fn last_activity(&self) -> u64 {
        self.last_ms.load(Ordering::Acquire)
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
