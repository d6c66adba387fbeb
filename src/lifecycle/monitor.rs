//! Idle-triggered backend shutdown.
//!
//! # Responsibilities
//! - Periodically compare the activity clock against the inactivity limit
//! - Request a stop through [`BackendLifecycle`] once per idle episode
//! - Exit promptly when the shutdown signal fires

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::activity::ActivityClock;
use crate::lifecycle::backend::BackendLifecycle;
use crate::lifecycle::shutdown::ShutdownSignal;

/// Outcome of a single idle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// Traffic was seen within the limit.
    Active,
    /// Idle, but the backend is not believed to be running.
    NotRunning,
    /// Idle, and this idle episode was already handled.
    AlreadyStopped,
    /// A stop call succeeded.
    Stopped,
    /// The stop call failed after all retries; the next check tries again.
    StopFailed,
}

pub struct InactivityMonitor {
    clock: Arc<ActivityClock>,
    lifecycle: Arc<BackendLifecycle>,
    limit: Duration,
    interval: Duration,
    /// Activity reading for which a stop already succeeded.
    stopped_at: Option<u64>,
}

impl InactivityMonitor {
    pub fn new(
        clock: Arc<ActivityClock>,
        lifecycle: Arc<BackendLifecycle>,
        limit: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            clock,
            lifecycle,
            limit,
            interval,
            stopped_at: None,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        tracing::info!(
            limit_secs = self.limit.as_secs(),
            interval_ms = self.interval.as_millis() as u64,
            "Inactivity monitor starting"
        );

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Inactivity monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Perform one idle check.
    pub async fn check_once(&mut self) -> IdleCheck {
        let idle = self.clock.idle_for();
        if idle <= self.limit {
            return IdleCheck::Active;
        }

        let reading = self.clock.last_activity();
        if self.stopped_at == Some(reading) {
            return IdleCheck::AlreadyStopped;
        }

        let state = self.lifecycle.state();
        if !self.lifecycle.may_be_running() {
            return IdleCheck::NotRunning;
        }

        tracing::info!(idle_secs = idle.as_secs(), state = %state, "Stopping backend due to inactivity");
        match self.lifecycle.stop().await {
            Ok(()) => {
                self.stopped_at = Some(reading);
                IdleCheck::Stopped
            }
            Err(_) => IdleCheck::StopFailed,
        }
    }
}
