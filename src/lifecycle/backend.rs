//! Backend lifecycle state machine.
//!
//! # Responsibilities
//! - Track what the proxy believes about the backend pod
//! - Guarantee at most one wake call per starting episode
//! - Issue start/stop calls through [`PodControl`]
//!
//! # State Transitions
//! ```text
//! Unknown/Stopped/Running → Starting: first 502/530 of an episode (claim)
//! Starting → Running:                 first normal response (episode closed)
//! Starting → Stopped:                 wake call failed (claim released)
//! Starting → Starting:                episode older than the start-time limit (re-claim)
//! Unknown/Stopped → Running:          normal response outside an episode
//! Unknown/Running → Stopped:          successful stop call
//! stale Starting → Stopped:           successful stop call
//! ```
//!
//! State and episode start share one atomic word (`claimed_ms << 8 | state`)
//! and every transition is a compare-and-swap on it, so concurrent handlers
//! and the inactivity monitor never observe a torn state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::lifecycle::control::{ControlError, PodControl};
use crate::observability::metrics;

const STATE_BITS: u32 = 8;
const STATE_MASK: u64 = 0xff;

/// What the proxy believes about the backend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Unknown = 0,
    Stopped = 1,
    Starting = 2,
    Running = 3,
}

impl From<u8> for BackendState {
    fn from(val: u8) -> Self {
        match val {
            1 => BackendState::Stopped,
            2 => BackendState::Starting,
            3 => BackendState::Running,
            _ => BackendState::Unknown,
        }
    }
}

impl BackendState {
    /// Running, or not yet observed. Both are candidates for an idle stop.
    pub fn may_be_running(self) -> bool {
        matches!(self, BackendState::Running | BackendState::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendState::Unknown => "unknown",
            BackendState::Stopped => "stopped",
            BackendState::Starting => "starting",
            BackendState::Running => "running",
        }
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for stop calls.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(10),
        }
    }
}

fn pack(state: BackendState, claimed_ms: u64) -> u64 {
    (claimed_ms << STATE_BITS) | state as u64
}

fn state_of(word: u64) -> BackendState {
    BackendState::from((word & STATE_MASK) as u8)
}

fn claimed_ms_of(word: u64) -> u64 {
    word >> STATE_BITS
}

/// Shared lifecycle object for the single backend.
pub struct BackendLifecycle {
    word: AtomicU64,
    origin: Instant,
    /// A starting episode older than this is abandoned.
    episode_limit: Duration,
    control: Arc<dyn PodControl>,
    stop_policy: StopPolicy,
}

impl BackendLifecycle {
    /// `episode_limit` is the start-time limit: no request waits longer on a
    /// claimed episode, so an older one has nobody left to close it.
    pub fn new(
        control: Arc<dyn PodControl>,
        stop_policy: StopPolicy,
        episode_limit: Duration,
    ) -> Self {
        Self {
            word: AtomicU64::new(pack(BackendState::Unknown, 0)),
            origin: Instant::now(),
            episode_limit,
            control,
            stop_policy,
        }
    }

    pub fn state(&self) -> BackendState {
        state_of(self.word.load(Ordering::Acquire))
    }

    /// Candidate for an idle stop: running, unknown, or stuck in an
    /// abandoned starting episode.
    pub fn may_be_running(&self) -> bool {
        let word = self.word.load(Ordering::Acquire);
        state_of(word).may_be_running() || self.is_stale(word)
    }

    /// Try to open a starting episode.
    ///
    /// Returns `true` for exactly one caller per episode; every other caller
    /// sees `Starting` and gets `false` until the episode is closed, released
    /// or goes stale.
    pub fn try_claim_start(&self) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let stale = self.is_stale(current);
            if state_of(current) == BackendState::Starting && !stale {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                pack(BackendState::Starting, self.now_ms()),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if stale {
                        tracing::warn!("Previous start episode never completed, claiming a new one");
                    }
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Wake the backend. Must only be called by the winner of
    /// [`try_claim_start`](Self::try_claim_start).
    ///
    /// On failure the claim is released so that later traffic can retry.
    pub async fn start(&self) -> Result<(), ControlError> {
        match self.control.start_pod().await {
            Ok(()) => {
                tracing::info!("Start call accepted, waiting for backend to become ready");
                metrics::record_control_call("start", true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start backend");
                metrics::record_control_call("start", false);
                self.transition(BackendState::Starting, BackendState::Stopped);
                Err(e)
            }
        }
    }

    /// Record a normal (non-unavailable) backend response.
    ///
    /// Closes an active starting episode; also promotes `Unknown`/`Stopped`
    /// to `Running` because the backend evidently answers.
    pub fn mark_ready(&self) {
        if self.transition(BackendState::Starting, BackendState::Running) {
            tracing::info!("Backend started and service is ready");
            return;
        }
        if self.transition(BackendState::Unknown, BackendState::Running)
            || self.transition(BackendState::Stopped, BackendState::Running)
        {
            tracing::debug!("Backend observed running");
        }
    }

    /// Stop the backend, retrying failed calls per the stop policy.
    ///
    /// On success the state becomes `Stopped` (unless a fresh starting
    /// episode was claimed concurrently). After the last failed attempt the
    /// state is left untouched so the next idle check can try again.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let attempts = self.stop_policy.retries + 1;
        let mut attempt = 1;
        loop {
            match self.control.stop_pod().await {
                Ok(()) => {
                    metrics::record_control_call("stop", true);
                    if self.transition(BackendState::Running, BackendState::Stopped)
                        || self.transition(BackendState::Unknown, BackendState::Stopped)
                        || self.stop_stale_episode()
                    {
                        tracing::info!("Backend stopped");
                    } else {
                        tracing::warn!(state = %self.state(), "Backend stopped while a start was in flight");
                    }
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    metrics::record_control_call("stop", false);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts = attempts,
                        "Error stopping backend, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.stop_policy.delay).await;
                }
                Err(e) => {
                    metrics::record_control_call("stop", false);
                    tracing::error!(error = %e, attempts, "Failed to stop backend after multiple attempts");
                    return Err(e);
                }
            }
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX >> STATE_BITS)
    }

    fn is_stale(&self, word: u64) -> bool {
        let age_ms = self.now_ms().saturating_sub(claimed_ms_of(word));
        state_of(word) == BackendState::Starting && age_ms > self.episode_limit.as_millis() as u64
    }

    fn stop_stale_episode(&self) -> bool {
        let current = self.word.load(Ordering::Acquire);
        self.is_stale(current)
            && self
                .word
                .compare_exchange(
                    current,
                    pack(BackendState::Stopped, 0),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    fn transition(&self, from: BackendState, to: BackendState) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if state_of(current) != from {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                pack(to, claimed_ms_of(current)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl std::fmt::Debug for BackendLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLifecycle")
            .field("state", &self.state())
            .field("stop_policy", &self.stop_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// In-memory control plane counting calls; fails the first `fail_*` calls.
    #[derive(Default)]
    pub(crate) struct FakeControl {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub fail_starts: AtomicUsize,
        pub fail_stops: AtomicUsize,
    }

    fn rejected() -> ControlError {
        ControlError::Rejected {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl PodControl for FakeControl {
        async fn start_pod(&self) -> Result<(), ControlError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.fail_starts) {
                return Err(rejected());
            }
            Ok(())
        }

        async fn stop_pod(&self) -> Result<(), ControlError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.fail_stops) {
                return Err(rejected());
            }
            Ok(())
        }
    }

    fn lifecycle(control: Arc<FakeControl>) -> BackendLifecycle {
        BackendLifecycle::new(
            control,
            StopPolicy {
                retries: 3,
                delay: Duration::from_secs(10),
            },
            Duration::from_secs(300),
        )
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            BackendState::Unknown,
            BackendState::Stopped,
            BackendState::Starting,
            BackendState::Running,
        ] {
            assert_eq!(BackendState::from(state as u8), state);
        }
        assert_eq!(BackendState::from(200), BackendState::Unknown);
    }

    #[test]
    fn only_one_claim_per_episode() {
        let lifecycle = lifecycle(Arc::default());
        assert!(lifecycle.try_claim_start());
        assert!(!lifecycle.try_claim_start());
        assert_eq!(lifecycle.state(), BackendState::Starting);

        lifecycle.mark_ready();
        assert_eq!(lifecycle.state(), BackendState::Running);

        // A new episode can be claimed once the previous one closed.
        assert!(lifecycle.try_claim_start());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_a_single_winner() {
        let lifecycle = Arc::new(lifecycle(Arc::default()));
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.try_claim_start() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn failed_start_releases_claim() {
        let control = Arc::new(FakeControl::default());
        control.fail_starts.store(1, Ordering::SeqCst);
        let lifecycle = lifecycle(control.clone());

        assert!(lifecycle.try_claim_start());
        assert!(lifecycle.start().await.is_err());
        assert_eq!(lifecycle.state(), BackendState::Stopped);

        assert!(lifecycle.try_claim_start());
        assert!(lifecycle.start().await.is_ok());
        assert_eq!(control.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn normal_response_outside_episode_marks_running() {
        let lifecycle = lifecycle(Arc::default());
        assert_eq!(lifecycle.state(), BackendState::Unknown);
        lifecycle.mark_ready();
        assert_eq!(lifecycle.state(), BackendState::Running);
    }

    #[tokio::test]
    async fn successful_stop_marks_stopped() {
        let control = Arc::new(FakeControl::default());
        let lifecycle = lifecycle(control.clone());
        lifecycle.mark_ready();

        lifecycle.stop().await.unwrap();
        assert_eq!(lifecycle.state(), BackendState::Stopped);
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_retries_then_succeeds() {
        let control = Arc::new(FakeControl::default());
        control.fail_stops.store(2, Ordering::SeqCst);
        let lifecycle = lifecycle(control.clone());
        lifecycle.mark_ready();

        let started = tokio::time::Instant::now();
        lifecycle.stop().await.unwrap();

        assert_eq!(control.stops.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert_eq!(lifecycle.state(), BackendState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_gives_up_and_leaves_state_running() {
        let control = Arc::new(FakeControl::default());
        control.fail_stops.store(10, Ordering::SeqCst);
        let lifecycle = lifecycle(control.clone());
        lifecycle.mark_ready();

        assert!(lifecycle.stop().await.is_err());
        assert_eq!(control.stops.load(Ordering::SeqCst), 4);
        assert_eq!(lifecycle.state(), BackendState::Running);
    }

    #[tokio::test]
    async fn stop_during_start_keeps_episode() {
        let lifecycle = lifecycle(Arc::default());
        assert!(lifecycle.try_claim_start());
        lifecycle.stop().await.unwrap();
        assert_eq!(lifecycle.state(), BackendState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_episode_can_be_stopped_and_reclaimed() {
        let control = Arc::new(FakeControl::default());
        let lifecycle = lifecycle(control.clone());
        assert!(lifecycle.try_claim_start());
        lifecycle.start().await.unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(!lifecycle.may_be_running());
        assert!(!lifecycle.try_claim_start());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(lifecycle.state(), BackendState::Starting);
        assert!(lifecycle.may_be_running());

        lifecycle.stop().await.unwrap();
        assert_eq!(lifecycle.state(), BackendState::Stopped);
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_episode_has_a_single_new_winner() {
        let lifecycle = lifecycle(Arc::default());
        assert!(lifecycle.try_claim_start());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(lifecycle.try_claim_start());
        assert!(!lifecycle.try_claim_start());
        assert_eq!(lifecycle.state(), BackendState::Starting);
        assert!(!lifecycle.may_be_running());
    }
}
