//! Backend lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Traffic (requests, stream chunks, WebSocket messages)
//!     → activity.rs (last-activity clock)
//!
//! Cold start detected by the retry loop:
//!     → backend.rs (claim starting episode, CAS)
//!     → control.rs (POST /pods/{id}/start)
//!
//! Periodic timer (monitor.rs):
//!     idle > limit and backend may be running
//!     → backend.rs stop (bounded retries)
//!     → control.rs (POST /pods/{id}/stop)
//!
//! Process (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → server and monitor exit
//! ```
//!
//! # Design Decisions
//! - One lifecycle object owns all backend state; no globals
//! - The claim transition is a compare-and-swap on the state byte
//! - The monitor is a cancellable task, driven by the shutdown signal

pub mod activity;
pub mod backend;
pub mod control;
pub mod monitor;
pub mod shutdown;
pub mod signals;

pub use activity::ActivityClock;
pub use backend::{BackendLifecycle, BackendState, StopPolicy};
pub use control::{ControlError, PodControl, PodControlClient};
pub use monitor::{IdleCheck, InactivityMonitor};
pub use shutdown::{Shutdown, ShutdownSignal};
