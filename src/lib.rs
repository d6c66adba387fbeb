//! Wake-on-request reverse proxy for an on-demand GPU pod.
//!
//! Forwards every request to one backend, starts the backend through its
//! control API when the gateway reports it absent, replays the request until
//! the backend answers, and stops the backend after a period without traffic.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
