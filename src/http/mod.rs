//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, upgrade detection)
//!     → websocket.rs (upgrade → backend dial → two pumps)
//!     → request.rs (buffer method, URI, headers, body once)
//!     → resilience/cold_start.rs (attempt loop)
//!         → forward.rs (one attempt)
//!     → response.rs (status/headers verbatim, streamed or buffered body)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::{ForwardError, RequestForwarder};
pub use request::{CaptureError, ProxyRequest};
pub use response::Delivery;
pub use server::{AppState, HttpServer, ServerError};
pub use websocket::WebSocketRelay;
