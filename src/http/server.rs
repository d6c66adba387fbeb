//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the component graph once and share it through [`AppState`]
//! - Create the Axum router with a catch-all proxy handler
//! - Dispatch upgrades to the WebSocket relay, everything else to the
//!   cold start retry loop
//! - Spawn the inactivity monitor next to the server
//! - Serve with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::forward::{ForwardError, RequestForwarder};
use crate::http::request::{client_address, CaptureError, ProxyRequest};
use crate::http::response::{self, Delivery};
use crate::http::websocket::{is_websocket_request, WebSocketRelay};
use crate::lifecycle::{
    ActivityClock, BackendLifecycle, ControlError, InactivityMonitor, PodControl,
    PodControlClient, ShutdownSignal, StopPolicy,
};
use crate::observability::{metrics, spans};
use crate::resilience::{ColdStartError, ColdStartRetry};

/// Failure to assemble or run the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build forwarding client: {0}")]
    Forward(#[from] ForwardError),

    #[error("failed to build control client: {0}")]
    Control(#[from] ControlError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub clock: Arc<ActivityClock>,
    pub lifecycle: Arc<BackendLifecycle>,
    pub cold_start: ColdStartRetry,
    pub relay: WebSocketRelay,
    pub max_body_bytes: usize,
}

/// HTTP server for the wake-on-request proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    clock: Arc<ActivityClock>,
    lifecycle: Arc<BackendLifecycle>,
}

impl HttpServer {
    /// Create a server that controls the pod through its REST API.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let control = PodControlClient::new(&config.control, &config.timeouts)?;
        Self::with_control(config, Arc::new(control))
    }

    /// Create a server with a custom pod control implementation.
    pub fn with_control(
        config: ProxyConfig,
        control: Arc<dyn PodControl>,
    ) -> Result<Self, ServerError> {
        let clock = Arc::new(ActivityClock::new());
        let stop_policy = StopPolicy {
            retries: config.control.stop_retries,
            delay: config.control.stop_retry_delay(),
        };
        let lifecycle = Arc::new(BackendLifecycle::new(
            control,
            stop_policy,
            config.cold_start.start_time_limit(),
        ));

        let forwarder = RequestForwarder::new(&config.target, &config.timeouts)?;
        let cold_start = ColdStartRetry::new(
            forwarder,
            lifecycle.clone(),
            config.cold_start.start_time_limit(),
            config.cold_start.retry_interval(),
        );
        let relay = WebSocketRelay::new(&config.target, &config.timeouts, clock.clone());

        let state = AppState {
            clock: clock.clone(),
            lifecycle: lifecycle.clone(),
            cold_start,
            relay,
            max_body_bytes: config.listener.max_body_bytes,
        };

        Ok(Self {
            router: Self::build_router(state),
            config,
            clock,
            lifecycle,
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server and the inactivity monitor until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            target = %self.config.target.normalized_base_url(),
            "HTTP server starting"
        );

        let monitor = InactivityMonitor::new(
            self.clock.clone(),
            self.lifecycle.clone(),
            self.config.inactivity.limit(),
            self.config.inactivity.check_interval(),
        );
        let monitor_handle = tokio::spawn(monitor.run(shutdown.clone()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let mut server_shutdown = shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.recv().await })
            .await?;

        if let Err(e) = monitor_handle.await {
            tracing::warn!(error = %e, "Inactivity monitor task failed");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<ActivityClock> {
        self.clock.clone()
    }

    pub fn lifecycle(&self) -> Arc<BackendLifecycle> {
        self.lifecycle.clone()
    }
}

/// Catch-all handler: every method and path goes to the backend.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.clock.touch();

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_address(request.headers(), peer);

    let span = spans::request_span(&spans::new_request_id(), &method, &path);
    let response = async {
        if is_websocket_request(request.headers()) {
            tracing::info!("Received {} {} from {} (WebSocket upgrade request)", method, path, client);
            upgrade(state, request).await
        } else {
            tracing::info!("Received {} {} from {}", method, path, client);
            proxy(state, request).await
        }
    }
    .instrument(span)
    .await;

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

async fn upgrade(state: AppState, request: Request<Body>) -> Response {
    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Failed to upgrade client connection");
            return rejection.into_response();
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = parts.headers;
    let relay = state.relay.clone();
    let span = tracing::Span::current();

    ws.on_upgrade(move |socket| {
        async move { relay.run(socket, path_and_query, headers).await }.instrument(span)
    })
}

async fn proxy(state: AppState, request: Request<Body>) -> Response {
    let captured = match ProxyRequest::capture(request, state.max_body_bytes).await {
        Ok(captured) => captured,
        Err(e @ CaptureError::TooLarge { .. }) => {
            tracing::warn!(error = %e, "Rejecting request");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting request");
            return (StatusCode::BAD_REQUEST, "Error reading request body").into_response();
        }
    };

    match state.cold_start.run(&captured).await {
        Ok(upstream) => {
            let (response, delivery) = response::relay(upstream, state.clock.clone());
            if delivery == Delivery::Streamed {
                tracing::debug!(status = response.status().as_u16(), "Streaming response");
            }
            response
        }
        Err(ColdStartError::Timeout { .. }) => {
            (StatusCode::GATEWAY_TIMEOUT, "Service did not start in time").into_response()
        }
        Err(ColdStartError::Forward(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Error forwarding request").into_response()
        }
    }
}
