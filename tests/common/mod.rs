//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use wake_proxy::config::ProxyConfig;
use wake_proxy::http::{HttpServer, ServerError};
use wake_proxy::lifecycle::{ActivityClock, BackendLifecycle, ControlError, PodControl, Shutdown};

/// Serve `app` on an ephemeral local port.
pub async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// In-memory pod control that counts calls.
#[derive(Default)]
pub struct FakeControl {
    starts: AtomicUsize,
    stops: AtomicUsize,
    on_start: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FakeControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `hook` on every start call, e.g. to bring a mock backend up.
    pub fn with_on_start(hook: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            on_start: Some(Box::new(hook)),
            ..Self::default()
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodControl for FakeControl {
    async fn start_pod(&self) -> Result<(), ControlError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_start {
            hook();
        }
        Ok(())
    }

    async fn stop_pod(&self) -> Result<(), ControlError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Config pointing at `target` with timings small enough for tests.
pub fn test_config(target: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.target.base_url = target.to_string();
    config.control.api_key = "test-key".to_string();
    config.control.pod_id = "pod-test".to_string();
    config.control.stop_retries = 0;
    config.control.stop_retry_delay_ms = 10;
    config.cold_start.retry_interval_ms = 50;
    config.cold_start.start_time_limit_secs = 5;
    config.timeouts.connect_ms = 20;
    config
}

/// A running proxy instance.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub lifecycle: Arc<BackendLifecycle>,
    pub clock: Arc<ActivityClock>,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestProxy {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

pub async fn spawn_proxy(config: ProxyConfig, control: Arc<FakeControl>) -> TestProxy {
    let server = HttpServer::with_control(config, control).unwrap();
    let lifecycle = server.lifecycle();
    let clock = server.clock();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        shutdown,
        lifecycle,
        clock,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(20))
        .build()
        .unwrap()
}
