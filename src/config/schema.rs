//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the wake proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// The single backend all traffic is forwarded to.
    pub target: TargetConfig,

    /// Backend control API (start/stop).
    pub control: ControlConfig,

    /// Cold start retry behaviour.
    pub cold_start: ColdStartConfig,

    /// Idle shutdown behaviour.
    pub inactivity: InactivityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body the proxy will capture for replay.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Backend the proxy forwards to.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL, e.g. "https://abc123-8000.proxy.runpod.net".
    /// Request paths are appended verbatim.
    pub base_url: String,
}

impl TargetConfig {
    /// Base URL without a trailing slash so `base + path` never doubles it.
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Backend control API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control API root; `/pods/{pod_id}/start` is appended.
    pub api_base_url: String,

    /// Bearer token for the control API.
    pub api_key: String,

    /// Identifier of the pod to start and stop.
    pub pod_id: String,

    /// Extra attempts after a failed stop call.
    pub stop_retries: u32,

    /// Delay between stop attempts in milliseconds.
    pub stop_retry_delay_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://rest.runpod.io/v1".to_string(),
            api_key: String::new(),
            pod_id: String::new(),
            stop_retries: 3,
            stop_retry_delay_ms: 10_000,
        }
    }
}

impl ControlConfig {
    pub fn stop_retry_delay(&self) -> Duration {
        Duration::from_millis(self.stop_retry_delay_ms)
    }
}

/// Cold start retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ColdStartConfig {
    /// Total time a request may wait for the backend to come up.
    pub start_time_limit_secs: u64,

    /// Pause between attempts while the backend is absent or not ready.
    pub retry_interval_ms: u64,
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            start_time_limit_secs: 5 * 60,
            retry_interval_ms: 5_000,
        }
    }
}

impl ColdStartConfig {
    pub fn start_time_limit(&self) -> Duration {
        Duration::from_secs(self.start_time_limit_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Idle shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InactivityConfig {
    /// Idle time after which the backend is stopped.
    pub limit_secs: u64,

    /// How often the monitor compares idle time against the limit.
    pub check_interval_ms: u64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            limit_secs: 20 * 60,
            check_interval_ms: 60_000,
        }
    }
}

impl InactivityConfig {
    pub fn limit(&self) -> Duration {
        Duration::from_secs(self.limit_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout per forwarding attempt, in milliseconds.
    pub connect_ms: u64,

    /// Time allowed until the backend sends response headers, in seconds.
    pub response_headers_secs: u64,

    /// WebSocket handshake timeout towards the backend, in seconds.
    pub ws_handshake_secs: u64,

    /// Timeout for a single control API call, in seconds.
    pub control_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 4_000,
            response_headers_secs: 600,
            ws_handshake_secs: 10,
            control_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn response_headers(&self) -> Duration {
        Duration::from_secs(self.response_headers_secs)
    }

    pub fn ws_handshake(&self) -> Duration {
        Duration::from_secs(self.ws_handshake_secs)
    }

    pub fn control(&self) -> Duration {
        Duration::from_secs(self.control_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProxyConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.inactivity.limit(), Duration::from_secs(1200));
        assert_eq!(config.cold_start.start_time_limit(), Duration::from_secs(300));
        assert_eq!(config.cold_start.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.control.stop_retries, 3);
        assert_eq!(config.control.stop_retry_delay(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [target]
            base_url = "http://127.0.0.1:9000/"

            [cold_start]
            retry_interval_ms = 250

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.normalized_base_url(), "http://127.0.0.1:9000");
        assert_eq!(config.cold_start.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.cold_start.start_time_limit_secs, 300);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.control.api_base_url, "https://rest.runpod.io/v1");
    }
}
