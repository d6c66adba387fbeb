//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides from the real process environment, then validate.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] but with an injectable environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, env: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay the environment variables the proxy has always been deployed with.
///
/// Numeric values that fail to parse or are not positive are ignored and the
/// current value is kept.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = env("LISTEN_PORT").filter(|p| !p.is_empty()) {
        config.listener.bind_address = format!("0.0.0.0:{}", port);
    }
    if let Some(key) = env("RUNPOD_API_KEY") {
        config.control.api_key = key;
    }
    if let Some(pod_id) = env("POD_ID") {
        config.control.pod_id = pod_id;
    }
    if let Some(base_url) = env("TARGET_BASE_URL") {
        config.target.base_url = base_url;
    }
    if let Some(base_url) = env("CONTROL_API_BASE_URL") {
        config.control.api_base_url = base_url;
    }
    if let Some(secs) = positive_secs(&env, "INACTIVITY_LIMIT_SECONDS") {
        config.inactivity.limit_secs = secs;
    }
    if let Some(secs) = positive_secs(&env, "START_TIME_LIMIT_SECONDS") {
        config.cold_start.start_time_limit_secs = secs;
    }
    if let Some(secs) = positive_secs(&env, "RETRY_INTERVAL_SECONDS") {
        config.cold_start.retry_interval_ms = secs.saturating_mul(1000);
        fit_connect_timeout(config);
    }
}

/// Keep the connect timeout below an interval that came from the
/// environment, which has no knob for the connect timeout itself.
fn fit_connect_timeout(config: &mut ProxyConfig) {
    let ceiling_ms = config.cold_start.retry_interval_ms / 2;
    if config.timeouts.connect_ms > ceiling_ms {
        tracing::debug!(
            connect_ms = config.timeouts.connect_ms,
            ceiling_ms,
            "Lowering connect timeout to fit the retry interval"
        );
        config.timeouts.connect_ms = ceiling_ms;
    }
}

fn positive_secs<F>(env: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            tracing::warn!(variable = key, value = %raw, "Ignoring invalid duration override");
            None
        }
    }
}
