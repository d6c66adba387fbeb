//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that URLs parse and credentials are present
//! - Check that the timing knobs are ordered consistently:
//!   connect timeout < retry interval < start time limit
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} is not a valid http(s) URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("listener.bind_address is not a socket address: {0}")]
    InvalidBindAddress(String),

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{smaller} ({smaller_value:?}) must be shorter than {larger} ({larger_value:?})")]
    Ordering {
        smaller: &'static str,
        smaller_value: Duration,
        larger: &'static str,
        larger_value: Duration,
    },
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    check_url(&mut errors, "target.base_url", &config.target.base_url);
    check_url(&mut errors, "control.api_base_url", &config.control.api_base_url);

    if config.control.api_key.is_empty() {
        errors.push(ValidationError::Missing { field: "control.api_key" });
    }
    if config.control.pod_id.is_empty() {
        errors.push(ValidationError::Missing { field: "control.pod_id" });
    }

    let positives: [(&'static str, u64); 7] = [
        ("cold_start.start_time_limit_secs", config.cold_start.start_time_limit_secs),
        ("cold_start.retry_interval_ms", config.cold_start.retry_interval_ms),
        ("inactivity.limit_secs", config.inactivity.limit_secs),
        ("inactivity.check_interval_ms", config.inactivity.check_interval_ms),
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.response_headers_secs", config.timeouts.response_headers_secs),
        ("timeouts.ws_handshake_secs", config.timeouts.ws_handshake_secs),
    ];
    for (field, value) in positives {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::NotPositive { field: "listener.max_body_bytes" });
    }

    let connect = config.timeouts.connect();
    let interval = config.cold_start.retry_interval();
    let limit = config.cold_start.start_time_limit();
    if connect >= interval {
        errors.push(ValidationError::Ordering {
            smaller: "timeouts.connect_ms",
            smaller_value: connect,
            larger: "cold_start.retry_interval_ms",
            larger_value: interval,
        });
    }
    if interval >= limit {
        errors.push(ValidationError::Ordering {
            smaller: "cold_start.retry_interval_ms",
            smaller_value: interval,
            larger: "cold_start.start_time_limit_secs",
            larger_value: limit,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.is_empty() {
        errors.push(ValidationError::Missing { field });
        return;
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => errors.push(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}
