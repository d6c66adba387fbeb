//! Backend control API client.
//!
//! # Responsibilities
//! - Issue authenticated start/stop calls for the configured pod
//! - Bound every call with a timeout
//! - Treat transport failures and non-2xx statuses as errors
//!
//! The [`PodControl`] trait is the seam between the lifecycle state machine
//! and the network, so lifecycle behaviour can be exercised without a real
//! control plane.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{ControlConfig, TimeoutConfig};

/// Failure of a control API call.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("control API returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("invalid control API key")]
    InvalidKey,
}

/// Start/stop operations on the backend pod.
#[async_trait]
pub trait PodControl: Send + Sync {
    async fn start_pod(&self) -> Result<(), ControlError>;
    async fn stop_pod(&self) -> Result<(), ControlError>;
}

/// HTTP implementation talking to `{api_base}/pods/{pod_id}/{start|stop}`.
pub struct PodControlClient {
    client: reqwest::Client,
    api_base_url: String,
    pod_id: String,
    api_key: String,
}

impl PodControlClient {
    pub fn new(control: &ControlConfig, timeouts: &TimeoutConfig) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.control())
            .connect_timeout(timeouts.connect())
            .build()?;

        Ok(Self {
            client,
            api_base_url: control.api_base_url.trim_end_matches('/').to_string(),
            pod_id: control.pod_id.clone(),
            api_key: control.api_key.clone(),
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/pods/{}/{}", self.api_base_url, self.pod_id, action)
    }

    async fn call(&self, action: &str) -> Result<(), ControlError> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| ControlError::InvalidKey)?;

        let response = self
            .client
            .post(self.action_url(action))
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(pod_id = %self.pod_id, action, status = %status, "Control call accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ControlError::Rejected { status, body })
    }
}

#[async_trait]
impl PodControl for PodControlClient {
    async fn start_pod(&self) -> Result<(), ControlError> {
        self.call("start").await
    }

    async fn stop_pod(&self) -> Result<(), ControlError> {
        self.call("stop").await
    }
}

impl std::fmt::Debug for PodControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodControlClient")
            .field("api_base_url", &self.api_base_url)
            .field("pod_id", &self.pod_id)
            .finish_non_exhaustive()
    }
}
