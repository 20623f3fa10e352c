//! Endpoint provider backed by a managed-hosting control plane.
//!
//! Speaks a small JSON API:
//!
//! * `POST {base}/endpoints` with a [`ProvisionRequest`] body, answering
//!   `{ "handle": "..." }`.
//! * `GET {base}/endpoints/{endpoint}/deployments/{handle}`, answering
//!   `{ "status": "...", "reason": "..." }`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{EndpointHealth, EndpointProvider, ProvisionRequest};
use crate::error::DeploymentError;

/// Upper bound on any single control-plane request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on establishing the TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpEndpointProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

impl HttpEndpointProvider {
    /// * `base_url` - Control-plane root, e.g. `https://deploy.internal/v1`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, DeploymentError> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    /// Same as [`HttpEndpointProvider::new`] with a custom request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeploymentError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DeploymentError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn ensure_success(
        deployment_id: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, DeploymentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DeploymentError::Provider {
                deployment_id: deployment_id.to_string(),
                message: format!("control plane returned {}: {body}", status.as_u16()),
            });
        }
        Ok(response)
    }
}

/// Map a control-plane status string onto [`EndpointHealth`].
fn classify(status: &str, reason: Option<String>) -> EndpointHealth {
    match status.to_ascii_lowercase().as_str() {
        "inservice" | "healthy" => EndpointHealth::Healthy,
        "failed" => EndpointHealth::Failed(reason.unwrap_or_else(|| "failed".to_string())),
        _ => EndpointHealth::Pending,
    }
}

#[async_trait]
impl EndpointProvider for HttpEndpointProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<String, DeploymentError> {
        let provider_err = |e: reqwest::Error| DeploymentError::Provider {
            deployment_id: request.deployment_id.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/endpoints", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(provider_err)?;
        let response = Self::ensure_success(&request.deployment_id, response).await?;
        let body: ProvisionResponse = response.json().await.map_err(provider_err)?;
        Ok(body.handle)
    }

    async fn health(
        &self,
        request: &ProvisionRequest,
        handle: &str,
    ) -> Result<EndpointHealth, DeploymentError> {
        let provider_err = |e: reqwest::Error| DeploymentError::Provider {
            deployment_id: request.deployment_id.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(format!(
                "{}/endpoints/{}/deployments/{}",
                self.base_url, request.endpoint_name, handle
            ))
            .send()
            .await
            .map_err(provider_err)?;
        let response = Self::ensure_success(&request.deployment_id, response).await?;
        let body: HealthResponse = response.json().await.map_err(provider_err)?;
        Ok(classify(&body.status, body.reason))
    }
}
