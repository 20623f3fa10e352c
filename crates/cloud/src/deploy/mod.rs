//! Deployment capability interface and the endpoint state machine.
//!
//! Every deployment attempt creates a [`DeploymentRecord`] per
//! (endpoint, environment):
//!
//! ```text
//! provisioning --health ok--------------> active   (previous active -> retired)
//! provisioning --timeout / provider err-> failed   (previous active untouched)
//! ```
//!
//! Vendors plug in through [`EndpointProvider`]; [`ManagedDeployment`]
//! owns the state machine and the [`DeploymentLedger`], so the
//! one-active-record invariant holds for every vendor.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mlpromote_core::config::{DeploymentTarget, RolloutSettings};
use mlpromote_core::environment::Environment;
use mlpromote_core::model::ModelVersion;
use mlpromote_core::types::Timestamp;

use crate::error::DeploymentError;

pub mod http;
pub mod ledger;
pub mod local;

pub use http::HttpEndpointProvider;
pub use ledger::DeploymentLedger;
pub use local::LocalEndpointProvider;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Provisioning,
    Active,
    Failed,
    Retired,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Retired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,
    pub endpoint_name: String,
    pub environment: Environment,
    pub model_name: String,
    pub model_version: u32,
    pub artifact_uri: String,
    pub status: DeploymentStatus,
    /// Failure reason, or the provider handle once provisioned.
    pub message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Everything a provider needs to stand up one endpoint revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub deployment_id: String,
    pub endpoint_name: String,
    pub environment: Environment,
    pub model_name: String,
    pub model_version: u32,
    pub artifact_uri: String,
    pub instance_class: String,
    pub region: String,
    pub image_uri: String,
    pub instance_count: u32,
}

impl ProvisionRequest {
    pub fn new(
        deployment_id: &str,
        version: &ModelVersion,
        target: &DeploymentTarget,
        environment: Environment,
    ) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            endpoint_name: target.endpoint_name.clone(),
            environment,
            model_name: version.name.clone(),
            model_version: version.version,
            artifact_uri: version.artifact.uri.clone(),
            instance_class: target.instance_class.clone(),
            region: target.region.clone(),
            image_uri: target.image_uri.clone(),
            instance_count: target.instance_count,
        }
    }
}

/// Health reported by a provider while a revision is provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointHealth {
    Pending,
    Healthy,
    Failed(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Vendor-specific endpoint control.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start provisioning. Returns an opaque provider handle used for
    /// health checks.
    async fn provision(&self, request: &ProvisionRequest) -> Result<String, DeploymentError>;

    async fn health(
        &self,
        request: &ProvisionRequest,
        handle: &str,
    ) -> Result<EndpointHealth, DeploymentError>;
}

/// Deploys model versions to serving endpoints.
#[async_trait]
pub trait DeploymentGateway: Send + Sync {
    /// Roll `version` out to `target` in `environment`.
    ///
    /// On success the returned record is `active`. On failure the attempt's
    /// record is `failed` and the previous active record keeps serving.
    async fn deploy(
        &self,
        version: &ModelVersion,
        target: &DeploymentTarget,
        environment: Environment,
    ) -> Result<DeploymentRecord, DeploymentError>;

    /// All records for an endpoint, oldest first.
    async fn records(&self, endpoint: &str, environment: Environment) -> Vec<DeploymentRecord>;

    async fn active(&self, endpoint: &str, environment: Environment) -> Option<DeploymentRecord> {
        self.records(endpoint, environment)
            .await
            .into_iter()
            .find(|r| r.status == DeploymentStatus::Active)
    }
}

// ---------------------------------------------------------------------------
// ManagedDeployment
// ---------------------------------------------------------------------------

/// [`DeploymentGateway`] built from a provider plus a ledger.
pub struct ManagedDeployment<P> {
    provider: P,
    ledger: DeploymentLedger,
    rollout: RolloutSettings,
}

impl<P: EndpointProvider> ManagedDeployment<P> {
    pub fn new(provider: P, ledger: DeploymentLedger, rollout: RolloutSettings) -> Self {
        Self {
            provider,
            ledger,
            rollout,
        }
    }

    pub fn ledger(&self) -> &DeploymentLedger {
        &self.ledger
    }

    /// Poll provider health until healthy, failed, or the timeout elapses.
    async fn await_healthy(
        &self,
        request: &ProvisionRequest,
        handle: &str,
    ) -> Result<(), DeploymentError> {
        let started = Instant::now();
        let interval = self.rollout.health_check_interval();

        let poll = async {
            loop {
                match self.provider.health(request, handle).await {
                    Err(e) => return Err(e),
                    Ok(EndpointHealth::Healthy) => return Ok(()),
                    Ok(EndpointHealth::Failed(reason)) => {
                        return Err(DeploymentError::Unhealthy {
                            deployment_id: request.deployment_id.clone(),
                            reason,
                        })
                    }
                    Ok(EndpointHealth::Pending) => {
                        tracing::debug!(
                            deployment_id = %request.deployment_id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Endpoint not healthy yet",
                        );
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        };

        match tokio::time::timeout(self.rollout.health_check_timeout(), poll).await {
            Ok(result) => result,
            Err(_) => Err(DeploymentError::HealthCheckTimeout {
                deployment_id: request.deployment_id.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<P: EndpointProvider> DeploymentGateway for ManagedDeployment<P> {
    async fn deploy(
        &self,
        version: &ModelVersion,
        target: &DeploymentTarget,
        environment: Environment,
    ) -> Result<DeploymentRecord, DeploymentError> {
        let record = self.ledger.begin(version, target, environment).await?;
        let request = ProvisionRequest::new(&record.deployment_id, version, target, environment);

        tracing::info!(
            deployment_id = %record.deployment_id,
            endpoint = %target.endpoint_name,
            environment = %environment,
            model = %version.label(),
            provider = self.provider.name(),
            "Provisioning endpoint",
        );

        let outcome = match self.provider.provision(&request).await {
            Ok(handle) => self.await_healthy(&request, &handle).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                let active = self.ledger.activate(&record.deployment_id).await?;
                tracing::info!(
                    deployment_id = %active.deployment_id,
                    endpoint = %active.endpoint_name,
                    "Endpoint active",
                );
                Ok(active)
            }
            Err(e) => {
                tracing::error!(
                    deployment_id = %record.deployment_id,
                    error = %e,
                    "Deployment failed; previous active revision left serving",
                );
                if let Err(ledger_err) = self.ledger.fail(&record.deployment_id, &e.to_string()).await
                {
                    tracing::error!(
                        deployment_id = %record.deployment_id,
                        error = %ledger_err,
                        "Could not record deployment failure",
                    );
                }
                Err(e)
            }
        }
    }

    async fn records(&self, endpoint: &str, environment: Environment) -> Vec<DeploymentRecord> {
        self.ledger.records(endpoint, environment).await
    }
}
