//! Vendor selection.

use std::path::Path;
use std::sync::Arc;

use mlpromote_core::config::ExecutionContext;
use mlpromote_core::environment::CloudVendor;

use crate::deploy::{
    DeploymentGateway, DeploymentLedger, HttpEndpointProvider, LocalEndpointProvider,
    ManagedDeployment,
};
use crate::error::DeploymentError;
use crate::storage::{LocalStorage, S3Storage, StorageGateway};

/// File name of the deployment ledger inside the state directory.
pub const LEDGER_FILE: &str = "deployments.json";

/// The storage and deployment gateways for one run.
#[derive(Clone)]
pub struct CloudBackends {
    pub storage: Arc<dyn StorageGateway>,
    pub deployment: Arc<dyn DeploymentGateway>,
}

impl std::fmt::Debug for CloudBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBackends").finish_non_exhaustive()
    }
}

impl CloudBackends {
    pub fn new(storage: Arc<dyn StorageGateway>, deployment: Arc<dyn DeploymentGateway>) -> Self {
        Self {
            storage,
            deployment,
        }
    }

    /// Build the backends named by `ctx.cloud_vendor`.
    ///
    /// `state_dir` holds the deployment ledger for every vendor, plus the
    /// object store and endpoint manifests for [`CloudVendor::Local`].
    pub async fn for_context(
        ctx: &ExecutionContext,
        state_dir: &Path,
    ) -> Result<Self, DeploymentError> {
        let ledger = DeploymentLedger::open(state_dir.join(LEDGER_FILE)).await?;
        let rollout = ctx.rollout.clone();

        let backends = match ctx.cloud_vendor {
            CloudVendor::Local => Self::new(
                Arc::new(LocalStorage::new(state_dir.join("storage"))),
                Arc::new(ManagedDeployment::new(
                    LocalEndpointProvider::new(state_dir),
                    ledger,
                    rollout,
                )),
            ),
            CloudVendor::Aws => {
                let control_plane = ctx.control_plane_url.as_deref().ok_or_else(|| {
                    DeploymentError::Configuration(
                        "control_plane_url is required for cloud_vendor=aws".into(),
                    )
                })?;
                Self::new(
                    Arc::new(S3Storage::connect(&ctx.deployment.region).await),
                    Arc::new(ManagedDeployment::new(
                        HttpEndpointProvider::new(control_plane)?,
                        ledger,
                        rollout,
                    )),
                )
            }
        };

        tracing::info!(
            vendor = ctx.cloud_vendor.name(),
            state_dir = %state_dir.display(),
            "Cloud backends ready",
        );
        Ok(backends)
    }
}
