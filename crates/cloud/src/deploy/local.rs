//! Endpoint provider that "serves" from the local state directory.
//!
//! Provisioning writes a manifest describing the revision under
//! `<root>/endpoints/<env>/<endpoint>/<deployment_id>.json`. The revision is
//! healthy as soon as the manifest names both an image and an artifact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{EndpointHealth, EndpointProvider, ProvisionRequest};
use crate::error::DeploymentError;

pub struct LocalEndpointProvider {
    root: PathBuf,
}

impl LocalEndpointProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn manifest_path(&self, request: &ProvisionRequest) -> PathBuf {
        self.root
            .join("endpoints")
            .join(request.environment.name())
            .join(&request.endpoint_name)
            .join(format!("{}.json", request.deployment_id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl EndpointProvider for LocalEndpointProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<String, DeploymentError> {
        let path = self.manifest_path(request);
        let provider_err = |e: &dyn std::fmt::Display| DeploymentError::Provider {
            deployment_id: request.deployment_id.clone(),
            message: format!("{}: {e}", path.display()),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| provider_err(&e))?;
        }
        let bytes = serde_json::to_vec_pretty(request).map_err(|e| provider_err(&e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| provider_err(&e))?;

        tracing::debug!(manifest = %path.display(), "Wrote endpoint manifest");
        Ok(path.display().to_string())
    }

    async fn health(
        &self,
        request: &ProvisionRequest,
        handle: &str,
    ) -> Result<EndpointHealth, DeploymentError> {
        let bytes = match tokio::fs::read(handle).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(EndpointHealth::Failed(format!("manifest unreadable: {e}"))),
        };
        let manifest: ProvisionRequest = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => return Ok(EndpointHealth::Failed(format!("manifest corrupt: {e}"))),
        };

        if manifest.deployment_id != request.deployment_id {
            return Ok(EndpointHealth::Failed("manifest belongs to another deployment".into()));
        }
        if manifest.image_uri.trim().is_empty() {
            return Ok(EndpointHealth::Failed("no container image configured".into()));
        }
        if manifest.artifact_uri.trim().is_empty() {
            return Ok(EndpointHealth::Failed("no model artifact".into()));
        }
        Ok(EndpointHealth::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlpromote_core::environment::Environment;

    fn request(image_uri: &str) -> ProvisionRequest {
        ProvisionRequest {
            deployment_id: "d-1".into(),
            endpoint_name: "yf-endpoint".into(),
            environment: Environment::Dev,
            model_name: "yf".into(),
            model_version: 1,
            artifact_uri: "file://yf-dev/models/run-1/model.json".into(),
            instance_class: "local".into(),
            region: "local".into(),
            image_uri: image_uri.into(),
            instance_count: 1,
        }
    }

    #[tokio::test]
    async fn provisioned_manifest_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalEndpointProvider::new(dir.path());
        let req = request("registry/yf:1");

        let handle = provider.provision(&req).await.unwrap();
        assert!(handle.ends_with("d-1.json"));
        assert_eq!(provider.health(&req, &handle).await.unwrap(), EndpointHealth::Healthy);
    }

    #[tokio::test]
    async fn missing_image_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalEndpointProvider::new(dir.path());
        let req = request("  ");

        let handle = provider.provision(&req).await.unwrap();
        assert!(matches!(
            provider.health(&req, &handle).await.unwrap(),
            EndpointHealth::Failed(_)
        ));
    }
}
