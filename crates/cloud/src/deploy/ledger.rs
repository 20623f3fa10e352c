//! Deployment record store.
//!
//! Records live in memory behind a mutex and, when a path is configured,
//! are mirrored to a JSON file after every transition. A transition is
//! applied to a copy, persisted, and only then swapped in, so a failed
//! write leaves memory and disk in agreement. All transitions for an
//! endpoint happen under the same lock, so at most one record per
//! (endpoint, environment) is ever `active`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use mlpromote_core::config::DeploymentTarget;
use mlpromote_core::environment::Environment;
use mlpromote_core::model::ModelVersion;

use super::{DeploymentRecord, DeploymentStatus};
use crate::error::DeploymentError;

#[derive(Debug)]
pub struct DeploymentLedger {
    records: Mutex<Vec<DeploymentRecord>>,
    path: Option<PathBuf>,
}

impl DeploymentLedger {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Open (or create) a ledger persisted at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DeploymentError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DeploymentError::Ledger(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(DeploymentError::Ledger(format!("{}: {e}", path.display())));
            }
        };
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a `provisioning` record for a new attempt.
    pub async fn begin(
        &self,
        version: &ModelVersion,
        target: &DeploymentTarget,
        environment: Environment,
    ) -> Result<DeploymentRecord, DeploymentError> {
        let now = Utc::now();
        let record = DeploymentRecord {
            deployment_id: Uuid::now_v7().to_string(),
            endpoint_name: target.endpoint_name.clone(),
            environment,
            model_name: version.name.clone(),
            model_version: version.version,
            artifact_uri: version.artifact.uri.clone(),
            status: DeploymentStatus::Provisioning,
            message: None,
            created_at: now,
            updated_at: now,
        };

        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.push(record.clone());
        self.persist(&next).await?;
        *records = next;
        Ok(record)
    }

    /// Promote a provisioning record to `active`, retiring the previous
    /// active record for the same endpoint and environment.
    pub async fn activate(&self, deployment_id: &str) -> Result<DeploymentRecord, DeploymentError> {
        let mut records = self.records.lock().await;
        let idx = Self::position(&records, deployment_id)?;
        let endpoint = records[idx].endpoint_name.clone();
        let environment = records[idx].environment;
        let now = Utc::now();

        let mut next = records.clone();
        for (i, record) in next.iter_mut().enumerate() {
            if i != idx
                && record.status == DeploymentStatus::Active
                && record.endpoint_name == endpoint
                && record.environment == environment
            {
                tracing::info!(
                    deployment_id = %record.deployment_id,
                    endpoint = %endpoint,
                    "Retiring previous revision",
                );
                record.status = DeploymentStatus::Retired;
                record.updated_at = now;
            }
        }

        let record = &mut next[idx];
        record.status = DeploymentStatus::Active;
        record.updated_at = now;
        let activated = record.clone();

        self.persist(&next).await?;
        *records = next;
        Ok(activated)
    }

    /// Mark a provisioning record `failed`. Other records are untouched.
    pub async fn fail(&self, deployment_id: &str, reason: &str) -> Result<(), DeploymentError> {
        let mut records = self.records.lock().await;
        let idx = Self::position(&records, deployment_id)?;
        let mut next = records.clone();
        let record = &mut next[idx];
        record.status = DeploymentStatus::Failed;
        record.message = Some(reason.to_string());
        record.updated_at = Utc::now();
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    pub async fn records(&self, endpoint: &str, environment: Environment) -> Vec<DeploymentRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.endpoint_name == endpoint && r.environment == environment)
            .cloned()
            .collect()
    }

    pub async fn active(&self, endpoint: &str, environment: Environment) -> Option<DeploymentRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| {
                r.endpoint_name == endpoint
                    && r.environment == environment
                    && r.status == DeploymentStatus::Active
            })
            .cloned()
    }

    fn position(records: &[DeploymentRecord], deployment_id: &str) -> Result<usize, DeploymentError> {
        let idx = records
            .iter()
            .position(|r| r.deployment_id == deployment_id)
            .ok_or_else(|| DeploymentError::Ledger(format!("unknown deployment {deployment_id}")))?;
        if records[idx].status != DeploymentStatus::Provisioning {
            return Err(DeploymentError::Ledger(format!(
                "deployment {deployment_id} is {:?}, expected provisioning",
                records[idx].status
            )));
        }
        Ok(idx)
    }

    async fn persist(&self, records: &[DeploymentRecord]) -> Result<(), DeploymentError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let ledger_err = |e: &dyn std::fmt::Display| {
            DeploymentError::Ledger(format!("{}: {e}", path.display()))
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ledger_err(&e))?;
        }
        let bytes = serde_json::to_vec_pretty(records).map_err(|e| ledger_err(&e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| ledger_err(&e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| ledger_err(&e))?;
        Ok(())
    }
}
