//! Experiment tracking: runs, their metrics, and registered model versions.
//!
//! [`LocalRegistry`] keeps everything in memory and, when opened with a
//! path, mirrors it to a JSON file after every change so that a replayed
//! pipeline in a later process finds the same run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use mlpromote_core::config::ExecutionContext;
use mlpromote_core::environment::Environment;
use mlpromote_core::metrics::MetricSample;
use mlpromote_core::model::{ModelArtifactRef, ModelVersion};
use mlpromote_core::types::{RunId, Timestamp};

use crate::error::{ErrorKind, RegistryError};
use crate::orchestrator::Stage;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Where and why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded,
    Failed(RunFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub run_key: String,
    pub project: String,
    pub environment: Environment,
    pub model_name: String,
    /// Hyperparameters and config fingerprint the run was started with.
    pub params: serde_json::Value,
    pub metrics: Vec<MetricSample>,
    pub artifact: Option<ModelArtifactRef>,
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    /// Number of times this run key has been started.
    pub attempts: u32,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Open the run for `run_key`, creating it on first use.
    ///
    /// Starting a key that already exists reopens that run as `running`
    /// and bumps its attempt count; it never creates a second record.
    async fn start_run(
        &self,
        ctx: &ExecutionContext,
        run_key: &str,
    ) -> Result<RunRecord, RegistryError>;

    /// Append samples to the run's metric series.
    async fn log_metrics(&self, run_id: &str, samples: &[MetricSample])
        -> Result<(), RegistryError>;

    /// Register `artifact` as the next version of the run's model.
    ///
    /// Fails with [`RegistryError::RunNotRunning`] unless the run is
    /// `running`. Registering the same artifact twice from one run returns
    /// the existing version.
    async fn register_artifact(
        &self,
        run_id: &str,
        artifact: &ModelArtifactRef,
    ) -> Result<ModelVersion, RegistryError>;

    /// Latest artifact registered for `name` from `stage`.
    async fn get_model_version(
        &self,
        name: &str,
        stage: Environment,
    ) -> Result<ModelArtifactRef, RegistryError>;

    async fn finalize_run(
        &self,
        run_id: &str,
        outcome: RunOutcome,
    ) -> Result<RunRecord, RegistryError>;

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, RegistryError>;

    async fn find_run(&self, run_key: &str) -> Option<RunRecord>;
}

// ---------------------------------------------------------------------------
// LocalRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    runs: Vec<RunRecord>,
    versions: Vec<ModelVersion>,
}

impl RegistryState {
    fn run_mut(&mut self, run_id: &str) -> Result<&mut RunRecord, RegistryError> {
        self.runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))
    }
}

pub struct LocalRegistry {
    state: Mutex<RegistryState>,
    path: Option<PathBuf>,
}

impl LocalRegistry {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            path: None,
        }
    }

    /// Open (or create) a registry persisted at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| RegistryError::Persistence(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(e) => {
                return Err(RegistryError::Persistence(format!("{}: {e}", path.display())));
            }
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, state: &RegistryState) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persist_err =
            |e: &dyn std::fmt::Display| RegistryError::Persistence(format!("{}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persist_err(&e))?;
        }
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| persist_err(&e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| persist_err(&e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| persist_err(&e))?;
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for LocalRegistry {
    async fn start_run(
        &self,
        ctx: &ExecutionContext,
        run_key: &str,
    ) -> Result<RunRecord, RegistryError> {
        let mut state = self.state.lock().await;

        let existing = state.runs.iter().position(|r| r.run_key == run_key);
        let record = if let Some(idx) = existing {
            let existing = &mut state.runs[idx];
            existing.status = RunStatus::Running;
            existing.failure = None;
            existing.finished_at = None;
            existing.attempts += 1;
            tracing::info!(
                run_id = %existing.run_id,
                run_key,
                attempts = existing.attempts,
                "Reopened existing run",
            );
            existing.clone()
        } else {
            let record = RunRecord {
                run_id: Uuid::now_v7().to_string(),
                run_key: run_key.to_string(),
                project: ctx.project.clone(),
                environment: ctx.environment,
                model_name: ctx.model_name.clone(),
                params: serde_json::json!({
                    "hyperparameters": ctx.hyperparameters,
                    "config_fingerprint": ctx.config_fingerprint,
                }),
                metrics: Vec::new(),
                artifact: None,
                status: RunStatus::Running,
                failure: None,
                attempts: 1,
                started_at: Utc::now(),
                finished_at: None,
            };
            tracing::info!(run_id = %record.run_id, run_key, "Started run");
            state.runs.push(record.clone());
            record
        };

        self.persist(&state).await?;
        Ok(record)
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        samples: &[MetricSample],
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        state.run_mut(run_id)?.metrics.extend_from_slice(samples);
        self.persist(&state).await?;
        tracing::debug!(run_id, samples = samples.len(), "Logged metrics");
        Ok(())
    }

    async fn register_artifact(
        &self,
        run_id: &str,
        artifact: &ModelArtifactRef,
    ) -> Result<ModelVersion, RegistryError> {
        let mut state = self.state.lock().await;
        let run = state.run_mut(run_id)?;
        if run.status != RunStatus::Running {
            return Err(RegistryError::RunNotRunning {
                run_id: run_id.to_string(),
                status: run.status.as_str().to_string(),
            });
        }
        run.artifact = Some(artifact.clone());
        let name = run.model_name.clone();
        let stage = run.environment;

        if let Some(existing) = state
            .versions
            .iter()
            .find(|v| v.run_id == run_id && v.artifact.checksum == artifact.checksum)
        {
            return Ok(existing.clone());
        }

        let next = state
            .versions
            .iter()
            .filter(|v| v.name == name)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        let version = ModelVersion {
            name,
            version: next,
            run_id: run_id.to_string(),
            artifact: artifact.clone(),
            stage,
            created_at: Utc::now(),
        };
        state.versions.push(version.clone());
        self.persist(&state).await?;

        tracing::info!(run_id, model = %version.label(), "Registered model version");
        Ok(version)
    }

    async fn get_model_version(
        &self,
        name: &str,
        stage: Environment,
    ) -> Result<ModelArtifactRef, RegistryError> {
        self.state
            .lock()
            .await
            .versions
            .iter()
            .filter(|v| v.name == name && v.stage == stage)
            .max_by_key(|v| v.version)
            .map(|v| v.artifact.clone())
            .ok_or_else(|| RegistryError::ModelNotFound {
                name: name.to_string(),
                stage: stage.to_string(),
            })
    }

    async fn finalize_run(
        &self,
        run_id: &str,
        outcome: RunOutcome,
    ) -> Result<RunRecord, RegistryError> {
        let mut state = self.state.lock().await;
        let run = state.run_mut(run_id)?;
        match outcome {
            RunOutcome::Succeeded => {
                run.status = RunStatus::Succeeded;
                run.failure = None;
            }
            RunOutcome::Failed(failure) => {
                run.status = RunStatus::Failed;
                run.failure = Some(failure);
            }
        }
        run.finished_at = Some(Utc::now());
        let record = run.clone();
        self.persist(&state).await?;
        Ok(record)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, RegistryError> {
        self.state
            .lock()
            .await
            .runs
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
            .ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))
    }

    async fn find_run(&self, run_key: &str) -> Option<RunRecord> {
        self.state
            .lock()
            .await
            .runs
            .iter()
            .find(|r| r.run_key == run_key)
            .cloned()
    }
}
