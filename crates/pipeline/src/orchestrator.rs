//! Top-level pipeline state machine.
//!
//! ```text
//! Resolved -> Ingested -> Trained -> Registered -> Deployed
//!     \___________\__________\____________\______> Failed { stage, kind }
//! ```
//!
//! Each stage is attempted once. A failure records the stage and error
//! kind on the run, finalizes it as `failed` and stops; there is no
//! cross-stage retry. Replaying with the same run key reuses the run
//! record. Cancellation is observed between stages only.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use mlpromote_agent::{loss_channel, HostProbe, MetricsSampler, SystemProbe};
use mlpromote_cloud::deploy::DeploymentRecord;
use mlpromote_cloud::CloudBackends;
use mlpromote_core::config::ExecutionContext;
use mlpromote_core::model::ModelVersion;
use mlpromote_core::types::{RunId, Timestamp};

use crate::error::{deployment_kind, ErrorKind, PipelineError};
use crate::ingest::{Ingestion, IngestionStats};
use crate::registry::{ModelRegistry, RunFailure, RunOutcome};
use crate::training::{TrainableFactory, TrainingJob, TrainingOutcome, TrainingRunner};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// A pipeline stage that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Training,
    Registration,
    Deployment,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Training => "training",
            Self::Registration => "registration",
            Self::Deployment => "deployment",
        }
    }

    /// Process exit code reported when this stage fails.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ingestion => 3,
            Self::Training => 4,
            Self::Registration => 5,
            Self::Deployment => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Resolved,
    Ingested,
    Trained,
    Registered,
    Deployed,
    Failed { stage: Stage, kind: ErrorKind },
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => f.write_str("resolved"),
            Self::Ingested => f.write_str("ingested"),
            Self::Trained => f.write_str("trained"),
            Self::Registered => f.write_str("registered"),
            Self::Deployed => f.write_str("deployed"),
            Self::Failed { stage, kind } => write!(f, "failed({stage}/{kind})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub at: Timestamp,
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub run_key: String,
    pub attempt: u32,
    pub final_state: PipelineState,
    pub transitions: Vec<Transition>,
    pub ingestion: IngestionStats,
    pub training: TrainingOutcome,
    pub model_version: ModelVersion,
    pub deployment: DeploymentRecord,
    pub metric_samples: usize,
    /// False when the endpoint went live but the run record could not be
    /// closed; the run stays `running` in the registry.
    pub run_finalized: bool,
}

/// Tracks the current state and the transition history.
struct StateTracker {
    state: PipelineState,
    transitions: Vec<Transition>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: PipelineState::Resolved,
            transitions: Vec::new(),
        }
    }

    fn advance(&mut self, to: PipelineState) {
        debug_assert!(!self.state.is_terminal(), "transition out of terminal state");
        tracing::info!(from = %self.state, to = %to, "Pipeline transition");
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Builds the host probe for each training run.
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn SystemProbe> + Send + Sync>;

pub struct PipelineOrchestrator {
    ctx: Arc<ExecutionContext>,
    backends: CloudBackends,
    registry: Arc<dyn ModelRegistry>,
    ingestion: Ingestion,
    trainer: TrainingRunner,
    probe_factory: ProbeFactory,
    cancel: CancellationToken,
    data_url: Option<String>,
}

impl PipelineOrchestrator {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        backends: CloudBackends,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        let data_url = ctx.data_url.clone();
        Self {
            trainer: TrainingRunner::new(backends.storage.clone()),
            ingestion: Ingestion::new(),
            probe_factory: Arc::new(|| Box::new(HostProbe::new()) as Box<dyn SystemProbe>),
            cancel: CancellationToken::new(),
            ctx,
            backends,
            registry,
            data_url,
        }
    }

    pub fn with_trainable(mut self, factory: TrainableFactory) -> Self {
        self.trainer = TrainingRunner::with_factory(self.backends.storage.clone(), factory);
        self
    }

    pub fn with_probe(mut self, factory: ProbeFactory) -> Self {
        self.probe_factory = factory;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the configured `data_url`. `None` keeps the config value.
    pub fn with_data_url(mut self, url: Option<String>) -> Self {
        if url.is_some() {
            self.data_url = url;
        }
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Run only the ingestion stage. No run record is opened.
    pub async fn ingest_only(&self) -> Result<IngestionStats, PipelineError> {
        let ctx: &ExecutionContext = &self.ctx;
        self.ingestion
            .run(ctx, self.backends.storage.as_ref(), self.data_url.as_deref())
            .await
            .map(|(_, stats)| stats)
            .map_err(|e| PipelineError {
                stage: Stage::Ingestion,
                kind: e.kind(),
                message: e.to_string(),
                run_id: None,
            })
    }

    /// Drive the full pipeline for `run_key`.
    pub async fn run(&self, run_key: &str) -> Result<PipelineReport, PipelineError> {
        let ctx: &ExecutionContext = &self.ctx;
        let mut tracker = StateTracker::new();

        if self.cancel.is_cancelled() {
            return Err(PipelineError {
                stage: Stage::Ingestion,
                kind: ErrorKind::Cancelled,
                message: "cancelled before the run was opened".into(),
                run_id: None,
            });
        }

        let run = self
            .registry
            .start_run(ctx, run_key)
            .await
            .map_err(|e| PipelineError {
                stage: Stage::Registration,
                kind: e.kind(),
                message: format!("could not open run: {e}"),
                run_id: None,
            })?;
        let run_id = run.run_id.clone();

        tracing::info!(
            run_id = %run_id,
            run_key,
            attempt = run.attempts,
            project = %ctx.project,
            environment = %ctx.environment,
            vendor = ctx.cloud_vendor.name(),
            "Pipeline started",
        );

        // -- Ingestion ------------------------------------------------------
        self.checkpoint(&mut tracker, &run_id, Stage::Ingestion).await?;
        let (processed, ingestion) = match self
            .ingestion
            .run(ctx, self.backends.storage.as_ref(), self.data_url.as_deref())
            .await
        {
            Ok(out) => out,
            Err(e) => {
                return Err(self
                    .fail(&mut tracker, &run_id, Stage::Ingestion, e.kind(), e.to_string())
                    .await)
            }
        };
        tracker.advance(PipelineState::Ingested);

        // -- Training -------------------------------------------------------
        self.checkpoint(&mut tracker, &run_id, Stage::Training).await?;
        let (reporter, reader) = loss_channel();
        let sampler = MetricsSampler::start((self.probe_factory)(), ctx.metrics.interval(), reader);
        let trained = self
            .trainer
            .run(TrainingJob::for_context(ctx, &processed, &run_id), reporter)
            .await;
        let samples = sampler.stop().await;
        let flushed = self.registry.log_metrics(&run_id, &samples).await;

        let training = match (trained, flushed) {
            (Ok(outcome), Ok(())) => outcome,
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    tracing::error!(run_id = %run_id, error = %flush_err, "Failed to flush metrics");
                }
                return Err(self
                    .fail(&mut tracker, &run_id, Stage::Training, e.kind(), e.to_string())
                    .await);
            }
            (Ok(_), Err(e)) => {
                return Err(self
                    .fail(
                        &mut tracker,
                        &run_id,
                        Stage::Training,
                        e.kind(),
                        format!("failed to flush metrics: {e}"),
                    )
                    .await);
            }
        };
        tracker.advance(PipelineState::Trained);

        // -- Registration ---------------------------------------------------
        self.checkpoint(&mut tracker, &run_id, Stage::Registration).await?;
        let model_version = match self
            .registry
            .register_artifact(&run_id, &training.artifact)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                return Err(self
                    .fail(&mut tracker, &run_id, Stage::Registration, e.kind(), e.to_string())
                    .await)
            }
        };
        tracker.advance(PipelineState::Registered);

        // -- Deployment -----------------------------------------------------
        self.checkpoint(&mut tracker, &run_id, Stage::Deployment).await?;
        let deployment = match self
            .backends
            .deployment
            .deploy(&model_version, &ctx.deployment, ctx.environment)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let kind = deployment_kind(&e);
                return Err(self
                    .fail(&mut tracker, &run_id, Stage::Deployment, kind, e.to_string())
                    .await);
            }
        };
        tracker.advance(PipelineState::Deployed);

        // The endpoint is already serving, so a bookkeeping failure here
        // does not fail the run.
        let run_finalized = match self
            .registry
            .finalize_run(&run_id, RunOutcome::Succeeded)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    deployment_id = %deployment.deployment_id,
                    error = %e,
                    "Deployed, but could not finalize the run record",
                );
                false
            }
        };

        tracing::info!(
            run_id = %run_id,
            model = %model_version.label(),
            deployment_id = %deployment.deployment_id,
            "Pipeline complete",
        );

        Ok(PipelineReport {
            run_id,
            run_key: run_key.to_string(),
            attempt: run.attempts,
            final_state: tracker.state,
            transitions: tracker.transitions,
            ingestion,
            training,
            model_version,
            deployment,
            metric_samples: samples.len(),
            run_finalized,
        })
    }

    /// Fail with [`ErrorKind::Cancelled`] if cancellation was requested
    /// before `next` starts.
    async fn checkpoint(
        &self,
        tracker: &mut StateTracker,
        run_id: &str,
        next: Stage,
    ) -> Result<(), PipelineError> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        tracing::warn!(run_id, stage = %next, "Cancellation requested, stopping before stage");
        Err(self
            .fail(
                tracker,
                run_id,
                next,
                ErrorKind::Cancelled,
                format!("cancelled before {next}"),
            )
            .await)
    }

    /// Move to `Failed`, finalize the run and build the terminal error.
    async fn fail(
        &self,
        tracker: &mut StateTracker,
        run_id: &str,
        stage: Stage,
        kind: ErrorKind,
        message: String,
    ) -> PipelineError {
        tracker.advance(PipelineState::Failed { stage, kind });
        tracing::error!(run_id, stage = %stage, kind = %kind, error = %message, "Pipeline failed");

        let failure = RunFailure {
            stage,
            kind,
            message: message.clone(),
        };
        if let Err(e) = self
            .registry
            .finalize_run(run_id, RunOutcome::Failed(failure))
            .await
        {
            tracing::error!(run_id, error = %e, "Failed to finalize run as failed");
        }

        PipelineError {
            stage,
            kind,
            message,
            run_id: Some(run_id.to_string()),
        }
    }
}
