//! Training stage.
//!
//! [`TrainingRunner`] prepares the feature matrix, runs the epochs of a
//! [`Trainable`] unit on the blocking pool (so the metrics sampler keeps
//! ticking), publishes each epoch's loss through the handoff slot and
//! writes the serialized model through the storage gateway.

use std::sync::Arc;

use serde::Serialize;

use mlpromote_agent::LossReporter;
use mlpromote_cloud::retry::{with_retry, RetryPolicy};
use mlpromote_cloud::storage::StorageGateway;
use mlpromote_core::config::{ExecutionContext, Hyperparameters};
use mlpromote_core::dataset::{DatasetHandle, DatasetLocation};
use mlpromote_core::model::ModelArtifactRef;

use crate::error::TrainingError;

mod features;
mod mlp;

pub use features::{FeatureMatrix, Scaler};
pub use mlp::{MlpRegressor, MlpWeights};

/// Artifact format identifier written into every model document.
pub const ARTIFACT_FORMAT: &str = "mlpromote.model.v1";

/// An opaque model that can be fitted one epoch at a time.
pub trait Trainable: Send {
    /// Fit one pass over `train` and return its mean training loss.
    fn fit_epoch(&mut self, train: &FeatureMatrix, epoch: u32) -> Result<f64, TrainingError>;

    /// Mean loss over `data`, or `None` when `data` is empty.
    fn evaluate(&self, data: &FeatureMatrix) -> Option<f64>;

    /// Model parameters as JSON, embedded in the artifact.
    fn export(&self) -> serde_json::Value;
}

/// Builds a fresh unit for `inputs` features.
pub type TrainableFactory =
    Arc<dyn Fn(usize, &Hyperparameters) -> Box<dyn Trainable> + Send + Sync>;

/// Factory for the built-in [`MlpRegressor`].
pub fn mlp_factory() -> TrainableFactory {
    Arc::new(|inputs: usize, hp: &Hyperparameters| {
        Box::new(MlpRegressor::new(
            inputs,
            hp.model_width,
            hp.learning_rate,
            hp.batch_size,
            hp.seed,
        )) as Box<dyn Trainable>
    })
}

/// Everything one training run needs besides the unit itself.
#[derive(Debug, Clone)]
pub struct TrainingJob<'a> {
    pub dataset: &'a DatasetHandle,
    pub hyperparameters: &'a Hyperparameters,
    pub target_column: &'a str,
    pub exclude_fields: &'a [String],
    pub artifact_location: DatasetLocation,
}

impl<'a> TrainingJob<'a> {
    pub fn for_context(ctx: &'a ExecutionContext, dataset: &'a DatasetHandle, run_id: &str) -> Self {
        Self {
            dataset,
            hyperparameters: &ctx.hyperparameters,
            target_column: &ctx.target_column,
            exclude_fields: &ctx.exclude_fields,
            artifact_location: ctx.artifact_location(run_id),
        }
    }
}

/// Summary of a finished training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifactRef,
    pub epoch_losses: Vec<f64>,
    pub validation_loss: Option<f64>,
    pub train_rows: usize,
    pub validation_rows: usize,
}

impl TrainingOutcome {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

#[derive(Serialize)]
struct ModelDocument<'a> {
    format: &'static str,
    feature_names: &'a [String],
    target_column: &'a str,
    scaler: &'a Scaler,
    hyperparameters: &'a Hyperparameters,
    epoch_losses: &'a [f64],
    validation_loss: Option<f64>,
    model: serde_json::Value,
}

pub struct TrainingRunner {
    storage: Arc<dyn StorageGateway>,
    factory: TrainableFactory,
}

impl TrainingRunner {
    pub fn new(storage: Arc<dyn StorageGateway>) -> Self {
        Self::with_factory(storage, mlp_factory())
    }

    pub fn with_factory(storage: Arc<dyn StorageGateway>, factory: TrainableFactory) -> Self {
        Self { storage, factory }
    }

    /// Train on `job.dataset` and persist the artifact.
    pub async fn run(
        &self,
        job: TrainingJob<'_>,
        reporter: LossReporter,
    ) -> Result<TrainingOutcome, TrainingError> {
        let hp = job.hyperparameters.clone();
        let matrix =
            FeatureMatrix::from_dataset(job.dataset, job.target_column, job.exclude_fields)?;
        let (mut train, mut validation) = matrix.split(hp.train_split, hp.seed);
        let scaler = train.fit_scaler();
        train.standardize(&scaler);
        validation.standardize(&scaler);

        tracing::info!(
            train_rows = train.len(),
            validation_rows = validation.len(),
            features = train.width(),
            epochs = hp.epochs,
            "Training started",
        );

        let unit = (self.factory)(train.width(), &hp);
        let epochs = hp.epochs;
        let fitted = tokio::task::spawn_blocking(move || {
            fit(unit, &train, epochs, &reporter).map(|(unit, losses)| (unit, losses, train))
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                TrainingError::Aborted(panic_message(e.into_panic()))
            } else {
                TrainingError::Aborted("training task was cancelled".into())
            }
        })?;
        let (unit, epoch_losses, train) = fitted?;

        let validation_loss = unit.evaluate(&validation);
        let document = ModelDocument {
            format: ARTIFACT_FORMAT,
            feature_names: &train.feature_names,
            target_column: job.target_column,
            scaler: &scaler,
            hyperparameters: &hp,
            epoch_losses: &epoch_losses,
            validation_loss,
            model: unit.export(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| TrainingError::InvalidInput(format!("model not serializable: {e}")))?;

        let policy = RetryPolicy::default();
        let artifact = with_retry(&policy, "write artifact", || {
            self.storage.write_artifact(&job.artifact_location, bytes.clone())
        })
        .await?;

        tracing::info!(
            artifact = %artifact.uri,
            final_loss = ?epoch_losses.last(),
            validation_loss = ?validation_loss,
            "Training complete",
        );

        Ok(TrainingOutcome {
            artifact,
            epoch_losses,
            validation_loss,
            train_rows: train.len(),
            validation_rows: validation.len(),
        })
    }
}

/// Blocking epoch loop.
fn fit(
    mut unit: Box<dyn Trainable>,
    train: &FeatureMatrix,
    epochs: u32,
    reporter: &LossReporter,
) -> Result<(Box<dyn Trainable>, Vec<f64>), TrainingError> {
    let mut losses = Vec::with_capacity(epochs as usize);
    for epoch in 1..=epochs {
        let loss = unit.fit_epoch(train, epoch)?;
        if !loss.is_finite() {
            return Err(TrainingError::Numerical { epoch });
        }
        reporter.report(loss);
        tracing::debug!(epoch, loss, "Epoch complete");
        losses.push(loss);
    }
    Ok((unit, losses))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "training unit panicked".to_string()
    }
}
