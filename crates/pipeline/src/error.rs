use std::fmt;

use serde::{Deserialize, Serialize};

use mlpromote_cloud::{DeploymentError, StorageError};
use mlpromote_core::dataset::DatasetFormatError;
use mlpromote_core::types::RunId;

use crate::orchestrator::Stage;

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Fetched data from {url} is malformed: {source}")]
    MalformedDownload {
        url: String,
        #[source]
        source: DatasetFormatError,
    },

    #[error(
        "Rejected {rejected} of {total} records ({rate:.3}), above the {threshold:.3} threshold"
    )]
    RejectionRateExceeded {
        rejected: usize,
        total: usize,
        rate: f64,
        threshold: f64,
    },
}

/// Training failures. None of these are retried; a replay restarts the
/// training stage from the processed dataset.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Training dataset has no usable rows")]
    EmptyDataset,

    #[error("Invalid training input: {0}")]
    InvalidInput(String),

    #[error("Loss became non-finite at epoch {epoch}")]
    Numerical { epoch: u32 },

    #[error("Insufficient resources: {0}")]
    Resource(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Training unit aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Run {0} not found")]
    RunNotFound(RunId),

    #[error("Run {run_id} is {status}, expected running")]
    RunNotRunning { run_id: RunId, status: String },

    #[error("No version of model {name} registered for {stage}")]
    ModelNotFound { name: String, stage: String },

    #[error("Registry persistence failed: {0}")]
    Persistence(String),
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse classification of a stage failure, stored on the run record
/// and reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataNotFound,
    StorageIo,
    MalformedData,
    Fetch,
    RejectionRate,
    InvalidInput,
    Numerical,
    Resource,
    Aborted,
    Registry,
    Provider,
    HealthCheckTimeout,
    Unhealthy,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataNotFound => "data_not_found",
            Self::StorageIo => "storage_io",
            Self::MalformedData => "malformed_data",
            Self::Fetch => "fetch",
            Self::RejectionRate => "rejection_rate",
            Self::InvalidInput => "invalid_input",
            Self::Numerical => "numerical",
            Self::Resource => "resource",
            Self::Aborted => "aborted",
            Self::Registry => "registry",
            Self::Provider => "provider",
            Self::HealthCheckTimeout => "health_check_timeout",
            Self::Unhealthy => "unhealthy",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::DataNotFound(_) => ErrorKind::DataNotFound,
        StorageError::Io { .. } => ErrorKind::StorageIo,
        StorageError::Format { .. } => ErrorKind::MalformedData,
    }
}

impl IngestionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) => storage_kind(e),
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::MalformedDownload { .. } => ErrorKind::MalformedData,
            Self::RejectionRateExceeded { .. } => ErrorKind::RejectionRate,
        }
    }
}

impl TrainingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyDataset | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Numerical { .. } => ErrorKind::Numerical,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Storage(e) => storage_kind(e),
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Registry
    }
}

pub(crate) fn deployment_kind(err: &DeploymentError) -> ErrorKind {
    match err {
        DeploymentError::HealthCheckTimeout { .. } => ErrorKind::HealthCheckTimeout,
        DeploymentError::Unhealthy { .. } => ErrorKind::Unhealthy,
        DeploymentError::Provider { .. }
        | DeploymentError::Ledger(_)
        | DeploymentError::Configuration(_) => ErrorKind::Provider,
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Terminal failure of a pipeline run: the stage that failed, the kind of
/// failure, and the run it was recorded against (if one was opened).
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed [{kind}]: {message}")]
pub struct PipelineError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    pub run_id: Option<RunId>,
}

impl PipelineError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        if self.kind == ErrorKind::Cancelled {
            7
        } else {
            self.stage.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_classify_by_variant() {
        let err = IngestionError::from(StorageError::DataNotFound("b/k".into()));
        assert_eq!(err.kind(), ErrorKind::DataNotFound);

        let err = TrainingError::from(StorageError::DataNotFound("b/k".into()));
        assert_eq!(err.kind(), ErrorKind::DataNotFound);
    }

    #[test]
    fn rejection_rate_message() {
        let err = IngestionError::RejectionRateExceeded {
            rejected: 3,
            total: 10,
            rate: 0.3,
            threshold: 0.2,
        };
        assert_eq!(
            err.to_string(),
            "Rejected 3 of 10 records (0.300), above the 0.200 threshold"
        );
        assert_eq!(err.kind(), ErrorKind::RejectionRate);
    }

    #[test]
    fn exit_code_follows_stage_unless_cancelled() {
        let err = PipelineError {
            stage: Stage::Training,
            kind: ErrorKind::Numerical,
            message: "nan".into(),
            run_id: None,
        };
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.to_string(), "training stage failed [numerical]: nan");

        let cancelled = PipelineError {
            kind: ErrorKind::Cancelled,
            ..err
        };
        assert_eq!(cancelled.exit_code(), 7);
    }

    #[test]
    fn deployment_timeout_classified() {
        let err = DeploymentError::HealthCheckTimeout {
            deployment_id: "d".into(),
            elapsed_ms: 1,
        };
        assert_eq!(deployment_kind(&err), ErrorKind::HealthCheckTimeout);
    }
}
