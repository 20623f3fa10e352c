use mlpromote_core::dataset::DatasetFormatError;

/// Errors from a [`StorageGateway`](crate::storage::StorageGateway).
///
/// Only [`StorageError::Io`] is transient; callers may retry it with
/// [`with_retry`](crate::retry::with_retry). Everything else is final.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Dataset not found at {0}")]
    DataNotFound(String),

    #[error("Storage I/O error at {location}: {message}")]
    Io { location: String, message: String },

    #[error("Malformed dataset at {location}: {source}")]
    Format {
        location: String,
        #[source]
        source: DatasetFormatError,
    },
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub(crate) fn io(location: impl ToString, message: impl ToString) -> Self {
        Self::Io {
            location: location.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors from a deployment attempt.
///
/// A failed attempt never touches the endpoint's previous active record.
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("Deployment {deployment_id}: provider error: {message}")]
    Provider {
        deployment_id: String,
        message: String,
    },

    #[error("Deployment {deployment_id}: health check timed out after {elapsed_ms}ms")]
    HealthCheckTimeout {
        deployment_id: String,
        elapsed_ms: u64,
    },

    #[error("Deployment {deployment_id}: endpoint reported unhealthy: {reason}")]
    Unhealthy {
        deployment_id: String,
        reason: String,
    },

    #[error("Deployment ledger error: {0}")]
    Ledger(String),

    #[error("Deployment backend misconfigured: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_is_retryable() {
        assert!(StorageError::io("b/k", "connection reset").is_retryable());
        assert!(!StorageError::DataNotFound("b/k".into()).is_retryable());
    }

    #[test]
    fn display_timeout() {
        let err = DeploymentError::HealthCheckTimeout {
            deployment_id: "d-1".into(),
            elapsed_ms: 600_000,
        };
        assert_eq!(
            err.to_string(),
            "Deployment d-1: health check timed out after 600000ms"
        );
    }
}
