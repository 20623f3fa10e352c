/// Errors raised while turning the JSON config documents into an
/// [`ExecutionContext`](crate::config::ExecutionContext).
///
/// All of these are fatal and happen before a run is opened.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown environment '{0}'. Must be one of: dev, qa, staging, prod")]
    UnknownEnvironment(String),

    #[error("Environment '{0}' has no entry in the promotion block")]
    EnvironmentNotPromoted(String),

    #[error("Required field '{path}' is missing or empty after merge")]
    MissingField { path: String },

    #[error("Invalid value for '{path}': {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("Unsupported cloud vendor '{0}'. Must be one of: aws, local")]
    UnsupportedVendor(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn missing(path: impl Into<String>) -> Self {
        Self::MissingField { path: path.into() }
    }

    pub(crate) fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_field() {
        let err = ConfigError::missing("storage.bucket");
        assert_eq!(
            err.to_string(),
            "Required field 'storage.bucket' is missing or empty after merge"
        );
    }

    #[test]
    fn display_invalid_value() {
        let err = ConfigError::invalid("model.epochs", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid value for 'model.epochs': must be greater than zero"
        );
    }
}
