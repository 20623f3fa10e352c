//! Model artifacts and registered versions.

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetLocation;
use crate::environment::Environment;
use crate::types::{RunId, Timestamp};

/// Reference to a serialized model written by the training runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifactRef {
    /// Backend URI, e.g. `s3://bucket/models/<run>/model.json`.
    pub uri: String,
    pub location: DatasetLocation,
    /// Hex SHA-256 of the artifact bytes.
    pub checksum: String,
    pub size_bytes: u64,
}

/// A registered, versioned model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    /// 1-based, increases monotonically per model name.
    pub version: u32,
    pub run_id: RunId,
    pub artifact: ModelArtifactRef,
    /// Promotion environment the version was registered from.
    pub stage: Environment,
    pub created_at: Timestamp,
}

impl ModelVersion {
    /// `<name>:<version>`, used as the deployed model label.
    pub fn label(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}
