//! Promotion environments and cloud vendor selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// One of the fixed promotion stages. Each has isolated storage and
/// deployment configuration in the `promotion` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Qa,
    Staging,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 4] = [Self::Dev, Self::Qa, Self::Staging, Self::Prod];

    /// Key used in the `promotion` block and in storage paths.
    pub fn name(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Qa => "qa",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "qa" => Ok(Self::Qa),
            "staging" => Ok(Self::Staging),
            "prod" => Ok(Self::Prod),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// CloudVendor
// ---------------------------------------------------------------------------

/// Which family of storage and deployment backends a run talks to.
///
/// Resolved once from `cloud_vendor` and never switched mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudVendor {
    /// S3 storage plus an HTTP endpoint control plane.
    Aws,
    /// Local filesystem storage and endpoint manifests (dev / tests).
    Local,
}

impl CloudVendor {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "aws" => Ok(Self::Aws),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::UnsupportedVendor(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Local => "local",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Aws => "Amazon Web Services",
            Self::Local => "Local Filesystem",
        }
    }
}
