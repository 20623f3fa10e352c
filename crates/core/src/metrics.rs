//! Metric samples recorded during training and their canonical names.
//!
//! The names are used as metric keys when samples are flattened for the
//! registry.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Host CPU utilisation, averaged over all cores (0-100).
pub const METRIC_CPU_PERCENT: &str = "cpu_percent";

/// Host memory in use as a percentage of total (0-100).
pub const METRIC_MEMORY_PERCENT: &str = "memory_percent";

/// GPU compute utilisation averaged over visible GPUs (0-100).
pub const METRIC_GPU_PERCENT: &str = "gpu_percent";

/// Most recent training loss reported by the trainer.
pub const METRIC_TRAINING_LOSS: &str = "training_loss";

/// One timestamped observation taken by the metrics sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: Timestamp,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// Omitted when the host has no usable GPU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_percent: Option<f32>,
    /// `None` until the trainer has reported its first epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
}

impl MetricSample {
    /// Flatten into `(name, value)` pairs, skipping absent fields.
    pub fn values(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![
            (METRIC_CPU_PERCENT, self.cpu_percent as f64),
            (METRIC_MEMORY_PERCENT, self.memory_percent as f64),
        ];
        if let Some(gpu) = self.gpu_percent {
            out.push((METRIC_GPU_PERCENT, gpu as f64));
        }
        if let Some(loss) = self.loss {
            out.push((METRIC_TRAINING_LOSS, loss));
        }
        out
    }
}
