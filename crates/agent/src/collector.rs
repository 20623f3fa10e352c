//! Host resource probes.
//!
//! [`HostProbe`] reads CPU and memory utilisation through `sysinfo` and GPU
//! utilisation through NVML. NVML initialisation is **gracefully
//! optional** -- if the host has no NVIDIA drivers (e.g. a developer
//! laptop), the probe logs a warning and reports no GPU reading instead of
//! failing.

use nvml_wrapper::Nvml;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// One utilisation snapshot, all values in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// `None` when no GPU is visible.
    pub gpu_percent: Option<f32>,
}

/// Source of utilisation readings for the sampler.
///
/// Implementations must be cheap to call; the sampler invokes
/// [`SystemProbe::read`] once per tick on its own task.
pub trait SystemProbe: Send + 'static {
    fn read(&mut self) -> ProbeReading;
}

impl<P: SystemProbe + ?Sized> SystemProbe for Box<P> {
    fn read(&mut self) -> ProbeReading {
        (**self).read()
    }
}

/// Probe for the machine the pipeline runs on.
pub struct HostProbe {
    system: System,
    /// Absent on hosts without NVIDIA drivers.
    nvml: Option<Nvml>,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::everything()),
        );

        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!(gpus = nvml.device_count().unwrap_or(0), "GPU probe ready");
                Some(nvml)
            }
            Err(e) => {
                tracing::warn!(error = %e, "NVML unavailable -- GPU utilisation will not be sampled");
                None
            }
        };

        Self { system, nvml }
    }

    /// GPUs the probe averages over; 0 without NVML.
    pub fn gpu_count(&self) -> u32 {
        self.nvml
            .as_ref()
            .and_then(|nvml| nvml.device_count().ok())
            .unwrap_or(0)
    }

    /// Mean utilisation across all visible GPUs.
    ///
    /// Devices that fail to report are skipped; if none report, the
    /// reading is `None`.
    fn gpu_utilisation(&self) -> Option<f32> {
        let nvml = self.nvml.as_ref()?;
        let count = match nvml.device_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to query GPU device count");
                return None;
            }
        };

        let readings: Vec<u32> = (0..count)
            .filter_map(|idx| match nvml.device_by_index(idx) {
                Ok(device) => device.utilization_rates().ok().map(|u| u.gpu),
                Err(e) => {
                    tracing::debug!(gpu_index = idx, error = %e, "Skipping GPU");
                    None
                }
            })
            .collect();

        if readings.is_empty() {
            return None;
        }
        Some(readings.iter().sum::<u32>() as f32 / readings.len() as f32)
    }
}

impl SystemProbe for HostProbe {
    fn read(&mut self) -> ProbeReading {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let total = self.system.total_memory();
        let memory_percent = if total > 0 {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        ProbeReading {
            cpu_percent,
            memory_percent,
            gpu_percent: self.gpu_utilisation(),
        }
    }
}
