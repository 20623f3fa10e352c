//! `mlpromote-agent` -- host metrics sampling alongside training.
//!
//! [`sampler::MetricsSampler`] runs as a background tokio task, polling a
//! [`collector::SystemProbe`] at a fixed interval and pairing each reading
//! with the latest training loss published through the
//! [`handoff`] slot.

pub mod collector;
pub mod handoff;
pub mod sampler;

pub use collector::{HostProbe, ProbeReading, SystemProbe};
pub use handoff::{loss_channel, LossReader, LossReporter};
pub use sampler::{MetricsSampler, SamplerHandle};
