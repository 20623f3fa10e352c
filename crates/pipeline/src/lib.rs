//! `mlpromote-pipeline` -- the stages of a training-and-deployment run and
//! the orchestrator that sequences them.

pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod registry;
pub mod training;

pub use error::{ErrorKind, IngestionError, PipelineError, RegistryError, TrainingError};
pub use ingest::{Ingestion, IngestionStats};
pub use orchestrator::{PipelineOrchestrator, PipelineReport, PipelineState, Stage};
pub use registry::{LocalRegistry, ModelRegistry, RunRecord, RunStatus};
pub use training::{Trainable, TrainingRunner};
