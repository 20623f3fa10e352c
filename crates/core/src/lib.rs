//! `mlpromote-core` -- domain types shared by every pipeline crate.
//!
//! Nothing in here performs I/O beyond reading config files; cloud access,
//! metrics sampling and orchestration live in their own crates.

pub mod config;
pub mod dataset;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod model;
pub mod projection;
pub mod types;
