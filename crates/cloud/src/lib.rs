//! `mlpromote-cloud` -- vendor-neutral storage and deployment gateways.
//!
//! Each cloud vendor contributes one [`StorageGateway`](storage::StorageGateway)
//! and one [`EndpointProvider`](deploy::EndpointProvider). The pair is
//! selected once per run by [`CloudBackends::for_context`](backends::CloudBackends::for_context)
//! and held behind trait objects, so call sites never branch on the vendor.

pub mod backends;
pub mod deploy;
pub mod error;
pub mod retry;
pub mod storage;

pub use backends::CloudBackends;
pub use error::{DeploymentError, StorageError};
