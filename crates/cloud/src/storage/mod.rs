//! Storage capability interface and its vendor implementations.
//!
//! Backends only implement raw object access ([`StorageGateway::get_object`],
//! [`StorageGateway::put_object`], [`StorageGateway::list_objects`]); dataset
//! encoding is shared through the
//! provided methods so every vendor reads and writes the same JSON Lines
//! format.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use mlpromote_core::dataset::{decode_records, encode_records, DatasetHandle, DatasetLocation};
use mlpromote_core::model::ModelArtifactRef;

use crate::error::StorageError;

pub mod local;
pub mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// URI scheme for locations on this backend (`s3`, `file`).
    fn scheme(&self) -> &'static str;

    /// Fetch an object's bytes.
    ///
    /// Fails with [`StorageError::DataNotFound`] when the object does not
    /// exist and [`StorageError::Io`] on transport failures.
    async fn get_object(&self, location: &DatasetLocation) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite an object.
    async fn put_object(&self, location: &DatasetLocation, bytes: Vec<u8>)
        -> Result<(), StorageError>;

    /// Keys in `bucket` that start with `prefix`, sorted. A bucket with no
    /// matching objects yields an empty list.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Read a dataset and infer its raw schema.
    async fn read_dataset(&self, location: &DatasetLocation) -> Result<DatasetHandle, StorageError> {
        let bytes = self.get_object(location).await?;
        let records = decode_records(&bytes).map_err(|source| StorageError::Format {
            location: location.to_string(),
            source,
        })?;
        tracing::debug!(%location, rows = records.len(), "Read dataset");
        Ok(DatasetHandle::raw(location.clone(), records))
    }

    /// Persist `handle`'s records at `location`; returns the object URI.
    async fn write_dataset(
        &self,
        handle: &DatasetHandle,
        location: &DatasetLocation,
    ) -> Result<String, StorageError> {
        self.put_object(location, encode_records(&handle.records)).await?;
        let uri = location.uri(self.scheme());
        tracing::debug!(uri = %uri, rows = handle.len(), "Wrote dataset");
        Ok(uri)
    }

    /// Persist a model artifact and describe it.
    async fn write_artifact(
        &self,
        location: &DatasetLocation,
        bytes: Vec<u8>,
    ) -> Result<ModelArtifactRef, StorageError> {
        let checksum = Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        let size_bytes = bytes.len() as u64;
        self.put_object(location, bytes).await?;
        Ok(ModelArtifactRef {
            uri: location.uri(self.scheme()),
            location: location.clone(),
            checksum,
            size_bytes,
        })
    }
}
