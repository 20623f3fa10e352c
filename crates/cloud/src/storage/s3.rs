//! Amazon S3 storage backend.
//!
//! Credentials come from the standard AWS provider chain; only the region
//! is taken from the execution context.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use mlpromote_core::dataset::DatasetLocation;

use super::StorageGateway;
use crate::error::StorageError;

/// S3 error codes that mean "the object is not there" rather than a
/// transport failure.
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NoSuchBucket", "NotFound"];

pub struct S3Storage {
    client: Client,
    region: String,
}

impl S3Storage {
    /// Build a client for `region` from the ambient AWS configuration.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        tracing::info!(region, "S3 storage client initialised");
        Self {
            client: Client::new(&config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl StorageGateway for S3Storage {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    async fn get_object(&self, location: &DatasetLocation) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|err| {
                let context = DisplayErrorContext(&err).to_string();
                let service = err.into_service_error();
                if service.is_no_such_key()
                    || service.code().is_some_and(|c| NOT_FOUND_CODES.contains(&c))
                {
                    StorageError::DataNotFound(location.to_string())
                } else {
                    StorageError::io(location, context)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::io(location, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(
        &self,
        location: &DatasetLocation,
        bytes: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| StorageError::io(location, DisplayErrorContext(&err)))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                StorageError::io(format!("{bucket}/{prefix}"), DisplayErrorContext(&err))
            })?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
        }
        keys.sort();
        Ok(keys)
    }
}
