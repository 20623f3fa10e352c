//! Ingestion stage: stage raw data, project it, write the processed dataset.
//!
//! ```text
//! [data_url] --GET--> raw snapshot --read--> project --write--> processed snapshot
//! ```
//!
//! Every run writes `<stem>_<YYYYmmdd_HHMMSS><ext>` under the raw and
//! processed prefixes. Without a `data_url` the newest raw snapshot is
//! read, falling back to the un-stamped raw object.
//!
//! Storage reads and writes go through [`with_retry`], so transient I/O is
//! retried with bounded backoff while a missing raw dataset fails at once.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use mlpromote_cloud::retry::{with_retry, RetryPolicy};
use mlpromote_cloud::storage::StorageGateway;
use mlpromote_core::config::ExecutionContext;
use mlpromote_core::dataset::{decode_records, encode_records, DatasetHandle};
use mlpromote_core::projection::Projector;

use crate::error::IngestionError;

/// Upper bound on a whole download, body included.
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on establishing the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Row counts and locations produced by one ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionStats {
    pub raw_rows: usize,
    pub accepted_rows: usize,
    pub rejected_rows: usize,
    pub raw_uri: String,
    pub processed_uri: String,
}

pub struct Ingestion {
    fetch_timeout: Duration,
}

impl Default for Ingestion {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestion {
    pub fn new() -> Self {
        Self::with_fetch_timeout(FETCH_TIMEOUT)
    }

    pub fn with_fetch_timeout(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }

    /// Run the stage for `ctx`. `data_url`, when set, is fetched and
    /// written as a new raw snapshot first.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        storage: &dyn StorageGateway,
        data_url: Option<&str>,
    ) -> Result<(DatasetHandle, IngestionStats), IngestionError> {
        let policy = RetryPolicy::from_ingestion(&ctx.ingestion);
        let started_at = Utc::now();

        let raw_location = match data_url {
            Some(url) => {
                let bytes = self.fetch(url).await?;
                let location = ctx.raw_snapshot_location(started_at);
                with_retry(&policy, "write raw", || {
                    storage.put_object(&location, bytes.clone())
                })
                .await?;
                tracing::info!(url, location = %location, "Staged downloaded data");
                location
            }
            None => {
                let keys = with_retry(&policy, "list raw", || {
                    storage.list_objects(&ctx.storage.bucket, &ctx.storage.raw_path)
                })
                .await?;
                let location = ctx.latest_raw_location(keys.iter().map(String::as_str));
                tracing::debug!(location = %location, snapshots = keys.len(), "Selected raw data");
                location
            }
        };

        let raw = with_retry(&policy, "read raw", || storage.read_dataset(&raw_location)).await?;

        let (records, schema, rejected) = if ctx.projection.selected_fields.is_empty() {
            tracing::info!("No selected fields configured; keeping raw columns");
            (raw.records.clone(), raw.schema.clone(), 0)
        } else {
            let projector = Projector::new(&ctx.projection);
            let outcome = projector.project_all(&raw.records);
            let rate = outcome.rejection_rate();

            if outcome.rejected > 0 {
                tracing::warn!(
                    rejected = outcome.rejected,
                    total = outcome.total(),
                    missing = ?outcome.missing_counts,
                    "Records rejected during projection",
                );
            }
            if rate > ctx.ingestion.max_rejection_rate {
                return Err(IngestionError::RejectionRateExceeded {
                    rejected: outcome.rejected,
                    total: outcome.total(),
                    rate,
                    threshold: ctx.ingestion.max_rejection_rate,
                });
            }
            (outcome.records, projector.schema(), outcome.rejected)
        };

        let processed = DatasetHandle {
            location: ctx.processed_snapshot_location(started_at),
            schema,
            records,
        };
        let processed_uri = with_retry(&policy, "write processed", || {
            storage.write_dataset(&processed, &processed.location)
        })
        .await?;

        let stats = IngestionStats {
            raw_rows: raw.len(),
            accepted_rows: processed.len(),
            rejected_rows: rejected,
            raw_uri: raw_location.uri(storage.scheme()),
            processed_uri,
        };
        tracing::info!(
            raw_rows = stats.raw_rows,
            accepted_rows = stats.accepted_rows,
            rejected_rows = stats.rejected_rows,
            processed = %stats.processed_uri,
            "Ingestion complete",
        );
        Ok((processed, stats))
    }

    /// Download a dataset (JSON Lines, JSON array or CSV) and normalise it
    /// to JSON Lines.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, IngestionError> {
        let fetch_err = |e: reqwest::Error| IngestionError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(self.fetch_timeout))
            .timeout(self.fetch_timeout)
            .build()
            .map_err(fetch_err)?;
        let response = client.get(url).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestionError::Fetch {
                url: url.to_string(),
                message: format!("server returned {}", status.as_u16()),
            });
        }
        let body = response.bytes().await.map_err(fetch_err)?;
        let records = decode_records(&body).map_err(|source| IngestionError::MalformedDownload {
            url: url.to_string(),
            source,
        })?;
        tracing::debug!(url, rows = records.len(), "Downloaded dataset");
        Ok(encode_records(&records))
    }
}
