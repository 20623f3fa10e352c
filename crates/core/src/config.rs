//! Configuration resolution.
//!
//! [`ConfigResolver`] merges the global config document with the selected
//! environment's `promotion` block and validates the result into an
//! immutable [`ExecutionContext`]. Resolution has no side effects; the only
//! I/O is in [`ConfigResolver::from_files`].
//!
//! Merge policy: objects merge key-by-key with environment keys winning,
//! arrays and scalars are replaced wholesale.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::dataset::{latest_snapshot, snapshot_key, DatasetLocation};
use crate::environment::{CloudVendor, Environment};
use crate::error::ConfigError;
use crate::projection::ProjectionConfig;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_VENDOR: &str = "aws";
pub const DEFAULT_TRAIN_SPLIT: f64 = 0.8;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TARGET_COLUMN: &str = "target_column";
pub const DEFAULT_ARTIFACT_PATH: &str = "models/";
pub const DEFAULT_FILE_NAME: &str = "data.jsonl";
pub const DEFAULT_MAX_REJECTION_RATE: f64 = 0.2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
pub const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 10;

/// Storage retries never exceed this many attempts in total.
pub const MAX_STORAGE_ATTEMPTS: u32 = 3;

const PROMOTION_KEY: &str = "promotion";

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Storage locations for one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageLocations {
    /// Bucket (S3) or container / root directory name.
    pub bucket: String,
    pub raw_path: String,
    pub processed_path: String,
    pub artifact_path: String,
    /// Object name used under both the raw and processed prefixes.
    pub file_name: String,
}

/// Where and how the serving endpoint is provisioned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentTarget {
    pub endpoint_name: String,
    pub instance_class: String,
    pub region: String,
    pub image_uri: String,
    pub instance_count: u32,
}

/// Training hyperparameters. `seed` makes the split reproducible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hyperparameters {
    pub batch_size: usize,
    pub epochs: u32,
    pub learning_rate: f64,
    pub model_width: usize,
    pub train_split: f64,
    pub seed: u64,
}

/// Ingestion limits: rejection threshold and storage retry policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionPolicy {
    /// Fraction of raw records (0..=1) that may be rejected before
    /// ingestion fails.
    pub max_rejection_rate: f64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl IngestionPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerSettings {
    pub interval_ms: u64,
}

impl SamplerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Health-check policy for deployments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolloutSettings {
    pub health_check_timeout_ms: u64,
    pub health_check_interval_ms: u64,
}

impl RolloutSettings {
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Resolved, immutable configuration for one pipeline run.
///
/// Built once by [`ConfigResolver::resolve`] and shared read-only (usually
/// behind an `Arc`) for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionContext {
    pub project: String,
    pub environment: Environment,
    pub cloud_vendor: CloudVendor,
    pub storage: StorageLocations,
    pub deployment: DeploymentTarget,
    pub hyperparameters: Hyperparameters,
    pub model_name: String,
    pub target_column: String,
    /// Selected columns that are never fed to the model as features.
    pub exclude_fields: Vec<String>,
    pub data_url: Option<String>,
    pub control_plane_url: Option<String>,
    pub ingestion: IngestionPolicy,
    pub metrics: SamplerSettings,
    pub rollout: RolloutSettings,
    pub projection: ProjectionConfig,
    /// SHA-256 over the merged document and projection config.
    pub config_fingerprint: String,
}

impl ExecutionContext {
    /// Un-stamped raw object, read when no raw snapshot exists.
    pub fn raw_location(&self) -> DatasetLocation {
        DatasetLocation::new(
            &self.storage.bucket,
            format!("{}{}", self.storage.raw_path, self.storage.file_name),
        )
    }

    pub fn raw_snapshot_location(&self, at: DateTime<Utc>) -> DatasetLocation {
        DatasetLocation::new(
            &self.storage.bucket,
            snapshot_key(&self.storage.raw_path, &self.storage.file_name, at),
        )
    }

    pub fn processed_snapshot_location(&self, at: DateTime<Utc>) -> DatasetLocation {
        DatasetLocation::new(
            &self.storage.bucket,
            snapshot_key(&self.storage.processed_path, &self.storage.file_name, at),
        )
    }

    /// Newest raw snapshot among `keys`, falling back to [`Self::raw_location`].
    pub fn latest_raw_location<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> DatasetLocation {
        match latest_snapshot(keys, &self.storage.raw_path, &self.storage.file_name) {
            Some(key) => DatasetLocation::new(&self.storage.bucket, key),
            None => self.raw_location(),
        }
    }

    /// Location of the serialized model for a run.
    pub fn artifact_location(&self, run_id: &str) -> DatasetLocation {
        DatasetLocation::new(
            &self.storage.bucket,
            format!("{}{}/model.json", self.storage.artifact_path, run_id),
        )
    }

    /// Run key used when the operator does not supply one. Identical
    /// configs produce identical keys, so a replay reuses the same run.
    pub fn default_run_key(&self) -> String {
        let short = &self.config_fingerprint[..12.min(self.config_fingerprint.len())];
        format!("{}-{}-{}", self.project, self.environment, short)
    }
}

// ---------------------------------------------------------------------------
// ConfigResolver
// ---------------------------------------------------------------------------

/// Holds the two input documents and resolves them per environment.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    base: Value,
    projection: ProjectionConfig,
}

impl ConfigResolver {
    pub fn new(base: Value, projection: ProjectionConfig) -> Self {
        Self { base, projection }
    }

    /// Load the global config and the field-projection config from disk.
    pub fn from_files(global: &Path, projection: &Path) -> Result<Self, ConfigError> {
        let base = read_json(global)?;
        let projection: ProjectionConfig = serde_json::from_value(read_json(projection)?)?;
        Ok(Self::new(base, projection))
    }

    /// Fill in `project` when the global document does not name one.
    pub fn with_default_project(mut self, project: &str) -> Self {
        if let Value::Object(obj) = &mut self.base {
            obj.entry("project")
                .or_insert_with(|| Value::String(project.to_string()));
        }
        self
    }

    pub fn projection(&self) -> &ProjectionConfig {
        &self.projection
    }

    /// Environments that have a `promotion` entry, in promotion order.
    pub fn promoted_environments(&self) -> Vec<Environment> {
        let Some(block) = self.base.get(PROMOTION_KEY).and_then(Value::as_object) else {
            return Vec::new();
        };
        Environment::ALL
            .into_iter()
            .filter(|env| block.contains_key(env.name()))
            .collect()
    }

    /// Resolve `environment_name` into an [`ExecutionContext`].
    pub fn resolve(&self, environment_name: &str) -> Result<ExecutionContext, ConfigError> {
        let environment: Environment = environment_name.parse()?;

        let base = self
            .base
            .as_object()
            .ok_or_else(|| ConfigError::invalid("$", "global config must be a JSON object"))?;

        let overlay = base
            .get(PROMOTION_KEY)
            .and_then(Value::as_object)
            .and_then(|block| block.get(environment.name()))
            .ok_or_else(|| ConfigError::EnvironmentNotPromoted(environment.name().to_string()))?;

        let without_promotion: Map<String, Value> = base
            .iter()
            .filter(|(k, _)| k.as_str() != PROMOTION_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut merged = Value::Object(without_promotion);
        merge_overlay(&mut merged, overlay);

        let fingerprint = fingerprint(&merged, &self.projection);
        build_context(&merged, environment, self.projection.clone(), fingerprint)
    }
}

/// Deep-merge `overlay` into `target`.
///
/// Objects merge recursively; any other overlay value (including arrays)
/// replaces the target value at that path.
pub fn merge_overlay(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(t), Value::Object(o)) => {
            for (key, value) in o {
                match t.get_mut(key) {
                    Some(existing) => merge_overlay(existing, value),
                    None => {
                        t.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (t, o) => *t = o.clone(),
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn fingerprint(merged: &Value, projection: &ProjectionConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(merged.to_string().as_bytes());
    // ProjectionConfig only holds strings, serialization cannot fail.
    if let Ok(p) = serde_json::to_vec(projection) {
        hasher.update(&p);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |node, segment| node.get(segment))
        .filter(|v| !v.is_null())
}

fn optional_str(doc: &Value, path: &str) -> Result<Option<String>, ConfigError> {
    match lookup(doc, path) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ConfigError::invalid(path, "expected a string")),
    }
}

fn require_str(doc: &Value, path: &str) -> Result<String, ConfigError> {
    optional_str(doc, path)?.ok_or_else(|| ConfigError::missing(path))
}

fn optional_u64(doc: &Value, path: &str) -> Result<Option<u64>, ConfigError> {
    match lookup(doc, path) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(path, "expected a non-negative integer")),
    }
}

fn require_u64(doc: &Value, path: &str) -> Result<u64, ConfigError> {
    optional_u64(doc, path)?.ok_or_else(|| ConfigError::missing(path))
}

fn optional_f64(doc: &Value, path: &str) -> Result<Option<f64>, ConfigError> {
    match lookup(doc, path) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(path, "expected a number")),
    }
}

fn require_f64(doc: &Value, path: &str) -> Result<f64, ConfigError> {
    optional_f64(doc, path)?.ok_or_else(|| ConfigError::missing(path))
}

fn optional_str_list(doc: &Value, path: &str) -> Result<Option<Vec<String>>, ConfigError> {
    match lookup(doc, path) {
        None => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::invalid(path, "expected an array of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(ConfigError::invalid(path, "expected an array of strings")),
    }
}

fn positive_u64(doc: &Value, path: &str) -> Result<u64, ConfigError> {
    let value = require_u64(doc, path)?;
    if value == 0 {
        return Err(ConfigError::invalid(path, "must be greater than zero"));
    }
    Ok(value)
}

fn positive_u32(doc: &Value, path: &str) -> Result<u32, ConfigError> {
    u32::try_from(positive_u64(doc, path)?)
        .map_err(|_| ConfigError::invalid(path, format!("must be at most {}", u32::MAX)))
}

fn positive_usize(doc: &Value, path: &str) -> Result<usize, ConfigError> {
    usize::try_from(positive_u64(doc, path)?)
        .map_err(|_| ConfigError::invalid(path, "out of range for this platform"))
}

fn secs_to_ms(path: &str, secs: u64) -> Result<u64, ConfigError> {
    secs.checked_mul(1000)
        .ok_or_else(|| ConfigError::invalid(path, "too large to express in milliseconds"))
}

fn build_context(
    doc: &Value,
    environment: Environment,
    projection: ProjectionConfig,
    config_fingerprint: String,
) -> Result<ExecutionContext, ConfigError> {
    let project = require_str(doc, "project")?;
    let vendor_name = optional_str(doc, "cloud_vendor")?.unwrap_or_else(|| DEFAULT_VENDOR.into());
    let cloud_vendor = CloudVendor::from_name(&vendor_name)?;

    let storage = StorageLocations {
        bucket: require_str(doc, "storage.bucket")?,
        raw_path: require_str(doc, "storage.raw_path")?,
        processed_path: require_str(doc, "storage.processed_path")?,
        artifact_path: optional_str(doc, "storage.artifact_path")?
            .unwrap_or_else(|| DEFAULT_ARTIFACT_PATH.into()),
        file_name: optional_str(doc, "storage.file_name")?
            .unwrap_or_else(|| DEFAULT_FILE_NAME.into()),
    };

    let instance_count = match optional_u64(doc, "deployment.instance_count")? {
        None => 1,
        Some(_) => positive_u32(doc, "deployment.instance_count")?,
    };
    let deployment = DeploymentTarget {
        endpoint_name: optional_str(doc, "deployment.endpoint_name")?
            .unwrap_or_else(|| format!("{project}-endpoint")),
        instance_class: require_str(doc, "deployment.instance_type")?,
        region: require_str(doc, "deployment.region")?,
        image_uri: require_str(doc, "deployment.image_uri")?,
        instance_count,
    };

    let learning_rate = require_f64(doc, "model.learning_rate")?;
    if !(learning_rate.is_finite() && learning_rate > 0.0) {
        return Err(ConfigError::invalid(
            "model.learning_rate",
            "must be a positive number",
        ));
    }
    let train_split = optional_f64(doc, "model.train_split")?.unwrap_or(DEFAULT_TRAIN_SPLIT);
    if !(train_split > 0.0 && train_split <= 1.0) {
        return Err(ConfigError::invalid(
            "model.train_split",
            "must be in the range (0, 1]",
        ));
    }
    let hyperparameters = Hyperparameters {
        batch_size: positive_usize(doc, "model.batch_size")?,
        epochs: positive_u32(doc, "model.epochs")?,
        learning_rate,
        model_width: positive_usize(doc, "model.model_width")?,
        train_split,
        seed: optional_u64(doc, "model.seed")?.unwrap_or(DEFAULT_SEED),
    };

    let max_rejection_rate = optional_f64(doc, "ingestion.max_rejection_rate")?
        .unwrap_or(DEFAULT_MAX_REJECTION_RATE);
    if !(0.0..=1.0).contains(&max_rejection_rate) {
        return Err(ConfigError::invalid(
            "ingestion.max_rejection_rate",
            "must be in the range [0, 1]",
        ));
    }
    let max_attempts = optional_u64(doc, "ingestion.max_attempts")?
        .unwrap_or(u64::from(DEFAULT_MAX_ATTEMPTS));
    let max_attempts = u32::try_from(max_attempts)
        .ok()
        .filter(|n| (1..=MAX_STORAGE_ATTEMPTS).contains(n))
        .ok_or_else(|| {
            ConfigError::invalid(
                "ingestion.max_attempts",
                format!("must be between 1 and {MAX_STORAGE_ATTEMPTS}"),
            )
        })?;
    let ingestion = IngestionPolicy {
        max_rejection_rate,
        max_attempts,
        initial_backoff_ms: optional_u64(doc, "ingestion.initial_backoff_ms")?
            .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
    };

    let interval_secs =
        optional_u64(doc, "metrics.interval_secs")?.unwrap_or(DEFAULT_SAMPLE_INTERVAL_SECS);
    if interval_secs == 0 {
        return Err(ConfigError::invalid(
            "metrics.interval_secs",
            "must be greater than zero",
        ));
    }

    let rollout = RolloutSettings {
        health_check_timeout_ms: secs_to_ms(
            "deployment.health_check_timeout_secs",
            optional_u64(doc, "deployment.health_check_timeout_secs")?
                .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
        )?,
        health_check_interval_ms: secs_to_ms(
            "deployment.health_check_interval_secs",
            optional_u64(doc, "deployment.health_check_interval_secs")?
                .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_SECS)
                .max(1),
        )?,
    };

    Ok(ExecutionContext {
        model_name: optional_str(doc, "model.name")?.unwrap_or_else(|| project.clone()),
        target_column: optional_str(doc, "model.target_column")?
            .unwrap_or_else(|| DEFAULT_TARGET_COLUMN.into()),
        exclude_fields: optional_str_list(doc, "model.exclude_fields")?
            .unwrap_or_else(|| vec!["timestamp".to_string()]),
        data_url: optional_str(doc, "data_url")?.or_else(|| {
            projection
                .data_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
        }),
        control_plane_url: optional_str(doc, "control_plane_url")?,
        project,
        environment,
        cloud_vendor,
        storage,
        deployment,
        hyperparameters,
        ingestion,
        metrics: SamplerSettings {
            interval_ms: secs_to_ms("metrics.interval_secs", interval_secs)?,
        },
        rollout,
        projection,
        config_fingerprint,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn base_config() -> Value {
        json!({
            "project": "yf",
            "cloud_vendor": "local",
            "model": {
                "batch_size": 32,
                "epochs": 10,
                "learning_rate": 0.01,
                "model_width": 16,
                "exclude_fields": ["timestamp", "id"]
            },
            "storage": { "artifact_path": "artifacts/" },
            "deployment": { "instance_type": "ml.m5.large" },
            "promotion": {
                "dev": {
                    "storage": { "bucket": "yf-dev", "raw_path": "raw/", "processed_path": "processed/" },
                    "deployment": { "region": "us-east-1", "image_uri": "registry/yf:dev" },
                    "model": { "epochs": 2, "exclude_fields": ["timestamp"] }
                },
                "prod": {
                    "storage": { "bucket": "yf-prod", "raw_path": "raw/", "processed_path": "processed/" },
                    "deployment": {
                        "region": "eu-west-1",
                        "image_uri": "registry/yf:1.0",
                        "instance_type": "ml.c5.xlarge"
                    }
                }
            }
        })
    }

    fn resolver(base: Value) -> ConfigResolver {
        ConfigResolver::new(base, ProjectionConfig::default())
    }

    #[test]
    fn resolves_dev_with_environment_overrides() {
        let ctx = resolver(base_config()).resolve("dev").unwrap();

        assert_eq!(ctx.environment, Environment::Dev);
        assert_eq!(ctx.cloud_vendor, CloudVendor::Local);
        assert_eq!(ctx.storage.bucket, "yf-dev");
        assert_eq!(ctx.storage.artifact_path, "artifacts/");
        assert_eq!(ctx.hyperparameters.epochs, 2);
        assert_eq!(ctx.hyperparameters.batch_size, 32);
        assert_eq!(ctx.deployment.instance_class, "ml.m5.large");
        assert_eq!(ctx.deployment.endpoint_name, "yf-endpoint");
    }

    #[test]
    fn environment_scalar_overrides_base_scalar() {
        let ctx = resolver(base_config()).resolve("prod").unwrap();
        assert_eq!(ctx.deployment.instance_class, "ml.c5.xlarge");
        assert_eq!(ctx.deployment.region, "eu-west-1");
        assert_eq!(ctx.hyperparameters.epochs, 10);
    }

    #[test]
    fn arrays_are_replaced_not_merged() {
        let ctx = resolver(base_config()).resolve("dev").unwrap();
        assert_eq!(ctx.exclude_fields, vec!["timestamp".to_string()]);
    }

    #[test]
    fn every_promoted_environment_has_non_empty_required_fields() {
        let r = resolver(base_config());
        for env in r.promoted_environments() {
            let ctx = r.resolve(env.name()).unwrap();
            assert!(!ctx.storage.bucket.is_empty());
            assert!(!ctx.storage.raw_path.is_empty());
            assert!(!ctx.storage.processed_path.is_empty());
            assert!(!ctx.deployment.region.is_empty());
            assert!(!ctx.deployment.image_uri.is_empty());
            assert!(!ctx.deployment.instance_class.is_empty());
            assert!(ctx.hyperparameters.batch_size > 0);
            assert!(ctx.hyperparameters.epochs > 0);
            assert!(ctx.hyperparameters.learning_rate > 0.0);
            assert!(ctx.hyperparameters.model_width > 0);
        }
    }

    #[test]
    fn environment_missing_from_promotion_block_fails() {
        assert_matches!(
            resolver(base_config()).resolve("staging"),
            Err(ConfigError::EnvironmentNotPromoted(env)) if env == "staging"
        );
    }

    #[test]
    fn unknown_environment_name_fails() {
        assert_matches!(
            resolver(base_config()).resolve("sandbox"),
            Err(ConfigError::UnknownEnvironment(_))
        );
    }

    #[test]
    fn missing_bucket_fails() {
        let mut base = base_config();
        base["promotion"]["dev"]["storage"]
            .as_object_mut()
            .unwrap()
            .remove("bucket");
        assert_matches!(
            resolver(base).resolve("dev"),
            Err(ConfigError::MissingField { path }) if path == "storage.bucket"
        );
    }

    #[test]
    fn empty_image_counts_as_missing() {
        let mut base = base_config();
        base["promotion"]["dev"]["deployment"]["image_uri"] = json!("  ");
        assert_matches!(
            resolver(base).resolve("dev"),
            Err(ConfigError::MissingField { path }) if path == "deployment.image_uri"
        );
    }

    #[test]
    fn missing_hyperparameter_fails() {
        let mut base = base_config();
        base["model"].as_object_mut().unwrap().remove("learning_rate");
        assert_matches!(
            resolver(base).resolve("prod"),
            Err(ConfigError::MissingField { path }) if path == "model.learning_rate"
        );
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let mut base = base_config();
        base["model"]["batch_size"] = json!(0);
        assert_matches!(
            resolver(base).resolve("dev"),
            Err(ConfigError::InvalidValue { path, .. }) if path == "model.batch_size"
        );
    }

    #[test]
    fn epochs_beyond_u32_are_invalid() {
        let mut base = base_config();
        base["promotion"]["dev"]["model"]["epochs"] = json!(4_294_967_296u64);
        assert_matches!(
            resolver(base).resolve("dev"),
            Err(ConfigError::InvalidValue { path, .. }) if path == "model.epochs"
        );
    }

    #[test]
    fn instance_count_beyond_u32_is_invalid() {
        let mut base = base_config();
        base["deployment"]["instance_count"] = json!(u64::from(u32::MAX) + 1);
        assert_matches!(
            resolver(base).resolve("prod"),
            Err(ConfigError::InvalidValue { path, .. }) if path == "deployment.instance_count"
        );
    }

    #[test]
    fn oversized_durations_are_invalid() {
        let mut base = base_config();
        base["deployment"]["health_check_timeout_secs"] = json!(u64::MAX / 10);
        assert_matches!(
            resolver(base).resolve("prod"),
            Err(ConfigError::InvalidValue { path, .. })
                if path == "deployment.health_check_timeout_secs"
        );

        let mut base = base_config();
        base["deployment"]["health_check_interval_secs"] = json!(u64::MAX / 10);
        assert_matches!(
            resolver(base).resolve("prod"),
            Err(ConfigError::InvalidValue { path, .. })
                if path == "deployment.health_check_interval_secs"
        );

        let mut base = base_config();
        base["metrics"] = json!({ "interval_secs": u64::MAX / 10 });
        assert_matches!(
            resolver(base).resolve("prod"),
            Err(ConfigError::InvalidValue { path, .. }) if path == "metrics.interval_secs"
        );
    }

    #[test]
    fn data_url_falls_back_to_projection_config() {
        let projection: ProjectionConfig = serde_json::from_value(json!({
            "selected_fields": ["feature1"],
            "data_url": "https://example.com/yf.csv"
        }))
        .unwrap();
        let r = ConfigResolver::new(base_config(), projection.clone());
        assert_eq!(
            r.resolve("dev").unwrap().data_url.as_deref(),
            Some("https://example.com/yf.csv")
        );

        let mut base = base_config();
        base["data_url"] = json!("https://example.com/override.csv");
        let ctx = ConfigResolver::new(base, projection).resolve("dev").unwrap();
        assert_eq!(ctx.data_url.as_deref(), Some("https://example.com/override.csv"));
    }

    #[test]
    fn unsupported_vendor_fails() {
        let mut base = base_config();
        base["cloud_vendor"] = json!("azure");
        assert_matches!(
            resolver(base).resolve("dev"),
            Err(ConfigError::UnsupportedVendor(v)) if v == "azure"
        );
    }

    #[test]
    fn default_project_fills_gap_only() {
        let mut base = base_config();
        base.as_object_mut().unwrap().remove("project");
        let ctx = resolver(base).with_default_project("fallback").resolve("dev").unwrap();
        assert_eq!(ctx.project, "fallback");

        let ctx = resolver(base_config())
            .with_default_project("fallback")
            .resolve("dev")
            .unwrap();
        assert_eq!(ctx.project, "yf");
    }

    #[test]
    fn default_run_key_is_stable_per_environment() {
        let r = resolver(base_config());
        let first = r.resolve("dev").unwrap().default_run_key();
        let second = r.resolve("dev").unwrap().default_run_key();
        let prod = r.resolve("prod").unwrap().default_run_key();
        assert_eq!(first, second);
        assert_ne!(first, prod);
        assert!(first.starts_with("yf-dev-"));
    }

    #[test]
    fn locations_join_prefix_and_file_name() {
        let ctx = resolver(base_config()).resolve("dev").unwrap();
        assert_eq!(ctx.raw_location().key, "raw/data.jsonl");
        let at = "2026-10-19T08:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            ctx.raw_snapshot_location(at).key,
            "raw/data_20261019_083000.jsonl"
        );
        assert_eq!(
            ctx.processed_snapshot_location(at).key,
            "processed/data_20261019_083000.jsonl"
        );
        assert_eq!(ctx.artifact_location("run-1").key, "artifacts/run-1/model.json");
    }

    #[test]
    fn latest_raw_location_prefers_newest_snapshot() {
        let ctx = resolver(base_config()).resolve("dev").unwrap();
        let keys = [
            "raw/data.jsonl",
            "raw/data_20261019_083000.jsonl",
            "raw/data_20261020_000000.jsonl",
        ];
        assert_eq!(
            ctx.latest_raw_location(keys).key,
            "raw/data_20261020_000000.jsonl"
        );
        assert_eq!(ctx.latest_raw_location(["raw/data.jsonl"]), ctx.raw_location());
        assert_eq!(ctx.latest_raw_location(Vec::<&str>::new()), ctx.raw_location());
    }

    #[test]
    fn merge_overlay_replaces_arrays() {
        let mut target = json!({ "a": { "b": [1, 2, 3], "c": 1 } });
        merge_overlay(&mut target, &json!({ "a": { "b": [9] } }));
        assert_eq!(target, json!({ "a": { "b": [9], "c": 1 } }));
    }

    #[test]
    fn promoted_environments_follow_promotion_order() {
        assert_eq!(
            resolver(base_config()).promoted_environments(),
            vec![Environment::Dev, Environment::Prod]
        );
    }
}
