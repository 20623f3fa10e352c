//! End-to-end checks of the local vendor: storage and deployment gateways
//! built from a resolved context, persisted under a temp state directory.

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;

use mlpromote_cloud::backends::LEDGER_FILE;
use mlpromote_cloud::deploy::DeploymentStatus;
use mlpromote_cloud::{CloudBackends, DeploymentError};
use mlpromote_core::config::{ConfigResolver, ExecutionContext};
use mlpromote_core::dataset::DatasetHandle;
use mlpromote_core::environment::Environment;
use mlpromote_core::model::ModelVersion;
use mlpromote_core::projection::ProjectionConfig;

fn context(vendor: &str) -> ExecutionContext {
    let doc = json!({
        "project": "yf",
        "cloud_vendor": vendor,
        "model": { "batch_size": 4, "epochs": 1, "learning_rate": 0.01, "model_width": 4 },
        "deployment": {
            "instance_type": "local",
            "health_check_timeout_secs": 5,
            "health_check_interval_secs": 1
        },
        "promotion": {
            "dev": {
                "storage": { "bucket": "yf-dev", "raw_path": "raw/", "processed_path": "processed/" },
                "deployment": { "region": "local", "image_uri": "registry/yf:dev" }
            }
        }
    });
    ConfigResolver::new(doc, ProjectionConfig::default())
        .resolve("dev")
        .unwrap()
}

#[tokio::test]
async fn local_backends_round_trip_storage_and_deployments() {
    let state = tempfile::tempdir().unwrap();
    let ctx = context("local");
    let backends = CloudBackends::for_context(&ctx, state.path()).await.unwrap();

    let location = ctx.raw_location();
    let record = json!({ "feature1": 1.0, "target_column": 2.0 })
        .as_object()
        .cloned()
        .unwrap();
    backends
        .storage
        .write_dataset(&DatasetHandle::raw(location.clone(), vec![record]), &location)
        .await
        .unwrap();
    assert_eq!(backends.storage.read_dataset(&location).await.unwrap().len(), 1);

    let artifact = backends
        .storage
        .write_artifact(&ctx.artifact_location("run-1"), b"{}".to_vec())
        .await
        .unwrap();
    let version = ModelVersion {
        name: ctx.model_name.clone(),
        version: 1,
        run_id: "run-1".into(),
        artifact,
        stage: Environment::Dev,
        created_at: Utc::now(),
    };

    let deployed = backends
        .deployment
        .deploy(&version, &ctx.deployment, ctx.environment)
        .await
        .unwrap();
    assert_eq!(deployed.status, DeploymentStatus::Active);
    assert_eq!(deployed.endpoint_name, "yf-endpoint");
    assert!(state.path().join(LEDGER_FILE).exists());

    // A fresh set of backends over the same state directory sees the ledger.
    let reopened = CloudBackends::for_context(&ctx, state.path()).await.unwrap();
    let active = reopened
        .deployment
        .active("yf-endpoint", Environment::Dev)
        .await
        .unwrap();
    assert_eq!(active.deployment_id, deployed.deployment_id);
}

#[tokio::test]
async fn aws_without_control_plane_is_a_configuration_error() {
    let state = tempfile::tempdir().unwrap();
    let ctx = context("aws");

    assert_matches!(
        CloudBackends::for_context(&ctx, state.path()).await,
        Err(DeploymentError::Configuration(_))
    );
}
