//! Subcommand bodies. Each returns `anyhow::Result`; `main` maps the
//! underlying error type to the process exit code.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use mlpromote_cloud::{CloudBackends, DeploymentError};
use mlpromote_core::config::{ConfigResolver, ExecutionContext};
use mlpromote_core::error::ConfigError;
use mlpromote_pipeline::{LocalRegistry, PipelineError, PipelineOrchestrator};

use crate::settings::{Settings, SettingsError};

pub const EXIT_INTERNAL: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        return u8::try_from(e.exit_code()).unwrap_or(EXIT_INTERNAL);
    }
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<SettingsError>().is_some()
    {
        return EXIT_CONFIG;
    }
    if let Some(DeploymentError::Configuration(_)) = err.downcast_ref::<DeploymentError>() {
        return EXIT_CONFIG;
    }
    EXIT_INTERNAL
}

pub fn load_context(settings: &Settings, env: &str) -> Result<ExecutionContext, ConfigError> {
    let ctx = ConfigResolver::from_files(&settings.config_path, &settings.projection_path)?
        .with_default_project(&settings.project)
        .resolve(env)?;
    tracing::debug!(
        project = %ctx.project,
        environment = %ctx.environment,
        fingerprint = %ctx.config_fingerprint,
        "Resolved execution context",
    );
    Ok(ctx)
}

async fn orchestrator(
    settings: &Settings,
    env: &str,
    cancel: CancellationToken,
) -> anyhow::Result<PipelineOrchestrator> {
    let ctx = Arc::new(load_context(settings, env)?);
    let backends = CloudBackends::for_context(&ctx, &settings.state_dir).await?;
    let registry = LocalRegistry::open(settings.registry_path())
        .await
        .context("failed to open the run registry")?;
    Ok(PipelineOrchestrator::new(ctx, backends, Arc::new(registry)).with_cancellation(cancel))
}

/// `mlpromote resolve`: print the resolved context.
pub fn resolve(settings: &Settings, env: &str) -> anyhow::Result<()> {
    let ctx = load_context(settings, env)?;
    println!("{}", serde_json::to_string_pretty(&ctx)?);
    Ok(())
}

/// `mlpromote ingest`: resolve and run the ingestion stage only.
pub async fn ingest(
    settings: &Settings,
    env: &str,
    url: Option<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let stats = orchestrator(settings, env, cancel)
        .await?
        .with_data_url(url)
        .ingest_only()
        .await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// `mlpromote run`: the full pipeline.
pub async fn run(
    settings: &Settings,
    env: &str,
    run_key: Option<String>,
    url: Option<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let orchestrator = orchestrator(settings, env, cancel).await?.with_data_url(url);
    let run_key = run_key.unwrap_or_else(|| orchestrator.context().default_run_key());
    let report = orchestrator.run(&run_key).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlpromote_pipeline::{ErrorKind, Stage};

    #[test]
    fn pipeline_errors_use_stage_codes() {
        let err = anyhow::Error::new(PipelineError {
            stage: Stage::Training,
            kind: ErrorKind::Numerical,
            message: "loss diverged".into(),
            run_id: None,
        });
        assert_eq!(exit_code(&err), 4);

        let cancelled = anyhow::Error::new(PipelineError {
            stage: Stage::Deployment,
            kind: ErrorKind::Cancelled,
            message: "cancelled before deployment".into(),
            run_id: None,
        });
        assert_eq!(exit_code(&cancelled), 7);
    }

    #[test]
    fn config_problems_exit_with_two() {
        let err = anyhow::Error::new(ConfigError::UnsupportedVendor("gcp".into()));
        assert_eq!(exit_code(&err), EXIT_CONFIG);

        let err = anyhow::Error::new(SettingsError::MissingProject);
        assert_eq!(exit_code(&err), EXIT_CONFIG);

        let err = anyhow::Error::new(DeploymentError::Configuration("no url".into()));
        assert_eq!(exit_code(&err), EXIT_CONFIG);
    }

    #[test]
    fn anything_else_is_internal() {
        let err = anyhow::anyhow!("disk full");
        assert_eq!(exit_code(&err), EXIT_INTERNAL);
    }

    #[test]
    fn demo_project_resolves_for_dev_and_prod() {
        let config_dir =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/yf/config");
        let settings = Settings {
            project: "yf".into(),
            config_path: config_dir.join("config.json"),
            projection_path: config_dir.join("model_config.json"),
            state_dir: ".mlpromote".into(),
        };

        let dev = load_context(&settings, "dev").unwrap();
        assert_eq!(dev.hyperparameters.epochs, 5);
        assert_eq!(dev.storage.bucket, "yf-dev");

        let prod = load_context(&settings, "prod").unwrap();
        assert_eq!(prod.deployment.instance_count, 2);
        assert_eq!(prod.deployment.instance_class, "ml.c5.xlarge");
        assert_ne!(dev.config_fingerprint, prod.config_fingerprint);

        let err = anyhow::Error::new(load_context(&settings, "qa").unwrap_err());
        assert_eq!(exit_code(&err), EXIT_CONFIG);
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            project: "yf".into(),
            config_path: dir.path().join("missing.json"),
            projection_path: dir.path().join("fields.json"),
            state_dir: dir.path().join("state"),
        };
        let err = anyhow::Error::new(load_context(&settings, "dev").unwrap_err());
        assert_eq!(exit_code(&err), EXIT_CONFIG);
    }
}
