//! `mlpromote` -- train a model and promote it through an environment.
//!
//! Resolves the environment's execution context from the project config
//! files, then runs ingestion, training, registration and deployment.
//! Logs go to stderr; the resolved context or run report is printed to
//! stdout as JSON.
//!
//! # Environment variables
//!
//! | Variable                      | Required | Default                              |
//! |-------------------------------|----------|--------------------------------------|
//! | `PROJECT`                     | no*      | --                                   |
//! | `MLPROMOTE_CONFIG`            | no       | `<project>/config/config.json`       |
//! | `MLPROMOTE_PROJECTION_CONFIG` | no       | `<project>/config/model_config.json` |
//! | `MLPROMOTE_STATE_DIR`         | no       | `.mlpromote`                         |
//! | `LOG_FORMAT`                  | no       | text (`json` for structured logs)    |
//! | `RUST_LOG`                    | no       | `mlpromote=info`                     |
//!
//! \* required unless `--project` is given.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(name = "mlpromote")]
#[command(about = "Train, register and deploy a model for one promotion environment")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Target {
    /// Promotion environment (dev, qa, staging, prod)
    #[arg(short, long)]
    env: String,

    /// Project name; falls back to PROJECT
    #[arg(short, long)]
    project: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline
    Run {
        #[command(flatten)]
        target: Target,

        /// Idempotency key; defaults to a hash of the resolved config
        #[arg(long)]
        run_key: Option<String>,

        /// Download the raw dataset from this URL first
        #[arg(long)]
        url: Option<String>,
    },

    /// Resolve the context and run ingestion only
    Ingest {
        #[command(flatten)]
        target: Target,

        /// Download the raw dataset from this URL first
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the resolved execution context
    Resolve {
        #[command(flatten)]
        target: Target,
    },
}

impl Command {
    fn target(&self) -> &Target {
        match self {
            Self::Run { target, .. } | Self::Ingest { target, .. } | Self::Resolve { target } => {
                target
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("mlpromote=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "mlpromote=info".into())
    };
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping before the next stage");
            on_interrupt.cancel();
        }
    });

    let result = match Settings::from_env(cli.command.target().project.as_deref()) {
        Err(e) => Err(anyhow::Error::from(e)),
        Ok(settings) => {
            tracing::debug!(?settings, "Loaded settings");
            match cli.command {
                Command::Run {
                    target,
                    run_key,
                    url,
                } => commands::run(&settings, &target.env, run_key, url, cancel).await,
                Command::Ingest { target, url } => {
                    commands::ingest(&settings, &target.env, url, cancel).await
                }
                Command::Resolve { target } => commands::resolve(&settings, &target.env),
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = commands::exit_code(&e);
            eprintln!("error: {e:#}");
            ExitCode::from(code)
        }
    }
}
