//! tac-broker - ZMQ request-dispatch core: broker, worker supervisor, and
//! HTTP monitoring plane for the TACoreService worker pool.
//!
//! Configuration is loaded from (in order, later wins):
//! 1. Compiled defaults
//! 2. /etc/tacoreservice/config.toml
//! 3. ~/.config/tacoreservice/config.toml
//! 4. ./tacoreservice.toml (or --config path)
//! 5. Environment variables (spec.md §6's named list)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tac_broker::bootstrap::{self, BootstrapError, BootstrapOptions};

/// ZMQ request-dispatch core for TACoreService
#[derive(Parser)]
#[command(name = "tac-broker")]
#[command(about = "Broker, worker supervisor, and HTTP monitoring plane for TACoreService")]
#[command(version)]
struct Cli {
    /// Path to config file (overrides ./tacoreservice.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the tac-worker binary to supervise
    #[arg(long, default_value = "tac-worker")]
    worker_binary: PathBuf,

    /// Print the loaded configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, sources) = match tac_config::loader::load(cli.config.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(1);
        }
    };

    if cli.show_config {
        println!("# Configuration sources:");
        for path in &sources.files {
            println!("#   - {}", path.display());
        }
        if !sources.env_overrides.is_empty() {
            println!("# Environment overrides:");
            for var in &sources.env_overrides {
                println!("#   - {var}");
            }
        }
        println!("{config:#?}");
        return ExitCode::SUCCESS;
    }

    #[cfg(feature = "otel")]
    let otel_enabled = config.otlp_endpoint.is_some();
    #[cfg(not(feature = "otel"))]
    let otel_enabled = false;

    if otel_enabled {
        #[cfg(feature = "otel")]
        if let Err(e) = tac_broker::telemetry::init(config.otlp_endpoint.as_deref().unwrap()) {
            eprintln!("failed to initialize opentelemetry: {e}");
            return ExitCode::from(1);
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_tracing_filter())),
            )
            .init();
    }

    tracing::info!("configuration loaded from:");
    for path in &sources.files {
        tracing::info!("  - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        tracing::info!(overrides = ?sources.env_overrides, "environment overrides applied");
    }

    let result = bootstrap::run(BootstrapOptions {
        config,
        worker_binary: cli.worker_binary,
    })
    .await;

    #[cfg(feature = "otel")]
    if otel_enabled {
        tac_broker::telemetry::shutdown();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(BootstrapError::Bind(e)) => {
            tracing::error!(error = %e, "bind failure");
            ExitCode::from(2)
        }
        Err(BootstrapError::SupervisorUnrecoverable) => {
            tracing::error!("no workers could be started, supervisor failure is unrecoverable");
            ExitCode::from(3)
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal error during startup or shutdown");
            ExitCode::from(1)
        }
    }
}
