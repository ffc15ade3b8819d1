//! tac-worker - stateless RPC worker process supervised by tac-broker.
//!
//! Reads `TAC_WORKER_ID` and `BACKEND_ENDPOINT` from the environment (set by
//! the supervisor on spawn, spec §4.D), everything else from the same
//! config file/env layering `tac-broker` uses.

use std::process::ExitCode;

use tac_worker::handler::EchoHandler;
use tac_worker::{HandlerRegistry, WorkerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let (config, _sources) = match tac_config::loader::load(None) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_tracing_filter())),
        )
        .init();

    let worker_id = std::env::var("TAC_WORKER_ID").unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4()));

    let mut registry = HandlerRegistry::new();
    registry.register("echo", EchoHandler);

    let worker_config = WorkerConfig {
        worker_id,
        backend_endpoint: config.backend_endpoint,
        request_timeout: config.request_timeout,
        heartbeat_interval: config.worker_heartbeat_interval,
    };

    match tac_worker::run(worker_config, registry).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "worker exited with error");
            ExitCode::from(1)
        }
    }
}
