//! Startup and shutdown orchestration (component H, broker half).
//!
//! Grounded on `holler::serve::shutdown_signal`, generalized from "stop one
//! axum server" to "stop N components, each within its own grace window":
//! start order store (A) → sockets (F) → registry (B) → broker (E) → HTTP (G)
//! → supervisor (D); reverse order on shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use tac_config::Config;
use tac_proto::socket_config::{create_router_and_bind, ZmqContext};
use tac_store::Store;

use crate::broker::{Broker, BrokerConfig};
use crate::http::{self, AppState};
use crate::metrics::Metrics;
use crate::registry::{Registry, RegistrySnapshot};
use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorEvent};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to bind ZMQ sockets: {0}")]
    Bind(#[source] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[from] tac_store::StoreError),
    #[error("no workers could be started")]
    SupervisorUnrecoverable,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct BootstrapOptions {
    pub config: Config,
    pub worker_binary: PathBuf,
}

/// Bring every component up, run until shutdown, then tear every component
/// down again. Returns once the process should exit cleanly.
pub async fn run(opts: BootstrapOptions) -> Result<(), BootstrapError> {
    let config = opts.config;

    info!(
        frontend = %config.frontend_endpoint,
        backend = %config.backend_endpoint,
        http = %config.http_endpoint,
        workers = config.worker_count,
        "starting tac-broker"
    );

    // A: durable store, opened and recovered before anything else touches it.
    let store = Arc::new(Store::open(&config.persistence_path)?);
    let now_nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let request_timeout_nanos = config.request_timeout.as_nanos() as i64;
    let recovered = store.recover(now_nanos, request_timeout_nanos)?;
    if recovered > 0 {
        warn!(recovered, "rewrote stale in-flight requests left over from a previous crash");
    }

    // F: ZMQ context and front/back ROUTER sockets.
    let ctx = ZmqContext::new();
    let front = create_router_and_bind(&ctx, &config.frontend_endpoint, "front").map_err(BootstrapError::Bind)?;
    let back = create_router_and_bind(&ctx, &config.backend_endpoint, "back").map_err(BootstrapError::Bind)?;

    // B: worker registry, E's exclusive state.
    let registry = Registry::new();
    let (registry_tx, registry_rx) = watch::channel(RegistrySnapshot::default());

    // Shared read-only handles for the metrics accumulator.
    let metrics = Arc::new(Metrics::new());

    // D: supervisor, posting events onto E's event channel.
    let (supervisor_events_tx, supervisor_events_rx) = mpsc::channel::<SupervisorEvent>(256);
    let mut supervisor = Supervisor::new(
        SupervisorConfig {
            worker_count: config.worker_count,
            worker_binary: opts.worker_binary,
            backend_endpoint: config.backend_endpoint.clone(),
            max_restarts_per_minute: config.worker_max_restarts_per_minute,
            shutdown_grace: config.shutdown_grace,
        },
        supervisor_events_tx,
    );
    supervisor.spawn_initial_fleet().await;
    if supervisor.live_worker_count() == 0 {
        return Err(BootstrapError::SupervisorUnrecoverable);
    }

    let (shutdown_tx, broker_shutdown_rx) = broadcast::channel::<()>(4);
    let mut http_shutdown_rx = shutdown_tx.subscribe();
    let mut supervisor_shutdown_rx = shutdown_tx.subscribe();

    // E: the broker event loop.
    let broker_config = BrokerConfig {
        max_payload_bytes: config.max_payload_bytes,
        queue_capacity: config.queue_capacity(),
        request_timeout: config.request_timeout,
        worker_heartbeat_timeout: config.worker_heartbeat_timeout,
        max_retries: config.max_retries,
    };
    let broker = Broker::new(
        front,
        back,
        registry,
        Arc::clone(&store),
        Arc::clone(&metrics),
        supervisor_events_rx,
        broker_shutdown_rx,
        broker_config,
        registry_tx,
    );
    let broker_handle = tokio::spawn(broker.run());

    // G: HTTP monitoring plane, read-only handles only (spec §9).
    let app_state = Arc::new(AppState {
        registry: registry_rx,
        metrics: Arc::clone(&metrics),
        store: Arc::clone(&store),
        start_time: Instant::now(),
    });
    let app = http::router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.http_endpoint)
        .await
        .map_err(|e| BootstrapError::Bind(anyhow::anyhow!("failed to bind HTTP endpoint {}: {e}", config.http_endpoint)))?;
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
            })
            .await
        {
            error!(error = %e, "HTTP monitoring plane exited with error");
        }
    });

    // D's own duty cycle: poll children, respawn per backoff, stop on
    // shutdown signal.
    let supervisor_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    supervisor.tick(Instant::now()).await;
                }
                _ = supervisor_shutdown_rx.recv() => {
                    info!("supervisor received shutdown signal, stopping worker fleet");
                    supervisor.shutdown_all().await;
                    break;
                }
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping components in reverse start order");
    let _ = shutdown_tx.send(());

    let _ = supervisor_handle.await;
    let _ = http_handle.await;
    let _ = broker_handle.await;
    store.flush()?;

    info!("tac-broker stopped cleanly");
    Ok(())
}

/// SIGINT/SIGTERM select, identical in shape to `holler::serve::shutdown_signal`.
async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM");
        }
    }
}
