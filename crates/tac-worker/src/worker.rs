//! The worker's main loop: READY, then TASK/RESPONSE/HEARTBEAT over a single
//! DEALER socket (spec §4.C).
//!
//! Grounded on `chaosgarden::ipc::server::GardenServer::run`'s
//! `tokio::select!` shape (control channel, then shell channel, then a
//! shutdown signal), narrowed to this worker's single socket plus a
//! heartbeat ticker and a SIGTERM watch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use tac_proto::{BackendFrame, ErrorCode};

use crate::error::WorkerError;
use crate::handler::HandlerRegistry;
use crate::socket::{connect_dealer, DealerSocket, Multipart, ZmqContext};

pub struct WorkerConfig {
    pub worker_id: String,
    pub backend_endpoint: String,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// Connect, announce READY, and run the TASK/RESPONSE loop until SIGTERM or
/// the broker drops the connection.
pub async fn run(config: WorkerConfig, registry: HandlerRegistry) -> Result<(), WorkerError> {
    let registry = Arc::new(registry);
    let ctx = ZmqContext::new();
    let mut socket = connect_dealer(&ctx, &config.backend_endpoint)
        .map_err(WorkerError::Connect)?;

    send_frame(&mut socket, &BackendFrame::Ready { worker_id: config.worker_id.clone() }).await?;
    info!(worker_id = %config.worker_id, endpoint = %config.backend_endpoint, "worker ready");

    let mut sigterm = install_sigterm();
    let mut heartbeat_ticker = tokio::time::interval(config.heartbeat_interval);
    heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();
    let mut shutting_down = false;

    loop {
        tokio::select! {
            biased;

            _ = sigterm.recv(), if !shutting_down => {
                info!(worker_id = %config.worker_id, "received SIGTERM, finishing in-flight work before exit");
                shutting_down = true;
            }

            frame = socket.next() => {
                let Some(frame) = frame else {
                    warn!(worker_id = %config.worker_id, "broker closed the backend connection");
                    break;
                };
                let multipart = frame.map_err(|e| WorkerError::Socket(e.to_string()))?;
                handle_multipart(&mut socket, &registry, &config, multipart).await?;
                last_activity = Instant::now();
                if shutting_down {
                    break;
                }
            }

            _ = heartbeat_ticker.tick(), if !shutting_down => {
                if last_activity.elapsed() >= config.heartbeat_interval {
                    if let Err(e) = send_frame(&mut socket, &BackendFrame::Heartbeat { worker_id: config.worker_id.clone() }).await {
                        error!(worker_id = %config.worker_id, error = %e, "failed to send heartbeat");
                    } else {
                        last_activity = Instant::now();
                    }
                }
            }
        }
    }

    info!(worker_id = %config.worker_id, "worker exiting cleanly");
    Ok(())
}

async fn handle_multipart(
    socket: &mut (impl DealerSocket + Unpin),
    registry: &Arc<HandlerRegistry>,
    config: &WorkerConfig,
    multipart: Multipart,
) -> Result<(), WorkerError> {
    let body = multipart
        .into_iter()
        .next()
        .ok_or_else(|| WorkerError::MalformedFrame("empty multipart from broker".to_string()))?;
    let frame = BackendFrame::from_json_bytes(&body)
        .map_err(|e| WorkerError::MalformedFrame(e.to_string()))?;

    let kind = frame.kind();
    let BackendFrame::Task { request_id, method, payload } = frame else {
        warn!(worker_id = %config.worker_id, kind, "ignoring unexpected frame kind from broker");
        return Ok(());
    };

    let response = dispatch_task(registry, &method, payload, request_id, config.request_timeout).await;
    send_frame(socket, &response).await
}

async fn dispatch_task(
    registry: &Arc<HandlerRegistry>,
    method: &str,
    payload: serde_json::Value,
    request_id: uuid::Uuid,
    timeout: Duration,
) -> BackendFrame {
    if !registry.has_method(method) {
        return BackendFrame::Response {
            request_id,
            ok: false,
            payload: None,
            error_code: Some(ErrorCode::EUnknownMethod),
            error_message: Some(format!("no handler registered for method '{method}'")),
        };
    }

    let registry = Arc::clone(registry);
    let method_owned = method.to_string();
    let join = tokio::task::spawn_blocking(move || registry.dispatch(&method_owned, payload));

    match tokio::time::timeout(timeout, join).await {
        Ok(Ok(Some(Ok(value)))) => BackendFrame::Response {
            request_id,
            ok: true,
            payload: Some(value),
            error_code: None,
            error_message: None,
        },
        Ok(Ok(Some(Err(message)))) => BackendFrame::Response {
            request_id,
            ok: false,
            payload: None,
            error_code: Some(ErrorCode::EHandlerFailure),
            error_message: Some(message),
        },
        Ok(Ok(None)) => BackendFrame::Response {
            request_id,
            ok: false,
            payload: None,
            error_code: Some(ErrorCode::EUnknownMethod),
            error_message: Some(format!("no handler registered for method '{method}'")),
        },
        Ok(Err(join_error)) => BackendFrame::Response {
            request_id,
            ok: false,
            payload: None,
            error_code: Some(ErrorCode::EHandlerFailure),
            error_message: Some(format!("handler task failed: {join_error}")),
        },
        Err(_elapsed) => BackendFrame::Response {
            request_id,
            ok: false,
            payload: None,
            error_code: Some(ErrorCode::ETimeout),
            error_message: Some(format!("handler exceeded request_timeout ({timeout:?})")),
        },
    }
}

async fn send_frame(socket: &mut (impl DealerSocket + Unpin), frame: &BackendFrame) -> Result<(), WorkerError> {
    let body = frame
        .to_json_bytes()
        .map_err(|e| WorkerError::MalformedFrame(e.to_string()))?;
    socket
        .send(Multipart::from(vec![bytes::Bytes::from(body)]))
        .await
        .map_err(|e| WorkerError::Socket(e.to_string()))
}

enum ShutdownSignal {
    #[cfg(unix)]
    Unix(tokio::signal::unix::Signal),
    #[cfg(not(unix))]
    Pending,
}

impl ShutdownSignal {
    async fn recv(&mut self) -> Option<()> {
        match self {
            #[cfg(unix)]
            ShutdownSignal::Unix(sig) => sig.recv().await,
            #[cfg(not(unix))]
            ShutdownSignal::Pending => std::future::pending().await,
        }
    }
}

fn install_sigterm() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        ShutdownSignal::Unix(signal(SignalKind::terminate()).expect("failed to install SIGTERM handler"))
    }
    #[cfg(not(unix))]
    {
        ShutdownSignal::Pending
    }
}
