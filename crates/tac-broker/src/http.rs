//! Read-only JSON monitoring plane (component G).
//!
//! Grounded on `holler::serve`/`holler::mcp::handle_health` for the axum
//! bootstrap, JSON response idiom, and graceful-shutdown `tokio::select!`
//! shape. G holds only read handles (`Arc<AppState>`) — no mutation path,
//! per spec §9's "no E↔G direct link".

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use tac_store::{RequestFilter, Status, Store};

use crate::metrics::Metrics;
use crate::registry::{RegistrySnapshot, WorkerState};

/// G's only link to the broker (component E) is this read-only channel of
/// registry snapshots, published once per timer tick — spec §9 rules out any
/// direct call path between E and G.
pub struct AppState {
    pub registry: watch::Receiver<RegistrySnapshot>,
    pub metrics: Arc<Metrics>,
    pub store: Arc<Store>,
    pub start_time: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/workers", get(workers))
        .route("/requests/recent", get(requests_recent))
        .route("/requests/{id}", get(request_by_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.registry.borrow().clone();
    let idle = snapshot.idle;
    let busy = snapshot.busy;
    let live = snapshot.live;
    let degraded_flag = snapshot.degraded;

    let status = if live == 0 {
        HealthStatus::Unhealthy
    } else if degraded_flag || (idle == 0 && busy > 0) {
        HealthStatus::Degraded
    } else if idle >= 1 {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let body = json!({
        "status": status.as_str(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    });
    (status.status_code(), Json(body))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.registry.borrow().clone();
    let views: Vec<_> = snapshot
        .views
        .into_iter()
        .map(|v| {
            json!({
                "worker_id": v.worker_id,
                "state": worker_state_str(v.state),
                "processed_count": v.processed_count,
                "failed_count": v.failed_count,
                "last_heartbeat_age_ms": v.last_heartbeat_age_ms,
            })
        })
        .collect();
    Json(views)
}

fn worker_state_str(state: WorkerState) -> &'static str {
    match state {
        WorkerState::Starting => "STARTING",
        WorkerState::Idle => "IDLE",
        WorkerState::Busy => "BUSY",
        WorkerState::Unresponsive => "UNRESPONSIVE",
        WorkerState::Dead => "DEAD",
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<usize>,
    status: Option<String>,
    method: Option<String>,
    source_module: Option<String>,
}

async fn requests_recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(10_000);
    let filter = RequestFilter {
        status: query.status.as_deref().and_then(parse_status),
        method: query.method,
        source_module: query.source_module,
    };

    match state.store.list_recent(limit, Some(&filter)) {
        Ok(records) => {
            let views: Vec<_> = records.iter().map(public_view).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn request_by_id(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.get_request(id) {
        Ok(Some(record)) => (StatusCode::OK, Json(public_view(&record))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

fn parse_status(s: &str) -> Option<Status> {
    match s.to_ascii_uppercase().as_str() {
        "PENDING" => Some(Status::Pending),
        "DISPATCHED" => Some(Status::Dispatched),
        "COMPLETE" => Some(Status::Complete),
        "FAILED" => Some(Status::Failed),
        "TIMEOUT" => Some(Status::Timeout),
        _ => None,
    }
}

fn public_view(record: &tac_store::RequestRecord) -> serde_json::Value {
    json!({
        "request_id": record.request_id,
        "source_module": record.source_module,
        "method": record.method,
        "status": format!("{:?}", record.status).to_uppercase(),
        "worker_id": record.worker_id,
        "created_at": record.created_at,
        "dispatched_at": record.dispatched_at,
        "completed_at": record.completed_at,
        "error_code": record.error_code.map(|c| c.as_str()),
        "error_message": record.error_message,
        "attempt": record.attempt,
    })
}

/// SIGINT/SIGTERM graceful shutdown future, identical in shape to
/// `holler::serve::shutdown_signal`.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down HTTP plane");
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
            info!("received SIGTERM, shutting down HTTP plane");
        }
    }
}
