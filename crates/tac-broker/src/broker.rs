//! The central dispatcher (component E) — the hardest subsystem.
//!
//! Single-threaded `tokio::select!` event loop over two ROUTER sockets, a
//! coarse timer, and the supervisor's event channel, `biased;` so the back
//! socket always drains first (spec §4.E/§5). Pending-request correlation is
//! by `request_id` in a `HashMap`, grounded in
//! `hooteproto::client::HootClient`'s `PendingRequest` map keyed by `Uuid`
//! rather than socket/arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tac_proto::socket_config::{Multipart, RouterSocket};
use tac_proto::{BackendFrame, ClientRequest, ClientResponse, ErrorCode};
use tac_store::{RequestPatch, RequestRecord, Store};

use crate::error::BrokerError;
use crate::metrics::{MetricEvent, Metrics};
use crate::registry::{Registry, RegistrySnapshot, WorkerId};
use crate::supervisor::SupervisorEvent;

pub struct BrokerConfig {
    pub max_payload_bytes: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
    pub worker_heartbeat_timeout: Duration,
    pub max_retries: u32,
}

/// An accepted request awaiting either dispatch or a worker's response.
/// `worker_id` is `None` while the request sits in the pending FIFO.
struct InFlight {
    client_identity: Bytes,
    method: String,
    payload: serde_json::Value,
    attempt: u32,
    worker_id: Option<WorkerId>,
    accepted_at: Instant,
}

pub struct Broker<F, B> {
    front: F,
    back: B,
    registry: Registry,
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    supervisor_events: mpsc::Receiver<SupervisorEvent>,
    shutdown: broadcast::Receiver<()>,
    config: BrokerConfig,
    pending: HashMap<Uuid, InFlight>,
    queue: VecDeque<Uuid>,
    worker_identities: HashMap<WorkerId, Bytes>,
    degraded: bool,
    registry_tx: watch::Sender<RegistrySnapshot>,
}

impl<F, B> Broker<F, B>
where
    F: RouterSocket,
    B: RouterSocket,
{
    pub fn new(
        front: F,
        back: B,
        registry: Registry,
        store: Arc<Store>,
        metrics: Arc<Metrics>,
        supervisor_events: mpsc::Receiver<SupervisorEvent>,
        shutdown: broadcast::Receiver<()>,
        config: BrokerConfig,
        registry_tx: watch::Sender<RegistrySnapshot>,
    ) -> Self {
        Self {
            front,
            back,
            registry,
            store,
            metrics,
            supervisor_events,
            shutdown,
            config,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            worker_identities: HashMap::new(),
            degraded: false,
            registry_tx,
        }
    }

    /// Publish a fresh registry snapshot for the HTTP plane to read (spec §9:
    /// G never touches the registry directly).
    fn publish_registry_snapshot(&self) {
        let _ = self
            .registry_tx
            .send(self.registry.snapshot(Instant::now(), self.degraded));
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run the event loop until a shutdown signal is received or a socket
    /// closes. `biased;` enforces back-socket-first, front-socket-second,
    /// timer third, supervisor events last (spec §4.E).
    pub async fn run(mut self) -> Result<(), BrokerError> {
        let mut ticker = interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                biased;

                back_msg = self.back.next() => {
                    match back_msg {
                        Some(Ok(multipart)) => {
                            if let Err(e) = self.handle_back_message(multipart).await {
                                warn!(error = %e, "error handling back-socket message");
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "back socket error"),
                        None => {
                            warn!("back socket closed, stopping broker loop");
                            break;
                        }
                    }
                }

                front_msg = self.front.next() => {
                    match front_msg {
                        Some(Ok(multipart)) => {
                            if let Err(e) = self.handle_front_message(multipart).await {
                                warn!(error = %e, "error handling front-socket message");
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "front socket error"),
                        None => {
                            warn!("front socket closed, stopping broker loop");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.handle_timer_tick().await {
                        warn!(error = %e, "error during timer tick");
                    }
                }

                Some(event) = self.supervisor_events.recv() => {
                    self.handle_supervisor_event(event).await;
                }

                _ = self.shutdown.recv() => {
                    info!("broker event loop received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }

    // ---- back socket: READY / RESPONSE / HEARTBEAT -----------------------

    async fn handle_back_message(&mut self, multipart: Multipart) -> Result<(), BrokerError> {
        let (identity, body) = split_identity(multipart)?;
        let frame: BackendFrame = serde_json::from_slice(&body)
            .map_err(|e| BrokerError::MalformedFrame(e.to_string()))?;

        match frame {
            BackendFrame::Ready { worker_id } => self.on_ready(worker_id, identity).await?,
            BackendFrame::Response {
                request_id,
                ok,
                payload,
                error_code,
                error_message,
            } => {
                self.on_response(identity, request_id, ok, payload, error_code, error_message)
                    .await?
            }
            BackendFrame::Heartbeat { worker_id } => {
                let _ = self.registry.heartbeat(&worker_id, Instant::now());
            }
            BackendFrame::Task { .. } => {
                // Workers never send TASK frames; a peer sending one is
                // malformed traffic, not a broker bug.
                warn!("ignoring unexpected TASK frame on back socket");
            }
        }
        Ok(())
    }

    async fn on_ready(&mut self, worker_id: WorkerId, identity: Bytes) -> Result<(), BrokerError> {
        self.worker_identities.insert(worker_id.clone(), identity);
        if self.registry.get(&worker_id).is_none() {
            self.registry
                .register(worker_id.clone(), 0, Instant::now())
                .map_err(BrokerError::Registry)?;
        }
        self.registry
            .mark_ready(&worker_id, Instant::now())
            .map_err(BrokerError::Registry)?;
        self.publish_registry_snapshot();

        debug!(%worker_id, "worker ready");
        self.drain_queue_onto(&worker_id).await?;
        Ok(())
    }

    async fn on_response(
        &mut self,
        identity: Bytes,
        request_id: Uuid,
        ok: bool,
        payload: Option<serde_json::Value>,
        error_code: Option<ErrorCode>,
        error_message: Option<String>,
    ) -> Result<(), BrokerError> {
        let Some(in_flight) = self.pending.get(&request_id) else {
            debug!(%request_id, "discarding response for unknown/retired request");
            return Ok(());
        };
        let Some(worker_id) = in_flight.worker_id.clone() else {
            // Should not happen: responses only arrive for dispatched work.
            warn!(%request_id, "response for a request that was never dispatched");
            return Ok(());
        };

        // request_id is reused across retries, so a response is only
        // authoritative if it comes from the worker currently holding the
        // request. A late reply from a worker that was swept and retried
        // elsewhere must be discarded (spec §4.E.1), not accepted as if the
        // new holder had finished.
        if self.worker_identities.get(&worker_id) != Some(&identity) {
            debug!(%request_id, %worker_id, "discarding response from retired worker identity");
            return Ok(());
        }

        let in_flight = self.pending.remove(&request_id).expect("checked present above");
        let now_nanos = now_nanos();
        let patch = if ok {
            RequestPatch::complete(
                payload.as_ref().map(|v| v.to_string().into_bytes()).unwrap_or_default(),
                now_nanos,
            )
        } else {
            RequestPatch::failed(
                error_code.unwrap_or(ErrorCode::EHandlerFailure),
                error_message.clone().unwrap_or_default(),
                now_nanos,
            )
        };
        self.store.update_request(request_id, patch)?;
        self.registry
            .release(&worker_id, ok, Instant::now())
            .map_err(BrokerError::Registry)?;
        self.publish_registry_snapshot();

        let latency = Instant::now().saturating_duration_since(in_flight.accepted_at);
        if ok {
            self.metrics.record(MetricEvent::RequestCompleted {
                method: in_flight.method.clone(),
                latency,
            });
        } else {
            self.metrics.record(MetricEvent::RequestFailed {
                method: in_flight.method.clone(),
                error_code: error_code.unwrap_or(ErrorCode::EHandlerFailure),
                latency: Some(latency),
            });
        }

        let response = ClientResponse {
            request_id,
            ok,
            payload,
            error_code,
            error_message,
            attempt: in_flight.attempt,
        };
        self.send_to_client(in_flight.client_identity, &response).await?;

        self.drain_queue_onto(&worker_id).await?;
        Ok(())
    }

    // ---- front socket: client requests ------------------------------------

    async fn handle_front_message(&mut self, multipart: Multipart) -> Result<(), BrokerError> {
        let (identity, body) = split_identity(multipart)?;
        let request: ClientRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(_) => {
                return self
                    .reject_front(identity, None, ErrorCode::EBadRequest, "malformed request envelope".into())
                    .await;
            }
        };

        if let Err(code) = request.validate(self.config.max_payload_bytes) {
            return self
                .reject_front(identity, None, code, "request failed envelope validation".into())
                .await;
        }

        let has_room = self.registry.pick_idle().is_some() || self.queue.len() < self.config.queue_capacity;
        if !has_room {
            self.metrics.record(MetricEvent::RequestFailed {
                method: request.method.clone(),
                error_code: ErrorCode::EServiceOverloaded,
                latency: None,
            });
            return self
                .reject_front(
                    identity,
                    None,
                    ErrorCode::EServiceOverloaded,
                    "pending-request queue is full".into(),
                )
                .await;
        }

        let request_id = Uuid::new_v4();
        let now_nanos = now_nanos();
        self.store.append_request(&RequestRecord::new_pending(
            request_id,
            request.source_module.clone(),
            request.method.clone(),
            serde_json::to_vec(&request.payload).unwrap_or_default(),
            now_nanos,
        ))?;
        self.metrics.record(MetricEvent::RequestAccepted {
            method: request.method.clone(),
        });

        let in_flight = InFlight {
            client_identity: identity,
            method: request.method.clone(),
            payload: request.payload,
            attempt: 1,
            worker_id: None,
            accepted_at: Instant::now(),
        };
        self.pending.insert(request_id, in_flight);

        if let Some(worker_id) = self.registry.pick_idle() {
            self.dispatch(request_id, &worker_id).await?;
        } else {
            self.queue.push_back(request_id);
        }
        Ok(())
    }

    async fn reject_front(
        &mut self,
        identity: Bytes,
        request_id: Option<Uuid>,
        error_code: ErrorCode,
        error_message: String,
    ) -> Result<(), BrokerError> {
        let response = ClientResponse::failure(request_id.unwrap_or_else(Uuid::nil), error_code, error_message, 1);
        self.send_to_client(identity, &response).await
    }

    // ---- dispatch & queue draining -----------------------------------------

    async fn dispatch(&mut self, request_id: Uuid, worker_id: &str) -> Result<(), BrokerError> {
        let in_flight = self
            .pending
            .get_mut(&request_id)
            .ok_or_else(|| BrokerError::MalformedFrame(format!("dispatch of unknown request {request_id}")))?;

        self.registry
            .assign(worker_id, request_id)
            .map_err(BrokerError::Registry)?;
        in_flight.worker_id = Some(worker_id.to_string());

        let now_nanos = now_nanos();
        if in_flight.attempt == 1 {
            self.store
                .update_request(request_id, RequestPatch::dispatched(worker_id.to_string(), now_nanos))?;
        } else {
            self.store.update_request(
                request_id,
                RequestPatch::retry_dispatched(worker_id.to_string(), in_flight.attempt, now_nanos),
            )?;
        }

        let task = BackendFrame::Task {
            request_id,
            method: in_flight.method.clone(),
            payload: in_flight.payload.clone(),
        };
        let identity = self
            .worker_identities
            .get(worker_id)
            .cloned()
            .ok_or_else(|| BrokerError::MalformedFrame(format!("no known identity for {worker_id}")))?;
        self.send_to_worker(identity, &task).await
    }

    /// After a worker frees up (READY or RESPONSE), try to hand it the next
    /// queued request, if any.
    async fn drain_queue_onto(&mut self, worker_id: &str) -> Result<(), BrokerError> {
        if self.registry.get(worker_id).map(|w| w.state) != Some(crate::registry::WorkerState::Idle) {
            return Ok(());
        }
        if let Some(request_id) = self.queue.pop_front() {
            self.dispatch(request_id, worker_id).await?;
        }
        Ok(())
    }

    // ---- timer tick: sweep + expiry -----------------------------------------

    async fn handle_timer_tick(&mut self) -> Result<(), BrokerError> {
        let now = Instant::now();
        let stale = self.registry.sweep(now, self.config.worker_heartbeat_timeout);
        for (worker_id, request_id) in stale {
            self.worker_identities.remove(&worker_id);
            self.fail_or_retry(request_id, ErrorCode::EWorkerLost, "worker became unresponsive".into())
                .await?;
        }

        let timed_out: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, in_flight)| {
                now.saturating_duration_since(in_flight.accepted_at) > self.config.request_timeout
            })
            .map(|(id, _)| *id)
            .collect();
        for request_id in timed_out {
            self.fail_or_retry(request_id, ErrorCode::ETimeout, "request exceeded request_timeout".into())
                .await?;
        }

        self.publish_registry_snapshot();
        Ok(())
    }

    async fn fail_or_retry(
        &mut self,
        request_id: Uuid,
        error_code: ErrorCode,
        error_message: String,
    ) -> Result<(), BrokerError> {
        let Some(mut in_flight) = self.pending.remove(&request_id) else {
            return Ok(());
        };

        // Remove from the pending-dispatch queue too, in case it was still
        // sitting there unassigned (defensive; shouldn't occur for
        // worker-lost since those are always dispatched).
        self.queue.retain(|id| *id != request_id);

        if in_flight.attempt < self.config.max_retries {
            in_flight.attempt += 1;
            in_flight.worker_id = None;
            self.pending.insert(request_id, in_flight);
            if let Some(worker_id) = self.registry.pick_idle() {
                self.dispatch(request_id, &worker_id).await?;
            } else {
                self.queue.push_back(request_id);
            }
            return Ok(());
        }

        let now_nanos = now_nanos();
        self.store
            .update_request(request_id, RequestPatch::timeout(error_code, error_message.clone(), now_nanos))?;
        self.metrics.record(MetricEvent::RequestFailed {
            method: in_flight.method.clone(),
            error_code,
            latency: None,
        });

        let response = ClientResponse::failure(request_id, error_code, error_message, in_flight.attempt);
        self.send_to_client(in_flight.client_identity, &response).await
    }

    // ---- supervisor events --------------------------------------------------

    async fn handle_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::WorkerSpawned { worker_id, pid } => {
                if self.registry.get(&worker_id).is_none() {
                    let _ = self.registry.register(worker_id, pid, Instant::now());
                }
            }
            SupervisorEvent::WorkerCrashed { worker_id } => {
                self.registry.remove(&worker_id);
                self.worker_identities.remove(&worker_id);
            }
            SupervisorEvent::DegradedModeChanged { degraded } => {
                self.degraded = degraded;
            }
        }
        self.publish_registry_snapshot();
    }

    // ---- socket I/O helpers --------------------------------------------------

    async fn send_to_client(&mut self, identity: Bytes, response: &ClientResponse) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(response).expect("ClientResponse always serializes");
        self.front
            .send(Multipart::from(vec![identity, Bytes::from(body)]))
            .await
            .map_err(|e| BrokerError::MalformedFrame(e.to_string()))
    }

    async fn send_to_worker(&mut self, identity: Bytes, frame: &BackendFrame) -> Result<(), BrokerError> {
        let body = frame.to_json_bytes().map_err(|e| BrokerError::MalformedFrame(e.to_string()))?;
        self.back
            .send(Multipart::from(vec![identity, Bytes::from(body)]))
            .await
            .map_err(|e| BrokerError::MalformedFrame(e.to_string()))
    }
}

fn split_identity(multipart: Multipart) -> Result<(Bytes, Bytes), BrokerError> {
    let mut frames: Vec<Bytes> = multipart.into_iter().map(|m| Bytes::copy_from_slice(&m)).collect();
    if frames.len() < 2 {
        return Err(BrokerError::MalformedFrame("expected identity + body frames".into()));
    }
    let body = frames.pop().expect("checked len >= 2");
    let identity = frames.remove(0);
    Ok((identity, body))
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
