//! Worker process lifecycle management (component D).
//!
//! The teacher's own workers are ZMQ peers it dials, never OS children it
//! spawns, so there is no direct analog here; this module is grounded
//! instead on `prospector-miner-worker`'s `tokio::process`-free
//! signal-driven shutdown shape and `swarm_resurrection`'s periodic
//! zombie-detection/backoff loop, rewritten in `tac-broker`'s own
//! `tracing`/`thiserror` idiom rather than that crate's.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::registry::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawning,
    Running,
    Stopping,
    Crashed,
    Terminated,
}

/// Events the supervisor posts onto the broker's event channel. The broker
/// event loop is the sole mutator of the registry (spec §9); the supervisor
/// only request changes by posting these, except for the initial
/// registration enqueue spec §4.D explicitly allows.
#[derive(Debug)]
pub enum SupervisorEvent {
    WorkerSpawned { worker_id: WorkerId, pid: u32 },
    WorkerCrashed { worker_id: WorkerId },
    DegradedModeChanged { degraded: bool },
}

struct RestartBudget {
    restarts_in_window: Vec<Instant>,
}

impl RestartBudget {
    fn new() -> Self {
        Self {
            restarts_in_window: Vec::new(),
        }
    }

    fn record_restart(&mut self, now: Instant) {
        self.prune(now);
        self.restarts_in_window.push(now);
    }

    fn prune(&mut self, now: Instant) {
        self.restarts_in_window
            .retain(|t| now.saturating_duration_since(*t) < Duration::from_secs(60));
    }

    fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.restarts_in_window.len()
    }
}

struct ManagedWorker {
    state: ProcessState,
    child: Option<Child>,
    consecutive_failures: u32,
    next_restart_at: Option<Instant>,
}

/// Exponential backoff capped at 30s, per spec §4.D ("1s, 2s, 4s, ... capped
/// at 30s").
pub fn backoff_for(consecutive_failures: u32) -> Duration {
    let capped_exp = consecutive_failures.min(5); // 2^5 = 32s already over the cap
    let secs = 1u64.checked_shl(capped_exp).unwrap_or(30);
    Duration::from_secs(secs.min(30))
}

pub struct SupervisorConfig {
    pub worker_count: u32,
    pub worker_binary: std::path::PathBuf,
    pub backend_endpoint: String,
    pub max_restarts_per_minute: u32,
    pub shutdown_grace: Duration,
}

/// Owns every spawned `tac-worker` child process (component D).
pub struct Supervisor {
    config: SupervisorConfig,
    workers: HashMap<WorkerId, ManagedWorker>,
    budget: RestartBudget,
    degraded: bool,
    next_worker_seq: u64,
    events: mpsc::Sender<SupervisorEvent>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, events: mpsc::Sender<SupervisorEvent>) -> Self {
        Self {
            config,
            workers: HashMap::new(),
            budget: RestartBudget::new(),
            degraded: false,
            next_worker_seq: 0,
            events,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Count of managed workers that are not yet confirmed dead. Used at
    /// startup to detect a completely failed initial fleet (spec §6 exit
    /// code 3).
    pub fn live_worker_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.state != ProcessState::Terminated)
            .count()
    }

    fn next_worker_id(&mut self) -> WorkerId {
        let id = format!("worker-{}", self.next_worker_seq);
        self.next_worker_seq += 1;
        id
    }

    /// Spawn `worker_count` workers on startup (spec §4.D).
    pub async fn spawn_initial_fleet(&mut self) {
        for _ in 0..self.config.worker_count {
            self.spawn_one().await;
        }
    }

    async fn spawn_one(&mut self) {
        let worker_id = self.next_worker_id();
        match self.launch_child(&worker_id).await {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                info!(%worker_id, pid, "spawned worker process");
                self.workers.insert(
                    worker_id.clone(),
                    ManagedWorker {
                        state: ProcessState::Spawning,
                        child: Some(child),
                        consecutive_failures: 0,
                        next_restart_at: None,
                    },
                );
                let _ = self
                    .events
                    .send(SupervisorEvent::WorkerSpawned { worker_id, pid })
                    .await;
            }
            Err(e) => {
                error!(%worker_id, error = %e, "failed to spawn worker process");
            }
        }
    }

    async fn launch_child(&self, worker_id: &str) -> std::io::Result<Child> {
        Command::new(&self.config.worker_binary)
            .env("TAC_WORKER_ID", worker_id)
            .env("BACKEND_ENDPOINT", &self.config.backend_endpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }

    /// Mark a worker RUNNING once its READY frame has been observed by the
    /// broker loop.
    pub fn mark_running(&mut self, worker_id: &str) {
        if let Some(w) = self.workers.get_mut(worker_id) {
            w.state = ProcessState::Running;
            w.consecutive_failures = 0;
        }
    }

    /// Poll all children for exit, reclassify crashed ones, and respawn
    /// per backoff policy. Call this on the supervisor's own duty-cycle
    /// tick (spec §5: "runs on a separate thread with a short duty cycle").
    pub async fn tick(&mut self, now: Instant) {
        let mut crashed = Vec::new();
        for (worker_id, managed) in self.workers.iter_mut() {
            if managed.state == ProcessState::Terminated {
                continue;
            }
            if let Some(child) = managed.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        if managed.state != ProcessState::Stopping {
                            warn!(%worker_id, ?status, "worker process exited unexpectedly");
                        }
                        managed.state = if managed.state == ProcessState::Stopping {
                            ProcessState::Terminated
                        } else {
                            ProcessState::Crashed
                        };
                        if managed.state == ProcessState::Crashed {
                            crashed.push(worker_id.clone());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(%worker_id, error = %e, "failed to poll worker process"),
                }
            }
        }

        for worker_id in crashed {
            self.handle_crash(worker_id, now).await;
        }

        self.maybe_respawn_due(now).await;
    }

    async fn handle_crash(&mut self, worker_id: WorkerId, now: Instant) {
        let _ = self
            .events
            .send(SupervisorEvent::WorkerCrashed {
                worker_id: worker_id.clone(),
            })
            .await;

        if self.degraded {
            // Degraded mode: no new workers spawn (spec §4.D); leave the
            // entry as Crashed without scheduling a restart.
            return;
        }

        let restarts_this_minute = self.budget.count(now);
        if restarts_this_minute >= self.config.max_restarts_per_minute as usize {
            warn!("worker restart rate limit exceeded, entering degraded mode");
            self.degraded = true;
            let _ = self
                .events
                .send(SupervisorEvent::DegradedModeChanged { degraded: true })
                .await;
            return;
        }

        if let Some(managed) = self.workers.get_mut(&worker_id) {
            managed.consecutive_failures += 1;
            let delay = backoff_for(managed.consecutive_failures);
            managed.next_restart_at = Some(now + delay);
            info!(%worker_id, delay_secs = delay.as_secs(), "scheduling worker restart");
        }
    }

    async fn maybe_respawn_due(&mut self, now: Instant) {
        let due: Vec<WorkerId> = self
            .workers
            .iter()
            .filter_map(|(id, w)| {
                if w.state == ProcessState::Crashed && w.next_restart_at.map(|t| now >= t).unwrap_or(false) {
                    Some(id.clone())
                } else {
                    None
                }
            })
            .collect();

        for old_id in due {
            self.workers.remove(&old_id);
            self.budget.record_restart(now);
            self.spawn_one().await;
        }
    }

    /// Graceful shutdown: SIGTERM every worker, wait up to `shutdown_grace`,
    /// then kill stragglers (spec §4.D).
    pub async fn shutdown_all(&mut self) {
        for (worker_id, managed) in self.workers.iter_mut() {
            managed.state = ProcessState::Stopping;
            if let Some(child) = managed.child.as_mut() {
                if let Some(pid) = child.id() {
                    send_sigterm(pid, worker_id);
                }
            }
        }

        tokio::time::sleep(self.config.shutdown_grace).await;

        for (worker_id, managed) in self.workers.iter_mut() {
            if let Some(child) = managed.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(_)) => {
                        managed.state = ProcessState::Terminated;
                    }
                    _ => {
                        warn!(%worker_id, "worker did not exit within grace period, killing");
                        let _ = child.start_kill();
                        managed.state = ProcessState::Terminated;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32, worker_id: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(%worker_id, pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32, _worker_id: &str) {}
