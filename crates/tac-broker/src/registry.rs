//! In-memory worker registry (component B). Owned exclusively by the broker
//! event loop — no internal locking, single-writer discipline (spec §4.B/§5).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

pub type WorkerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Idle,
    Busy,
    Unresponsive,
    Dead,
}

#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    pub current_request_id: Option<uuid::Uuid>,
    pub processed_count: u64,
    pub failed_count: u64,
    pub last_heartbeat_at: Instant,
    pub pid: u32,
}

impl WorkerEntry {
    fn new(worker_id: WorkerId, pid: u32, now: Instant) -> Self {
        Self {
            worker_id,
            state: WorkerState::Starting,
            current_request_id: None,
            processed_count: 0,
            failed_count: 0,
            last_heartbeat_at: now,
            pid,
        }
    }

    /// Serializable snapshot for the HTTP plane (component G).
    pub fn public_view(&self, now: Instant) -> WorkerPublicView {
        WorkerPublicView {
            worker_id: self.worker_id.clone(),
            state: self.state,
            processed_count: self.processed_count,
            failed_count: self.failed_count,
            last_heartbeat_age_ms: now.saturating_duration_since(self.last_heartbeat_at).as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPublicView {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    pub processed_count: u64,
    pub failed_count: u64,
    pub last_heartbeat_age_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("worker {0} already registered")]
    AlreadyRegistered(WorkerId),
    #[error("worker {0} not found")]
    NotFound(WorkerId),
    #[error("worker {0} is not idle")]
    NotIdle(WorkerId),
}

/// The worker table itself. See spec §4.B for the operation contract.
#[derive(Debug, Default)]
pub struct Registry {
    workers: HashMap<WorkerId, WorkerEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    pub fn register(&mut self, worker_id: WorkerId, pid: u32, now: Instant) -> Result<(), RegistryError> {
        if self.workers.contains_key(&worker_id) {
            return Err(RegistryError::AlreadyRegistered(worker_id));
        }
        self.workers.insert(worker_id.clone(), WorkerEntry::new(worker_id, pid, now));
        Ok(())
    }

    pub fn mark_ready(&mut self, worker_id: &str, now: Instant) -> Result<(), RegistryError> {
        let entry = self.get_mut(worker_id)?;
        entry.state = WorkerState::Idle;
        entry.last_heartbeat_at = now;
        Ok(())
    }

    pub fn assign(
        &mut self,
        worker_id: &str,
        request_id: uuid::Uuid,
    ) -> Result<(), RegistryError> {
        let entry = self.get_mut(worker_id)?;
        if entry.state != WorkerState::Idle {
            return Err(RegistryError::NotIdle(worker_id.to_string()));
        }
        entry.state = WorkerState::Busy;
        entry.current_request_id = Some(request_id);
        Ok(())
    }

    pub fn release(&mut self, worker_id: &str, success: bool, now: Instant) -> Result<(), RegistryError> {
        let entry = self.get_mut(worker_id)?;
        entry.state = WorkerState::Idle;
        entry.current_request_id = None;
        entry.last_heartbeat_at = now;
        if success {
            entry.processed_count += 1;
        } else {
            entry.failed_count += 1;
        }
        Ok(())
    }

    pub fn heartbeat(&mut self, worker_id: &str, now: Instant) -> Result<(), RegistryError> {
        let entry = self.get_mut(worker_id)?;
        entry.last_heartbeat_at = now;
        if entry.state == WorkerState::Unresponsive {
            entry.state = WorkerState::Idle;
        }
        Ok(())
    }

    /// Flip any worker whose heartbeat has gone stale to UNRESPONSIVE,
    /// returning the in-flight `request_id` of each so the broker can fail
    /// and retry it (spec §4.B).
    pub fn sweep(&mut self, now: Instant, heartbeat_timeout: Duration) -> Vec<(WorkerId, uuid::Uuid)> {
        let mut stale = Vec::new();
        for entry in self.workers.values_mut() {
            if entry.state == WorkerState::Dead {
                continue;
            }
            if now.saturating_duration_since(entry.last_heartbeat_at) > heartbeat_timeout
                && entry.state != WorkerState::Unresponsive
            {
                entry.state = WorkerState::Unresponsive;
                if let Some(request_id) = entry.current_request_id.take() {
                    stale.push((entry.worker_id.clone(), request_id));
                }
            }
        }
        stale
    }

    /// Select the least-loaded idle worker, tie-broken deterministically
    /// (spec §4.E): lowest `processed_count + active`, earliest heartbeat,
    /// lexicographic `worker_id`.
    pub fn pick_idle(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.state == WorkerState::Idle)
            .min_by(|a, b| {
                let a_active = if a.current_request_id.is_some() { 1 } else { 0 };
                let b_active = if b.current_request_id.is_some() { 1 } else { 0 };
                (a.processed_count + a_active, a.last_heartbeat_at, &a.worker_id).cmp(&(
                    b.processed_count + b_active,
                    b.last_heartbeat_at,
                    &b.worker_id,
                ))
            })
            .map(|w| w.worker_id.clone())
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerEntry> {
        self.workers.get(worker_id)
    }

    fn get_mut(&mut self, worker_id: &str) -> Result<&mut WorkerEntry, RegistryError> {
        self.workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::NotFound(worker_id.to_string()))
    }

    /// Remove a worker entirely, e.g. after repeated crashes (spec §4.D: "the
    /// registry entry is erased and a fresh worker_id is used").
    pub fn remove(&mut self, worker_id: &str) -> Option<WorkerEntry> {
        self.workers.remove(worker_id)
    }

    pub fn mark_dead(&mut self, worker_id: &str) -> Result<(), RegistryError> {
        let entry = self.get_mut(worker_id)?;
        entry.state = WorkerState::Dead;
        entry.current_request_id = None;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn count_idle(&self) -> usize {
        self.workers.values().filter(|w| w.state == WorkerState::Idle).count()
    }

    pub fn count_busy(&self) -> usize {
        self.workers.values().filter(|w| w.state == WorkerState::Busy).count()
    }

    pub fn count_live(&self) -> usize {
        self.workers
            .values()
            .filter(|w| !matches!(w.state, WorkerState::Dead))
            .count()
    }

    pub fn public_views(&self, now: Instant) -> Vec<WorkerPublicView> {
        self.workers.values().map(|w| w.public_view(now)).collect()
    }

    /// A point-in-time copy for the HTTP monitoring plane (component G),
    /// which never touches the registry directly (spec §9). `degraded` is
    /// supervisor state, not registry state, and is folded in by the caller.
    pub fn snapshot(&self, now: Instant, degraded: bool) -> RegistrySnapshot {
        RegistrySnapshot {
            idle: self.count_idle(),
            busy: self.count_busy(),
            live: self.count_live(),
            views: self.public_views(now),
            degraded,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub idle: usize,
    pub busy: usize,
    pub live: usize,
    pub views: Vec<WorkerPublicView>,
    pub degraded: bool,
}
