//! The persisted request record (spec §3's "Request record").

use serde::{Deserialize, Serialize};
use tac_proto::ErrorCode;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Dispatched,
    Complete,
    Failed,
    Timeout,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Failed | Status::Timeout)
    }
}

/// Whether moving from `from` to `to` is a legal status transition (spec
/// §4.A: "fails with ... E_ILLEGAL_TRANSITION, e.g. COMPLETE->PENDING").
///
/// DISPATCHED->DISPATCHED is allowed: it's how a retry re-dispatches the
/// same `request_id` with a bumped `attempt` (spec §4.A supplement).
pub fn transition_allowed(from: Status, to: Status) -> bool {
    use Status::*;
    match (from, to) {
        (Pending, Dispatched) => true,
        (Pending, Complete) | (Pending, Failed) | (Pending, Timeout) => true,
        (Dispatched, Dispatched) => true,
        (Dispatched, Complete) | (Dispatched, Failed) | (Dispatched, Timeout) => true,
        _ => false,
    }
}

/// An immutable-once-terminal row in the persistence store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub source_module: Option<String>,
    pub method: String,
    /// Opaque serialized business arguments; the store never interprets these.
    pub payload: Vec<u8>,
    pub status: Status,
    pub worker_id: Option<String>,
    /// UTC nanoseconds since epoch.
    pub created_at: i64,
    pub dispatched_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub response_payload: Option<Vec<u8>>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub attempt: u32,
}

impl RequestRecord {
    pub fn new_pending(
        request_id: Uuid,
        source_module: Option<String>,
        method: String,
        payload: Vec<u8>,
        created_at: i64,
    ) -> Self {
        Self {
            request_id,
            source_module,
            method,
            payload,
            status: Status::Pending,
            worker_id: None,
            created_at,
            dispatched_at: None,
            completed_at: None,
            response_payload: None,
            error_code: None,
            error_message: None,
            attempt: 1,
        }
    }
}

/// Partial update applied atomically by [`crate::Store::update_request`].
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub status: Option<Status>,
    pub worker_id: Option<Option<String>>,
    pub dispatched_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub response_payload: Option<Vec<u8>>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub attempt: Option<u32>,
}

impl RequestPatch {
    pub fn dispatched(worker_id: String, at: i64) -> Self {
        Self {
            status: Some(Status::Dispatched),
            worker_id: Some(Some(worker_id)),
            dispatched_at: Some(at),
            ..Default::default()
        }
    }

    pub fn complete(response_payload: Vec<u8>, at: i64) -> Self {
        Self {
            status: Some(Status::Complete),
            completed_at: Some(at),
            response_payload: Some(response_payload),
            ..Default::default()
        }
    }

    pub fn failed(error_code: ErrorCode, error_message: String, at: i64) -> Self {
        Self {
            status: Some(Status::Failed),
            completed_at: Some(at),
            error_code: Some(error_code),
            error_message: Some(error_message),
            ..Default::default()
        }
    }

    pub fn timeout(error_code: ErrorCode, error_message: String, at: i64) -> Self {
        Self {
            status: Some(Status::Timeout),
            completed_at: Some(at),
            error_code: Some(error_code),
            error_message: Some(error_message),
            ..Default::default()
        }
    }

    /// Retry: re-dispatch the same `request_id` to a (possibly new) worker
    /// with `attempt` bumped, without minting a fresh row.
    pub fn retry_dispatched(worker_id: String, attempt: u32, at: i64) -> Self {
        Self {
            status: Some(Status::Dispatched),
            worker_id: Some(Some(worker_id)),
            dispatched_at: Some(at),
            attempt: Some(attempt),
            ..Default::default()
        }
    }
}

/// Filter for [`crate::Store::list_recent`].
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<Status>,
    pub method: Option<String>,
    pub source_module: Option<String>,
}

impl RequestFilter {
    pub fn matches(&self, record: &RequestRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if &record.method != method {
                return false;
            }
        }
        if let Some(source_module) = &self.source_module {
            if record.source_module.as_deref() != Some(source_module.as_str()) {
                return false;
            }
        }
        true
    }
}
