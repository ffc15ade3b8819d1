//! Persistent storage for request records using sled.
//!
//! Grounded on `hootenanny::persistence::conversation_store`: same
//! `sled::Config` tuning, same multi-tree layout, same bincode row encoding,
//! same `Drop`-flushes-on-shutdown discipline, generalized from a single
//! conversation-tree blob to a `request_id`-keyed table with a secondary
//! time-ordered index.

use std::path::Path;

use tac_proto::ErrorCode;
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::{transition_allowed, RequestFilter, RequestPatch, RequestRecord, Status};

/// Durable record of every request, response, and worker lifecycle event
/// (component A). See [`crate`] docs for the access pattern.
#[derive(Debug)]
pub struct Store {
    db: sled::Db,
    requests: sled::Tree,
    by_time: sled::Tree,
}

fn time_key(created_at: i64, request_id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 16);
    // Big-endian so lexicographic byte order == numeric order, letting sled's
    // tree iteration do the "newest first" sort for us.
    key.extend_from_slice(&created_at.to_be_bytes());
    key.extend_from_slice(request_id.as_bytes());
    key
}

impl Store {
    /// Open or create a store at the given directory.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let config = sled::Config::new()
            .path(dir)
            .cache_capacity(1024 * 1024 * 100)
            .flush_every_ms(Some(1000))
            .mode(sled::Mode::HighThroughput);

        let db = config.open()?;
        let requests = db.open_tree("requests")?;
        let by_time = db.open_tree("requests_by_time")?;

        Ok(Self {
            db,
            requests,
            by_time,
        })
    }

    /// Write a new PENDING row. Fails with [`StoreError::DuplicateId`] if
    /// `request_id` already exists (spec §4.A).
    pub fn append_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let key = record.request_id.as_bytes();
        if self.requests.contains_key(key)? {
            return Err(StoreError::DuplicateId(record.request_id));
        }

        let value = bincode::serialize(record)?;
        self.requests.insert(key, value)?;
        self.by_time
            .insert(time_key(record.created_at, record.request_id), &[])?;

        // Durable before the broker acknowledges dispatch (spec §4.A guarantee).
        self.db.flush()?;
        Ok(())
    }

    /// Atomically transition status and fill in timing/response fields.
    pub fn update_request(
        &self,
        request_id: Uuid,
        patch: RequestPatch,
    ) -> Result<RequestRecord, StoreError> {
        let key = request_id.as_bytes();
        let existing = self
            .requests
            .get(key)?
            .ok_or(StoreError::NotFound(request_id))?;
        let mut record: RequestRecord = bincode::deserialize(&existing)?;

        if let Some(new_status) = patch.status {
            if !transition_allowed(record.status, new_status) {
                return Err(StoreError::IllegalTransition {
                    request_id,
                    from: record.status,
                    to: new_status,
                });
            }
            record.status = new_status;
        }
        if let Some(worker_id) = patch.worker_id {
            record.worker_id = worker_id;
        }
        if let Some(v) = patch.dispatched_at {
            record.dispatched_at = Some(v);
        }
        if let Some(v) = patch.completed_at {
            record.completed_at = Some(v);
        }
        if let Some(v) = patch.response_payload {
            record.response_payload = Some(v);
        }
        if let Some(v) = patch.error_code {
            record.error_code = Some(v);
        }
        if let Some(v) = patch.error_message {
            record.error_message = Some(v);
        }
        if let Some(v) = patch.attempt {
            record.attempt = v;
        }

        let value = bincode::serialize(&record)?;
        self.requests.insert(key, value)?;
        self.db.flush()?;
        Ok(record)
    }

    pub fn get_request(&self, request_id: Uuid) -> Result<Option<RequestRecord>, StoreError> {
        match self.requests.get(request_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Newest-first, optionally filtered, bounded to `limit` rows.
    pub fn list_recent(
        &self,
        limit: usize,
        filter: Option<&RequestFilter>,
    ) -> Result<Vec<RequestRecord>, StoreError> {
        let mut out = Vec::with_capacity(limit.min(256));
        for entry in self.by_time.iter().rev() {
            let (key, _) = entry?;
            if key.len() < 16 {
                continue;
            }
            let id_bytes = &key[key.len() - 16..];
            let request_id = Uuid::from_slice(id_bytes).map_err(|_| {
                StoreError::NotFound(Uuid::nil()) // malformed key, should never happen
            })?;
            let Some(record) = self.get_request(request_id)? else {
                continue;
            };
            if filter.map(|f| f.matches(&record)).unwrap_or(true) {
                out.push(record);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Crash-recovery rehydration (spec §4.A/S5): rewrite any row still in
    /// {PENDING, DISPATCHED} whose age exceeds `request_timeout_nanos` as
    /// TIMEOUT/E_RECOVERY_ABORT. Returns how many rows were rewritten.
    pub fn recover(&self, now: i64, request_timeout_nanos: i64) -> Result<usize, StoreError> {
        let mut stale = Vec::new();
        for entry in self.requests.iter() {
            let (_, value) = entry?;
            let record: RequestRecord = bincode::deserialize(&value)?;
            if matches!(record.status, Status::Pending | Status::Dispatched)
                && now.saturating_sub(record.created_at) > request_timeout_nanos
            {
                stale.push(record.request_id);
            }
        }

        for request_id in &stale {
            self.update_request(
                *request_id,
                RequestPatch::timeout(ErrorCode::ERecoveryAbort, "broker restarted".into(), now),
            )?;
        }

        Ok(stale.len())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            tracing::error!("failed to flush request store on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RequestFilter;
    use tempfile::TempDir;

    fn sample(id: Uuid, created_at: i64) -> RequestRecord {
        RequestRecord::new_pending(id, Some("scanner".into()), "echo".into(), b"hi".to_vec(), created_at)
    }

    #[test]
    fn append_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store.append_request(&sample(id, 1)).unwrap();

        let loaded = store.get_request(id).unwrap().expect("record present");
        assert_eq!(loaded.request_id, id);
        assert_eq!(loaded.status, Status::Pending);
    }

    #[test]
    fn duplicate_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store.append_request(&sample(id, 1)).unwrap();
        let err = store.append_request(&sample(id, 2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));
    }

    #[test]
    fn illegal_transition_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store.append_request(&sample(id, 1)).unwrap();
        store
            .update_request(id, RequestPatch::complete(b"done".to_vec(), 5))
            .unwrap();

        // COMPLETE -> PENDING is illegal (spec §4.A example).
        let err = store
            .update_request(
                id,
                RequestPatch {
                    status: Some(Status::Pending),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn not_found_on_unknown_id() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let err = store
            .update_request(Uuid::new_v4(), RequestPatch::complete(vec![], 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            store.append_request(&sample(*id, i as i64)).unwrap();
        }

        let recent = store.list_recent(3, None).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].request_id, ids[4]);
        assert_eq!(recent[1].request_id, ids[3]);
        assert_eq!(recent[2].request_id, ids[2]);
    }

    #[test]
    fn list_recent_filters_by_status() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let completed = Uuid::new_v4();
        let pending = Uuid::new_v4();
        store.append_request(&sample(completed, 1)).unwrap();
        store.append_request(&sample(pending, 2)).unwrap();
        store
            .update_request(completed, RequestPatch::complete(vec![], 3))
            .unwrap();

        let filter = RequestFilter {
            status: Some(Status::Complete),
            ..Default::default()
        };
        let results = store.list_recent(10, Some(&filter)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].request_id, completed);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let store = Store::open(dir.path()).unwrap();
            store.append_request(&sample(id, 1)).unwrap();
            store.flush().unwrap();
        }
        {
            let store = Store::open(dir.path()).unwrap();
            assert!(store.get_request(id).unwrap().is_some());
        }
    }

    #[test]
    fn recover_rewrites_stale_pending_rows() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let stale_id = Uuid::new_v4();
        let fresh_id = Uuid::new_v4();
        store.append_request(&sample(stale_id, 0)).unwrap();
        store.append_request(&sample(fresh_id, 1_000_000_000_000)).unwrap();

        let rewritten = store.recover(1_000_000_000_000, 5_000_000_000).unwrap();
        assert_eq!(rewritten, 1);

        let stale = store.get_request(stale_id).unwrap().unwrap();
        assert_eq!(stale.status, Status::Timeout);
        assert_eq!(stale.error_code, Some(ErrorCode::ERecoveryAbort));

        let fresh = store.get_request(fresh_id).unwrap().unwrap();
        assert_eq!(fresh.status, Status::Pending);
    }

    #[test]
    fn retry_reuses_request_id_and_bumps_attempt() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store.append_request(&sample(id, 1)).unwrap();
        store
            .update_request(id, RequestPatch::dispatched("worker-1".into(), 2))
            .unwrap();
        let retried = store
            .update_request(id, RequestPatch::retry_dispatched("worker-2".into(), 2, 10))
            .unwrap();

        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.worker_id.as_deref(), Some("worker-2"));
        assert_eq!(retried.status, Status::Dispatched);
    }
}
