//! Durable request/response audit log (component A).
//!
//! A [`Store`] is a thin wrapper over a `sled::Db` with two trees: `requests`
//! (the row itself, keyed by `request_id`) and `requests_by_time` (a
//! secondary index for newest-first listing). Every write is flushed before
//! the call returns, matching spec §4.A's "durable before acknowledged"
//! guarantee.

mod error;
mod record;
mod store;

pub use error::StoreError;
pub use record::{transition_allowed, RequestFilter, RequestPatch, RequestRecord, Status};
pub use store::Store;
