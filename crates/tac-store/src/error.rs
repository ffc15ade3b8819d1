use thiserror::Error;
use uuid::Uuid;

use crate::record::Status;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("request {0} already exists")]
    DuplicateId(Uuid),
    #[error("request {0} not found")]
    NotFound(Uuid),
    #[error("illegal transition for {request_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        request_id: Uuid,
        from: Status,
        to: Status,
    },
}
