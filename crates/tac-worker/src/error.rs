//! Worker-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect to broker backend: {0}")]
    Connect(#[source] anyhow::Error),
    #[error("malformed frame from broker: {0}")]
    MalformedFrame(String),
    #[error("socket send/receive failed: {0}")]
    Socket(String),
}
