use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] tac_store::StoreError),
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
