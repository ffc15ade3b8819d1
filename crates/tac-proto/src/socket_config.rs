//! Centralized ZMQ socket configuration for the broker's front/back ROUTER
//! sockets.
//!
//! Grounded on `hooteproto::socket_config`: same linger/reconnect tuning,
//! same "tmq doesn't export socket types, so expose a trait bound instead"
//! shape, narrowed from dealer+router+sub+pub down to just the ROUTER side
//! this service actually binds.

use anyhow::{Context, Result};
use futures::{Sink, Stream};
use tmq::{router, TmqError};

pub use tmq::Context as ZmqContext;
pub use tmq::Multipart;

pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1000;
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;

/// Trait bound for ROUTER sockets (send and receive with identities).
pub trait RouterSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> RouterSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Bind a ROUTER socket with the service's standard options.
pub fn create_router_and_bind(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<impl RouterSocket> {
    router(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .bind(endpoint)
        .with_context(|| format!("failed to bind {name} ROUTER socket to {endpoint}"))
}
