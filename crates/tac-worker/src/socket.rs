//! DEALER socket construction for the worker's single connection into the
//! broker's backend ROUTER (spec §4.C).
//!
//! Grounded on `tac_proto::socket_config`'s ROUTER-side tuning, narrowed to
//! the DEALER side: same linger/reconnect options, `tmq::dealer` instead of
//! `tmq::router`, `connect` instead of `bind`. Unlike the broker, a worker
//! never needs an explicit identity frame on send or receive: `tmq`'s DEALER
//! socket exchanges single-frame bodies and the peer ROUTER handles identity
//! framing transparently.

use anyhow::{Context, Result};
use futures::{Sink, Stream};
use tmq::{dealer, TmqError};

pub use tmq::Context as ZmqContext;
pub use tmq::Multipart;

use tac_proto::socket_config::{DEFAULT_RECONNECT_IVL_MAX_MS, DEFAULT_RECONNECT_IVL_MS};

/// Trait bound for the worker's DEALER socket.
pub trait DealerSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> DealerSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Connect a DEALER socket to the broker's backend endpoint.
pub fn connect_dealer(ctx: &ZmqContext, endpoint: &str) -> Result<impl DealerSocket> {
    dealer(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .connect(endpoint)
        .with_context(|| format!("failed to connect DEALER socket to {endpoint}"))
}
