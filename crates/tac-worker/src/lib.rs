//! Stateless RPC worker process for TACoreService (component C).
//!
//! A worker holds a single DEALER socket dialed into the broker's backend
//! ROUTER. It announces readiness, then processes one TASK to completion at
//! a time, dispatching through a `method -> handler` registry.

pub mod error;
pub mod handler;
pub mod socket;
pub mod worker;

pub use error::WorkerError;
pub use handler::{EchoHandler, Handler, HandlerRegistry};
pub use worker::{run, WorkerConfig};
