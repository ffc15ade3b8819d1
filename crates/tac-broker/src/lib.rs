//! Broker, worker registry, supervisor, metrics, and HTTP monitoring plane
//! for the request-dispatch core (components B, D, E, F, G).
//!
//! `tac-proto` carries the wire types, `tac-store` the durable audit log;
//! this crate is the process that wires them together and runs the
//! `tokio::select!` dispatch loop.

pub mod bootstrap;
pub mod broker;
pub mod error;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod supervisor;
pub mod telemetry;

pub use bootstrap::{run, BootstrapError, BootstrapOptions};
pub use broker::{Broker, BrokerConfig};
pub use error::BrokerError;
pub use metrics::Metrics;
pub use registry::{Registry, RegistrySnapshot, WorkerId};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorEvent};
