//! Configuration loading and validation for TACoreService (spec §4.H).
//!
//! [`Config`] holds every runtime knob spec.md §3 enumerates. [`loader`]
//! discovers TOML files, overlays environment variables, and validates the
//! cross-field invariants (e.g. heartbeat timeout vs. interval) before a
//! [`Config`] is handed to the rest of the workspace.

mod config;
mod error;
pub mod loader;

pub use config::{Config, LogLevel};
pub use error::ConfigError;
pub use loader::ConfigSources;
