use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(ConfigError::Validation(format!("unknown log level: {other}"))),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Full runtime configuration (spec.md §3's config table, plus a handful of
/// fields spec.md's prose requires but its config table omits by name:
/// `queue_multiplier`, `max_payload_bytes`, `shutdown_grace`, `otlp_endpoint`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub frontend_endpoint: String,
    pub backend_endpoint: String,
    pub http_endpoint: String,
    pub worker_count: u32,
    pub request_timeout: Duration,
    pub worker_heartbeat_interval: Duration,
    pub worker_heartbeat_timeout: Duration,
    pub worker_max_restarts_per_minute: u32,
    pub max_retries: u32,
    pub persistence_path: PathBuf,
    pub max_recent_requests: usize,
    pub log_level: LogLevel,
    /// Pending-queue bound = `worker_count * queue_multiplier` (spec §4.E.2/§8 S4).
    pub queue_multiplier: u32,
    /// Front-socket payload size ceiling before `E_BAD_REQUEST` (spec §4.E.2).
    pub max_payload_bytes: usize,
    /// Grace period given to each component during shutdown (spec §4.H).
    pub shutdown_grace: Duration,
    /// OTLP collector endpoint; `None` disables telemetry export entirely.
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frontend_endpoint: "tcp://0.0.0.0:5555".to_string(),
            backend_endpoint: "tcp://0.0.0.0:5556".to_string(),
            http_endpoint: "0.0.0.0:8080".to_string(),
            worker_count: 4,
            request_timeout: Duration::from_secs(5),
            worker_heartbeat_interval: Duration::from_secs(5),
            worker_heartbeat_timeout: Duration::from_secs(20),
            worker_max_restarts_per_minute: 10,
            max_retries: 3,
            persistence_path: PathBuf::from("./data/tacoreservice"),
            max_recent_requests: 1000,
            log_level: LogLevel::Info,
            queue_multiplier: 2,
            max_payload_bytes: 1024 * 1024,
            shutdown_grace: Duration::from_secs(10),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    /// Validate the invariants spec.md §3/§4.H call out explicitly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count < 1 {
            return Err(ConfigError::Validation(
                "worker_count must be >= 1".to_string(),
            ));
        }
        if self.worker_heartbeat_timeout < self.worker_heartbeat_interval.saturating_mul(3) {
            return Err(ConfigError::Validation(format!(
                "worker_heartbeat_timeout ({:?}) must be >= 3x worker_heartbeat_interval ({:?})",
                self.worker_heartbeat_timeout, self.worker_heartbeat_interval
            )));
        }
        if self.max_retries < 1 {
            return Err(ConfigError::Validation(
                "max_retries must be >= 1".to_string(),
            ));
        }
        if self.queue_multiplier < 1 {
            return Err(ConfigError::Validation(
                "queue_multiplier must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bound of the broker's pending-request FIFO (spec §4.E.2/S4).
    pub fn queue_capacity(&self) -> usize {
        self.worker_count as usize * self.queue_multiplier as usize
    }
}
