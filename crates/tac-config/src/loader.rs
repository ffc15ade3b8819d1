//! Config file discovery, TOML loading, and environment variable overlay.
//!
//! Grounded on `hooteconf::loader`'s discovery precedence and provenance
//! tracking, adapted to `tac-config`'s flat config shape.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::{Config, LogLevel};
use crate::error::ConfigError;

/// Where config values came from, for debug logging at bootstrap.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

/// Raw, partially-specified config as parsed straight out of TOML. Every
/// field is optional so a file only needs to mention what it overrides;
/// unset fields fall through to [`Config::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    frontend_endpoint: Option<String>,
    backend_endpoint: Option<String>,
    http_endpoint: Option<String>,
    worker_count: Option<u32>,
    request_timeout_secs: Option<u64>,
    worker_heartbeat_interval_secs: Option<u64>,
    worker_heartbeat_timeout_secs: Option<u64>,
    worker_max_restarts_per_minute: Option<u32>,
    max_retries: Option<u32>,
    persistence_path: Option<String>,
    max_recent_requests: Option<usize>,
    log_level: Option<String>,
    queue_multiplier: Option<u32>,
    max_payload_bytes: Option<usize>,
    shutdown_grace_secs: Option<u64>,
    otlp_endpoint: Option<String>,
}

impl RawConfig {
    /// Apply every `Some` field onto `base`, overlay wins.
    fn overlay_onto(self, mut base: Config) -> Result<Config, ConfigError> {
        if let Some(v) = self.frontend_endpoint {
            base.frontend_endpoint = v;
        }
        if let Some(v) = self.backend_endpoint {
            base.backend_endpoint = v;
        }
        if let Some(v) = self.http_endpoint {
            base.http_endpoint = v;
        }
        if let Some(v) = self.worker_count {
            base.worker_count = v;
        }
        if let Some(v) = self.request_timeout_secs {
            base.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.worker_heartbeat_interval_secs {
            base.worker_heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.worker_heartbeat_timeout_secs {
            base.worker_heartbeat_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.worker_max_restarts_per_minute {
            base.worker_max_restarts_per_minute = v;
        }
        if let Some(v) = self.max_retries {
            base.max_retries = v;
        }
        if let Some(v) = self.persistence_path {
            base.persistence_path = expand_path(&v);
        }
        if let Some(v) = self.max_recent_requests {
            base.max_recent_requests = v;
        }
        if let Some(v) = self.log_level {
            base.log_level = v.parse::<LogLevel>()?;
        }
        if let Some(v) = self.queue_multiplier {
            base.queue_multiplier = v;
        }
        if let Some(v) = self.max_payload_bytes {
            base.max_payload_bytes = v;
        }
        if let Some(v) = self.shutdown_grace_secs {
            base.shutdown_grace = Duration::from_secs(v);
        }
        if let Some(v) = self.otlp_endpoint {
            base.otlp_endpoint = Some(v);
        }
        Ok(base)
    }
}

/// Discover config files in standard locations, in load order (system,
/// user, local/CLI). Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/tacoreservice/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("tacoreservice/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("tacoreservice.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

fn load_raw_from_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load config starting from defaults, layering every discovered file (in
/// discovery order) on top, then environment overrides, then validate.
pub fn load(cli_path: Option<&Path>) -> Result<(Config, ConfigSources), ConfigError> {
    let files = discover_config_files_with_override(cli_path);
    let mut config = Config::default();
    let mut sources = ConfigSources::default();

    for file in &files {
        let raw = load_raw_from_file(file)?;
        config = raw.overlay_onto(config)?;
        sources.files.push(file.clone());
    }

    apply_env_overrides(&mut config, &mut sources)?;
    config.validate()?;

    Ok((config, sources))
}

/// Apply environment variable overrides (spec.md §6's named list plus the
/// supplemental fields this workspace adds on top).
pub fn apply_env_overrides(
    config: &mut Config,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    macro_rules! override_string {
        ($env:literal, $field:expr) => {
            if let Ok(v) = env::var($env) {
                $field = v;
                sources.env_overrides.push($env.to_string());
            }
        };
    }
    macro_rules! override_parsed {
        ($env:literal, $field:expr, $parse:expr) => {
            if let Ok(v) = env::var($env) {
                match $parse(&v) {
                    Some(parsed) => {
                        $field = parsed;
                        sources.env_overrides.push($env.to_string());
                    }
                    None => {
                        return Err(ConfigError::Validation(format!(
                            "invalid value for {}: {v}",
                            $env
                        )))
                    }
                }
            }
        };
    }

    override_string!("FRONTEND_ENDPOINT", config.frontend_endpoint);
    override_string!("BACKEND_ENDPOINT", config.backend_endpoint);
    override_string!("HTTP_ENDPOINT", config.http_endpoint);
    override_parsed!("WORKER_COUNT", config.worker_count, |v: &str| v.parse().ok());
    override_parsed!("REQUEST_TIMEOUT", config.request_timeout, |v: &str| v
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs));
    if let Ok(v) = env::var("LOG_LEVEL") {
        config.log_level = v.parse::<LogLevel>()?;
        sources.env_overrides.push("LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        // Standard override alias, same as hooteconf does for RUST_LOG.
        if let Ok(level) = v.parse::<LogLevel>() {
            config.log_level = level;
            sources.env_overrides.push("RUST_LOG".to_string());
        }
    }
    if let Ok(v) = env::var("PERSISTENCE_PATH") {
        config.persistence_path = expand_path(&v);
        sources.env_overrides.push("PERSISTENCE_PATH".to_string());
    }

    override_parsed!(
        "WORKER_HEARTBEAT_INTERVAL",
        config.worker_heartbeat_interval,
        |v: &str| v.parse::<u64>().ok().map(Duration::from_secs)
    );
    override_parsed!(
        "WORKER_HEARTBEAT_TIMEOUT",
        config.worker_heartbeat_timeout,
        |v: &str| v.parse::<u64>().ok().map(Duration::from_secs)
    );
    override_parsed!(
        "WORKER_MAX_RESTARTS_PER_MINUTE",
        config.worker_max_restarts_per_minute,
        |v: &str| v.parse().ok()
    );
    override_parsed!("MAX_RETRIES", config.max_retries, |v: &str| v.parse().ok());
    override_parsed!(
        "MAX_RECENT_REQUESTS",
        config.max_recent_requests,
        |v: &str| v.parse().ok()
    );
    override_parsed!("QUEUE_MULTIPLIER", config.queue_multiplier, |v: &str| v
        .parse()
        .ok());
    override_parsed!(
        "MAX_PAYLOAD_BYTES",
        config.max_payload_bytes,
        |v: &str| v.parse().ok()
    );
    override_parsed!("SHUTDOWN_GRACE", config.shutdown_grace, |v: &str| v
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs));

    if let Ok(v) = env::var("OTLP_ENDPOINT") {
        config.otlp_endpoint = Some(v.clone());
        sources.env_overrides.push("OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.otlp_endpoint = Some(v);
        sources
            .env_overrides
            .push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }

    Ok(())
}

/// Expand `~/` and `$VAR/...` prefixes in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
            return PathBuf::from(path);
        }
        return env::var(stripped)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(path));
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("test/path"));
    }

    #[test]
    fn expand_path_absolute_is_unchanged() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn discover_config_files_does_not_panic() {
        let _ = discover_config_files();
    }

    #[test]
    fn parse_minimal_toml_overlays_only_named_fields() {
        let toml = r#"
worker_count = 8
"#;
        let raw: RawConfig = toml::from_str(toml).unwrap();
        let config = raw.overlay_onto(Config::default()).unwrap();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.http_endpoint, Config::default().http_endpoint);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
frontend_endpoint = "tcp://*:7000"
backend_endpoint = "tcp://*:7001"
http_endpoint = "0.0.0.0:9090"
worker_count = 6
request_timeout_secs = 10
worker_heartbeat_interval_secs = 5
worker_heartbeat_timeout_secs = 20
max_retries = 5
log_level = "debug"
"#;
        let raw: RawConfig = toml::from_str(toml).unwrap();
        let config = raw.overlay_onto(Config::default()).unwrap();
        assert_eq!(config.frontend_endpoint, "tcp://*:7000");
        assert_eq!(config.worker_count, 6);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test-local env var, no concurrent access to this key expected.
        unsafe {
            std::env::set_var("WORKER_COUNT", "11");
        }
        let mut config = Config::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources).unwrap();
        assert_eq!(config.worker_count, 11);
        assert!(sources.env_overrides.contains(&"WORKER_COUNT".to_string()));
        unsafe {
            std::env::remove_var("WORKER_COUNT");
        }
    }

    #[test]
    fn load_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid toml = = =").unwrap();
        let err = load_raw_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
