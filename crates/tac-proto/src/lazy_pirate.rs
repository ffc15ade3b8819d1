//! Lazy-Pirate retry/backoff primitives shared by the broker's retry sweep
//! and the worker's own reconnect logic.
//!
//! Named after the ZMQ "Lazy Pirate" reliable request-reply pattern (spec
//! glossary): timeouts and retries live in the dispatcher, not the client.

use std::time::Duration;

/// Tunable parameters for a retry/backoff sequence.
#[derive(Debug, Clone, Copy)]
pub struct LazyPirateConfig {
    /// Per-attempt timeout before a request is considered lost.
    pub timeout: Duration,
    /// Total attempts allowed for a single logical request (spec's `max_retries`).
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Backoff ceiling; the sequence never waits longer than this.
    pub backoff_max: Duration,
}

impl Default for LazyPirateConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl LazyPirateConfig {
    /// Exponential backoff for the given 1-based attempt number, capped at
    /// `backoff_max`. Attempt 1 waits `backoff_base`, attempt 2 waits
    /// `2 * backoff_base`, attempt 3 waits `4 * backoff_base`, etc.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let multiplier = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base
            .as_millis()
            .saturating_mul(multiplier as u128)
            .min(self.backoff_max.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is permitted given how many have already run.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_retries
    }
}

/// Outcome of a single attempt, independent of whether the caller decides to
/// retry — the caller (broker or worker) owns that decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult<T> {
    Success(T),
    Timeout,
    SendFailed,
    PeerDead,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_calculation() {
        let cfg = LazyPirateConfig {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        };

        assert_eq!(cfg.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(cfg.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(cfg.backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(cfg.backoff_for_attempt(4), Duration::from_secs(8));
        assert_eq!(cfg.backoff_for_attempt(5), Duration::from_secs(16));
        // caps at backoff_max
        assert_eq!(cfg.backoff_for_attempt(6), Duration::from_secs(30));
        assert_eq!(cfg.backoff_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn default_config_values() {
        let cfg = LazyPirateConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base, Duration::from_secs(1));
        assert_eq!(cfg.backoff_max, Duration::from_secs(30));
    }

    #[test]
    fn should_retry_respects_max() {
        let cfg = LazyPirateConfig {
            max_retries: 2,
            ..LazyPirateConfig::default()
        };
        assert!(cfg.should_retry(0));
        assert!(cfg.should_retry(1));
        assert!(!cfg.should_retry(2));
    }
}
