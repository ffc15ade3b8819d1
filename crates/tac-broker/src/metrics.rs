//! Rolling counters and per-method latency histograms (component F).
//!
//! Grounded on `hootenanny::event_buffer`'s stats-snapshot idiom (a plain
//! struct handed back copy-on-read) generalized from a single ring buffer to
//! counters plus a fixed-bucket histogram. The accumulator lives behind a
//! `std::sync::Mutex` rather than `tokio::sync`: critical sections are pure
//! arithmetic, never `.await`, so a blocking mutex is the right tool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use tac_proto::ErrorCode;

/// Upper bounds (inclusive) of each latency bucket, matching spec §4.F.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [1, 5, 10, 50, 100, 500, 1000, 5000];

#[derive(Debug, Clone)]
pub enum MetricEvent {
    RequestAccepted { method: String },
    RequestCompleted {
        method: String,
        latency: Duration,
    },
    RequestFailed {
        method: String,
        error_code: ErrorCode,
        latency: Option<Duration>,
    },
}

#[derive(Debug, Default)]
struct MethodHistogram {
    buckets: [u64; LATENCY_BUCKETS_MS.len() + 1], // last bucket is +Inf
}

impl MethodHistogram {
    fn observe(&mut self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[idx] += 1;
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        for (bound, count) in LATENCY_BUCKETS_MS.iter().zip(self.buckets.iter()) {
            out.insert(format!("le_{bound}ms"), *count);
        }
        out.insert(
            "le_inf".to_string(),
            self.buckets[LATENCY_BUCKETS_MS.len()],
        );
        out
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    requests_total: u64,
    requests_by_method: HashMap<String, u64>,
    errors_by_code: HashMap<ErrorCode, u64>,
    histograms: HashMap<String, MethodHistogram>,
}

/// Thread-safe metrics sink + reader. Cheap to clone (wraps an `Arc`
/// internally via the caller holding `Arc<Metrics>`, per the broker's
/// ownership model).
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<Accumulator>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: MetricEvent) {
        let mut acc = self.inner.lock().expect("metrics mutex poisoned");
        match event {
            MetricEvent::RequestAccepted { method } => {
                acc.requests_total += 1;
                *acc.requests_by_method.entry(method).or_insert(0) += 1;
            }
            MetricEvent::RequestCompleted { method, latency } => {
                acc.histograms.entry(method).or_default().observe(latency);
            }
            MetricEvent::RequestFailed {
                method,
                error_code,
                latency,
            } => {
                *acc.errors_by_code.entry(error_code).or_insert(0) += 1;
                if let Some(latency) = latency {
                    acc.histograms.entry(method).or_default().observe(latency);
                }
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let acc = self.inner.lock().expect("metrics mutex poisoned");
        MetricsSnapshot {
            requests_total: acc.requests_total,
            requests_by_method: acc.requests_by_method.clone(),
            errors_by_code: acc
                .errors_by_code
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            latency_histogram: acc
                .histograms
                .iter()
                .map(|(method, hist)| (method.clone(), hist.snapshot()))
                .collect(),
        }
    }
}

/// Copy-on-read view served by component G's `/stats` endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_by_method: HashMap<String, u64>,
    pub errors_by_code: HashMap<String, u64>,
    pub latency_histogram: HashMap<String, HashMap<String, u64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_by_method() {
        let metrics = Metrics::new();
        metrics.record(MetricEvent::RequestAccepted { method: "echo".into() });
        metrics.record(MetricEvent::RequestAccepted { method: "echo".into() });
        metrics.record(MetricEvent::RequestAccepted { method: "scan".into() });

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 3);
        assert_eq!(snap.requests_by_method["echo"], 2);
        assert_eq!(snap.requests_by_method["scan"], 1);
    }

    #[test]
    fn counts_errors_by_code() {
        let metrics = Metrics::new();
        metrics.record(MetricEvent::RequestFailed {
            method: "echo".into(),
            error_code: ErrorCode::EUnknownMethod,
            latency: None,
        });
        let snap = metrics.snapshot();
        assert_eq!(snap.errors_by_code["E_UNKNOWN_METHOD"], 1);
    }

    #[test]
    fn histogram_buckets_latency_correctly() {
        let metrics = Metrics::new();
        metrics.record(MetricEvent::RequestCompleted {
            method: "echo".into(),
            latency: Duration::from_millis(3),
        });
        metrics.record(MetricEvent::RequestCompleted {
            method: "echo".into(),
            latency: Duration::from_secs(10),
        });

        let snap = metrics.snapshot();
        let hist = &snap.latency_histogram["echo"];
        assert_eq!(hist["le_5ms"], 1);
        assert_eq!(hist["le_inf"], 1);
    }

    #[test]
    fn repeated_snapshots_with_no_traffic_are_identical() {
        let metrics = Metrics::new();
        metrics.record(MetricEvent::RequestAccepted { method: "echo".into() });
        let a = metrics.snapshot();
        let b = metrics.snapshot();
        assert_eq!(a.requests_total, b.requests_total);
        assert_eq!(a.requests_by_method, b.requests_by_method);
    }
}
