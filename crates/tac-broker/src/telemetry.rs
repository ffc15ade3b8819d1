//! OpenTelemetry initialization, behind the `otel` feature.
//!
//! Grounded on `holler::telemetry`/`hootenanny::telemetry`: same
//! resource/exporter/processor wiring for traces, logs, and metrics, reduced
//! to a single `init`/`shutdown` pair (no per-signal timeout override — this
//! service has no equivalent need for an aggressively short export budget).

#[cfg(feature = "otel")]
mod enabled {
    use anyhow::{Context, Result};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::{global, KeyValue};
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
    use opentelemetry_sdk::Resource;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    pub fn init(otlp_endpoint: &str) -> Result<()> {
        let resource = Resource::builder_empty()
            .with_service_name("tac-broker")
            .with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
            .build();

        let endpoint = if otlp_endpoint.starts_with("http") {
            otlp_endpoint.to_string()
        } else {
            format!("http://{otlp_endpoint}")
        };

        let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.clone())
            .build()
            .context("failed to create OTLP span exporter")?;
        let batch_span_processor = opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build();
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_span_processor(batch_span_processor)
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource.clone())
            .build();
        let tracer = tracer_provider.tracer("tac-broker");
        global::set_tracer_provider(tracer_provider);

        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.clone())
            .build()
            .context("failed to create OTLP log exporter")?;
        let log_processor = opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build();
        let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
            .with_log_processor(log_processor)
            .with_resource(resource.clone())
            .build();

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .context("failed to create OTLP metric exporter")?;
        let metric_reader = opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build();
        let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(metric_reader)
            .with_resource(resource)
            .build();
        global::set_meter_provider(meter_provider);

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        let log_appender = opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tac_broker=debug"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(telemetry_layer)
            .with(log_appender)
            .init();

        tracing::info!(%otlp_endpoint, "opentelemetry initialized");
        Ok(())
    }

    pub fn shutdown() {
        tracing::info!("shutting down opentelemetry, providers flush on drop");
    }
}

#[cfg(feature = "otel")]
pub use enabled::{init, shutdown};

#[cfg(not(feature = "otel"))]
pub fn init(_otlp_endpoint: &str) -> anyhow::Result<()> {
    unreachable!("otel::init called without the `otel` feature enabled")
}

#[cfg(not(feature = "otel"))]
pub fn shutdown() {}
