//! Logging and OpenTelemetry setup for jobgate.
//!
//! Local runs get a `tracing-subscriber` fmt layer filtered by `RUST_LOG`
//! (or the configured level). With an OTLP endpoint the server's spans,
//! `jobgate.*` counters, and log records are exported as well.

pub mod metrics;
pub mod work;

use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::{Error, Result};

/// Tracer and meter scope name used for every jobgate signal.
pub const SCOPE: &str = "jobgate";

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"). `None` keeps
    /// everything local.
    pub endpoint: Option<String>,
    /// The service name reported in telemetry signals.
    pub service_name: String,
    /// Filter used when `RUST_LOG` is not set (e.g. "info", "jobgate=debug").
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.otel_endpoint.clone(),
            log_level: config.log_level.clone(),
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            service_name: SCOPE.to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Keeps the OTLP pipelines alive. Dropping it flushes and shuts them down.
#[derive(Default)]
pub struct TelemetryGuard {
    providers: Option<Providers>,
}

struct Providers {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl TelemetryGuard {
    /// True when signals are exported to an OTLP endpoint.
    pub fn is_exporting(&self) -> bool {
        self.providers.is_some()
    }

    /// Push out anything still buffered. Useful before a short-lived
    /// process such as the demo exits.
    pub fn force_flush(&self) {
        if let Some(p) = &self.providers {
            let _ = p.tracer.force_flush();
            let _ = p.meter.force_flush();
            let _ = p.logger.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // Logs first so records about the shutdown itself are not lost.
        if let Some(p) = self.providers.take() {
            let _ = p.logger.shutdown();
            let _ = p.meter.shutdown();
            let _ = p.tracer.shutdown();
        }
    }
}

/// Install the global subscriber and, with an endpoint, the OTLP pipelines.
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already
/// installed (e.g. by another test in the same process).
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = config.env_filter();

    let Some(endpoint) = config.endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(subscriber_error)?;
        tracing::debug!(service = %config.service_name, "telemetry: local output only");
        return Ok(TelemetryGuard::default());
    };

    let providers = Providers::otlp(endpoint, resource(&config.service_name))?;
    opentelemetry::global::set_meter_provider(providers.meter.clone());

    let otel_trace_layer =
        tracing_opentelemetry::layer().with_tracer(providers.tracer.tracer(SCOPE));
    let otel_log_layer =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&providers.logger);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .try_init()
        .map_err(subscriber_error)?;
    tracing::info!(service = %config.service_name, endpoint, "telemetry: exporting over OTLP");

    Ok(TelemetryGuard {
        providers: Some(providers),
    })
}

fn resource(service_name: &str) -> Resource {
    use opentelemetry::KeyValue;
    use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;

    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
        .build()
}

impl Providers {
    fn otlp(endpoint: &str, resource: Resource) -> Result<Self> {
        use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig as _};

        let spans = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", e))?;
        let metrics = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", e))?;
        let logs = LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", e))?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            meter: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }
}

fn exporter_error(signal: &str, e: impl std::fmt::Display) -> Error {
    Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

fn subscriber_error(e: impl std::fmt::Display) -> Error {
    Error::Other(format!("failed to init tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_keeps_endpoint_and_level() {
        let config = Config {
            secret: crate::config::secrets::SecretString::from("x".repeat(32)),
            default_timeout: std::time::Duration::from_secs(60),
            otel_endpoint: Some("http://collector:4317".to_string()),
            log_level: "jobgate=trace".to_string(),
        };
        let telemetry = TelemetryConfig::from_config(&config);
        assert_eq!(telemetry.endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(telemetry.log_level, "jobgate=trace");
        assert_eq!(telemetry.service_name, SCOPE);
    }

    #[test]
    fn local_guard_does_not_export() {
        let guard = TelemetryGuard::default();
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}
