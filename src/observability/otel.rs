//! OTLP export pipeline for operation spans.
//!
//! The tracer only talks to the OpenTelemetry API. Applications that want
//! spans exported call [`init_tracing`] once at startup to install a global
//! provider, and [`shutdown_tracing`] before exit to flush it.
//!
//! # Configuration
//!
//! - `OTEL_ENABLED`: Enable export (`1` or `true`)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: `http://localhost:4317`)
//! - `OTEL_SERVICE_NAME`: Service name in traces (default: `db_tracer`)
//! - `OTEL_SERVICE_VERSION`: Service version (default: from Cargo.toml)
//! - `OTEL_ENVIRONMENT`: Deployment environment (default: `development`)
//! - `OTEL_SAMPLING_RATIO`: Sampling ratio 0.0-1.0 (default: `1.0`)
//! - `OTEL_EXPORT_TIMEOUT`: Export timeout in seconds (default: `10`)

use std::time::Duration;

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{Config, Sampler},
    Resource,
};
use tracing::info;

use crate::config::parse::{env_bool, env_or, env_parse};
use crate::config::ConfigError;

// Resource keys (avoiding dependency on semconv_experimental feature)
const SERVICE_NAME: &str = "service.name";
const SERVICE_VERSION: &str = "service.version";
const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

/// OTLP exporter configuration.
#[derive(Debug, Clone)]
pub struct OtelConfig {
    /// OTLP endpoint (e.g., "http://collector:4317")
    pub endpoint: String,
    pub service_name: String,
    pub service_version: String,
    /// Deployment environment (production, staging, etc.)
    pub environment: String,
    /// Sampling ratio (0.0 - 1.0, 1.0 = sample all)
    pub sampling_ratio: f64,
    pub export_timeout_secs: u64,
    pub enabled: bool,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4317".into(),
            service_name: "db_tracer".into(),
            service_version: crate::PKG_VERSION.into(),
            environment: "development".into(),
            sampling_ratio: 1.0,
            export_timeout_secs: 10,
            enabled: false,
        }
    }
}

impl OtelConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sampling_ratio = env_parse("OTEL_SAMPLING_RATIO", defaults.sampling_ratio)?;
        if !(0.0..=1.0).contains(&sampling_ratio) {
            return Err(ConfigError::Invalid {
                key: "OTEL_SAMPLING_RATIO".into(),
                message: format!("{} is outside 0.0-1.0", sampling_ratio),
            });
        }

        let enabled = env_bool("OTEL_ENABLED", false);
        let endpoint = env_or("OTEL_EXPORTER_OTLP_ENDPOINT", &defaults.endpoint);
        if enabled && endpoint.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "OTEL_EXPORTER_OTLP_ENDPOINT".into(),
            });
        }

        Ok(Self {
            endpoint,
            service_name: env_or("OTEL_SERVICE_NAME", &defaults.service_name),
            service_version: env_or("OTEL_SERVICE_VERSION", &defaults.service_version),
            environment: env_or("OTEL_ENVIRONMENT", &defaults.environment),
            sampling_ratio,
            export_timeout_secs: env_parse("OTEL_EXPORT_TIMEOUT", defaults.export_timeout_secs)?,
            enabled,
        })
    }

    /// Check if export is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Install a global tracer provider exporting over OTLP.
///
/// A no-op when export is disabled; spans then go to the default no-op
/// provider. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built.
pub fn init_tracing(config: &OtelConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!(target: crate::LOG_TARGET, "OpenTelemetry disabled (OTEL_ENABLED != 1)");
        return Ok(());
    }

    let resource = Resource::new([
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
        KeyValue::new(DEPLOYMENT_ENVIRONMENT, config.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .with_timeout(Duration::from_secs(config.export_timeout_secs))
        .build()?;

    let tracer_provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            Config::default()
                .with_resource(resource)
                .with_sampler(Sampler::TraceIdRatioBased(config.sampling_ratio)),
        )
        .build();

    global::set_tracer_provider(tracer_provider);

    info!(
        target: crate::LOG_TARGET,
        endpoint = %config.endpoint,
        service = %config.service_name,
        environment = %config.environment,
        sampling = %config.sampling_ratio,
        "OpenTelemetry tracing initialized"
    );

    Ok(())
}

/// Flush pending spans and shut the global provider down.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
    info!(target: crate::LOG_TARGET, "OpenTelemetry tracing shutdown complete");
}
