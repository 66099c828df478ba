//! Prometheus metrics for database operations.
//!
//! One duration histogram per operation, labeled by operation kind, logical
//! query identity and outcome. Recording is best-effort: a failed label
//! lookup is logged at debug level and never reaches the driver.

use std::time::Duration;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use crate::operation::OperationKind;
use crate::query_name::QueryIdentity;

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "db_tracer";

/// Status label values.
const STATUS_SUCCESS: &str = "success";
const STATUS_ERROR: &str = "error";

/// Database latency buckets (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Operation metrics registered in a Prometheus registry.
#[derive(Clone)]
pub struct MetricsRecorder {
    registry: Registry,

    /// Operation duration in seconds by operation, query_name, query_type, status
    pub operation_duration_seconds: HistogramVec,

    /// Batch statements by query_name, query_type, status
    pub batch_queries_total: CounterVec,
}

impl MetricsRecorder {
    /// Create a recorder with its own registry and the default prefix.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new(), DEFAULT_PREFIX)
    }

    /// Create a recorder with its own registry and a custom prefix.
    pub fn with_prefix(prefix: &str) -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new(), prefix)
    }

    /// Register the metrics into a caller-supplied registry.
    ///
    /// Fails if metrics with the same names are already registered there.
    pub fn with_registry(registry: Registry, prefix: &str) -> Result<Self, prometheus::Error> {
        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_operation_duration_seconds", prefix),
                "Database operation duration in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation", "query_name", "query_type", "status"],
        )?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        let batch_queries_total = CounterVec::new(
            Opts::new(
                format!("{}_batch_queries_total", prefix),
                "Total statements executed inside batches",
            ),
            &["query_name", "query_type", "status"],
        )?;
        registry.register(Box::new(batch_queries_total.clone()))?;

        Ok(Self {
            registry,
            operation_duration_seconds,
            batch_queries_total,
        })
    }

    /// Record one completed operation.
    ///
    /// Kinds without SQL use the kind label for both name and type.
    pub fn observe(
        &self,
        kind: OperationKind,
        identity: Option<&QueryIdentity>,
        elapsed: Duration,
        failed: bool,
    ) {
        let (name, query_type) = match identity {
            Some(identity) => (identity.name.as_str(), identity.operation_type.as_str()),
            None => (kind.as_str(), kind.as_str()),
        };

        match self.operation_duration_seconds.get_metric_with_label_values(&[
            kind.as_str(),
            name,
            query_type,
            status_label(failed),
        ]) {
            Ok(histogram) => histogram.observe(elapsed.as_secs_f64()),
            Err(e) => {
                tracing::debug!(target: crate::LOG_TARGET, error = %e, operation = kind.as_str(), "Failed to record duration")
            }
        }
    }

    /// Count one batch statement.
    pub fn count_batch_query(&self, identity: &QueryIdentity, failed: bool) {
        match self.batch_queries_total.get_metric_with_label_values(&[
            &identity.name,
            &identity.operation_type,
            status_label(failed),
        ]) {
            Ok(counter) => counter.inc(),
            Err(e) => {
                tracing::debug!(target: crate::LOG_TARGET, error = %e, "Failed to count batch query")
            }
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::debug!(target: crate::LOG_TARGET, error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get the Prometheus registry (for exposing or adding custom metrics).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[inline]
fn status_label(failed: bool) -> &'static str {
    if failed {
        STATUS_ERROR
    } else {
        STATUS_SUCCESS
    }
}
