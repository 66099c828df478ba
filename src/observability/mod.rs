//! Observability backends for database operations.
//!
//! Each completed operation produces one client span, one duration
//! observation and, depending on policy, one structured log record.
//!
//! # Usage
//!
//! ## Prometheus Metrics
//!
//! ```rust,ignore
//! use db_tracer::observability::MetricsRecorder;
//!
//! let metrics = MetricsRecorder::new()?;
//! // ... hand it to DbTracer::builder().metrics(metrics.clone()) ...
//! println!("{}", metrics.export());
//! ```
//!
//! ## OTLP export (requires `otel` feature)
//!
//! ```rust,ignore
//! use db_tracer::observability::{init_tracing, shutdown_tracing, OtelConfig};
//!
//! init_tracing(&OtelConfig::from_env()?)?;
//! // ... spans from DbTracer::builder().build()? go to the collector ...
//! shutdown_tracing();
//! ```

pub mod log_emitter;
pub mod metrics;
pub mod spans;

#[cfg(feature = "otel")]
pub mod otel;

// Re-exports
pub use log_emitter::{LogEmitter, LogLevel, LogPolicy, LogRecord, LogSink, TracingLogSink};
pub use metrics::MetricsRecorder;
pub use spans::{span_attributes, SpanGuard, SpanManager};

#[cfg(feature = "otel")]
pub use otel::{init_tracing, shutdown_tracing, OtelConfig};
