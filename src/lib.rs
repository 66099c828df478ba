//! db_tracer - Tracing, metrics and structured logging for PostgreSQL client operations.
//!
//! The driver calls a pair of hooks around every logical operation and the
//! tracer turns each pair into one OpenTelemetry client span, one Prometheus
//! duration observation and (depending on policy) one structured log record.
//! Callers keep issuing queries exactly as before.
//!
//! # Features
//!
//! - **Lifecycle hooks**: start/end pairs for query, batch, copy-from, prepare and connect
//! - **Query identity**: logical names recovered from `-- name: GetUser :one` comments
//! - **Spans**: client spans with operation and resource attributes, `Ok`/`Error` status
//! - **Metrics**: duration histogram labeled by operation, query name/type and outcome
//! - **Logs**: always on error, on success per configurable policy
//!
//! # Architecture
//!
//! ```text
//! driver ─ start(ctx, conn, payload) ─▶ extract identity ─▶ open span ─▶ ctx' (OperationTrace)
//!                                                                         │
//! driver ─ end(ctx', conn, payload) ──▶ detach trace ─▶ observe ─▶ close span ─▶ maybe log
//! ```
//!
//! Correlation between the two hooks goes through the [`CallContext`] the
//! driver threads through the call. The tracer keeps no per-operation state of
//! its own and can be shared across connections behind an `Arc`.
//!
//! # Example
//!
//! ```rust,ignore
//! use db_tracer::{
//!     CallContext, CommandTag, ConnInfo, CopyFromStart, DbTracer, Outcome, TableIdentifier,
//! };
//!
//! let tracer = DbTracer::builder().build()?;
//! let conn = ConnInfo::new(4242);
//!
//! let mut ctx = tracer.copy_from_start(
//!     CallContext::new(),
//!     &conn,
//!     CopyFromStart::new(TableIdentifier::from(["public", "users"]), vec!["id".into(), "email".into()]),
//! );
//!
//! // ... driver performs COPY ...
//!
//! let tag = CommandTag::from("COPY 2");
//! tracer.copy_from_end(&mut ctx, &conn, Outcome::success(&tag))?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Instrumentation scope name used for the global tracer.
pub const TRACER_NAME: &str = "db_tracer";

/// `tracing` target for operation log records and internal diagnostics.
pub const LOG_TARGET: &str = "db_tracer";

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod observability;
pub mod operation;
pub mod query_name;
pub mod tracer;

// Re-exports for convenience
pub use config::{Config, TracerConfig};
pub use context::{CallContext, Descriptor, OperationTrace};
pub use error::TraceError;
pub use observability::{
    LogEmitter, LogLevel, LogPolicy, LogRecord, LogSink, MetricsRecorder, SpanGuard, SpanManager,
    TracingLogSink,
};
pub use operation::{
    BatchQuery, BatchStart, CommandTag, ConnInfo, ConnectStart, CopyFromStart, EndPayload,
    OperationKind, Outcome, PrepareStart, QueryStart, StartPayload, TableIdentifier,
};
pub use query_name::{query_name_from_sql, QueryIdentity};
pub use tracer::{DbTracer, DbTracerBuilder, TraceHooks};
