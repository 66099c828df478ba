//! Operation lifecycle tracer.
//!
//! [`DbTracer`] implements the driver-facing [`TraceHooks`] contract. The
//! start hook captures the start instant, resolves the descriptor, opens the
//! span and stores the resulting [`OperationTrace`] in the call context,
//! whose parent becomes the new span. The end hook moves it out again,
//! restores the parent, records the duration, closes the span and hands the
//! outcome to the log emitter.
//!
//! The tracer holds no per-operation state and no locks; one instance is
//! shared by every connection.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::trace::Tracer;
use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::trace::EXCEPTION_MESSAGE;
use prometheus::Registry;
use serde_json::json;

use crate::config::TracerConfig;
use crate::context::{CallContext, Descriptor, OperationTrace};
use crate::error::TraceError;
use crate::observability::spans::{BATCH_QUERY_EVENT, DB_QUERY_NAME, DB_QUERY_TYPE, DB_STATEMENT};
use crate::observability::{
    span_attributes, LogEmitter, LogPolicy, LogSink, MetricsRecorder, SpanManager, TracingLogSink,
};
use crate::operation::{
    BatchQuery, BatchStart, ConnInfo, ConnectStart, CopyFromStart, EndPayload, OperationKind,
    Outcome, PrepareStart, QueryStart, StartPayload,
};
use crate::query_name::QueryIdentity;

/// Hooks the database driver calls around each operation.
///
/// Every `start` must be followed by exactly one `end` of the same kind on
/// the context it returned, including when the operation fails or is
/// cancelled.
pub trait TraceHooks: Send + Sync {
    /// Begin tracing an operation.
    ///
    /// Returns the context to pass to `end`. Its parent carries the operation
    /// span, so operations started on it become children.
    fn start(&self, ctx: CallContext, conn: &ConnInfo, payload: StartPayload) -> CallContext;

    /// Finish tracing an operation.
    ///
    /// Fails with [`TraceError::Unpaired`] when no operation of the payload's
    /// kind was started on this context. Operation errors are observed, never
    /// returned.
    fn end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        payload: EndPayload<'_>,
    ) -> Result<(), TraceError>;

    /// Record the result of one statement inside a started batch.
    fn batch_query(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        query: BatchQuery<'_>,
    ) -> Result<(), TraceError>;
}

/// Tracer for PostgreSQL client operations.
pub struct DbTracer {
    spans: SpanManager,
    metrics: MetricsRecorder,
    logs: LogEmitter,
    include_sql: bool,
}

impl DbTracer {
    /// Create a tracer with default settings on the global tracer provider.
    pub fn new() -> Result<Self, TraceError> {
        Self::builder().build()
    }

    /// Create a tracer builder.
    #[inline]
    pub fn builder() -> DbTracerBuilder {
        DbTracerBuilder::new()
    }

    /// Metrics recorded by this tracer.
    #[inline]
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Success-path logging policy in effect.
    #[inline]
    pub fn log_policy(&self) -> &LogPolicy {
        self.logs.policy()
    }

    // === Per-kind hooks ===

    pub fn query_start(&self, ctx: CallContext, conn: &ConnInfo, data: QueryStart) -> CallContext {
        self.start(ctx, conn, data.into())
    }

    pub fn query_end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        outcome: Outcome<'_>,
    ) -> Result<(), TraceError> {
        self.end(ctx, conn, EndPayload::Query(outcome))
    }

    pub fn batch_start(&self, ctx: CallContext, conn: &ConnInfo, data: BatchStart) -> CallContext {
        self.start(ctx, conn, data.into())
    }

    pub fn batch_end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        outcome: Outcome<'_>,
    ) -> Result<(), TraceError> {
        self.end(ctx, conn, EndPayload::Batch(outcome))
    }

    pub fn copy_from_start(
        &self,
        ctx: CallContext,
        conn: &ConnInfo,
        data: CopyFromStart,
    ) -> CallContext {
        self.start(ctx, conn, data.into())
    }

    pub fn copy_from_end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        outcome: Outcome<'_>,
    ) -> Result<(), TraceError> {
        self.end(ctx, conn, EndPayload::CopyFrom(outcome))
    }

    pub fn prepare_start(
        &self,
        ctx: CallContext,
        conn: &ConnInfo,
        data: PrepareStart,
    ) -> CallContext {
        self.start(ctx, conn, data.into())
    }

    pub fn prepare_end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        already_prepared: bool,
        outcome: Outcome<'_>,
    ) -> Result<(), TraceError> {
        self.end(
            ctx,
            conn,
            EndPayload::Prepare {
                already_prepared,
                outcome,
            },
        )
    }

    pub fn connect_start(
        &self,
        ctx: CallContext,
        conn: &ConnInfo,
        data: ConnectStart,
    ) -> CallContext {
        self.start(ctx, conn, data.into())
    }

    pub fn connect_end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        outcome: Outcome<'_>,
    ) -> Result<(), TraceError> {
        self.end(ctx, conn, EndPayload::Connect(outcome))
    }

    fn unpaired(&self, kind: OperationKind, conn: &ConnInfo) -> TraceError {
        tracing::error!(
            target: crate::LOG_TARGET,
            operation = kind.as_str(),
            pid = conn.pid,
            "End hook invoked without a matching start hook"
        );
        TraceError::Unpaired { kind }
    }
}

impl TraceHooks for DbTracer {
    fn start(&self, mut ctx: CallContext, conn: &ConnInfo, payload: StartPayload) -> CallContext {
        let started_at = Instant::now();
        let kind = payload.kind();

        // The stale span is closed first so the new one is not parented to it
        if let Some(stale) = ctx.detach(kind) {
            tracing::error!(
                target: crate::LOG_TARGET,
                operation = kind.as_str(),
                pid = conn.pid,
                "Operation started again before its end hook ran"
            );
            stale
                .span
                .abandon("operation restarted before its end hook ran");
        }

        let descriptor = Descriptor::from_start(payload);
        let span = self.spans.open(
            ctx.parent(),
            kind,
            span_attributes(&descriptor, conn, self.include_sql),
        );
        ctx.attach(OperationTrace::new(started_at, span, descriptor));

        ctx
    }

    fn end(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        payload: EndPayload<'_>,
    ) -> Result<(), TraceError> {
        let ended_at = Instant::now();
        let kind = payload.kind();

        let Some(trace) = ctx.detach(kind) else {
            return Err(self.unpaired(kind, conn));
        };

        let elapsed = trace.elapsed_at(ended_at);
        let outcome = payload.outcome();
        let OperationTrace {
            span, descriptor, ..
        } = trace;

        self.metrics
            .observe(kind, descriptor.identity(), elapsed, outcome.is_error());

        span.close(outcome.err);

        let extras = match payload {
            EndPayload::Prepare {
                already_prepared, ..
            } => vec![("already_prepared", json!(already_prepared))],
            _ => Vec::new(),
        };
        self.logs
            .maybe_emit(&descriptor, conn, &outcome, elapsed, &extras);

        Ok(())
    }

    fn batch_query(
        &self,
        ctx: &mut CallContext,
        conn: &ConnInfo,
        query: BatchQuery<'_>,
    ) -> Result<(), TraceError> {
        let Some(trace) = ctx.operation_mut(OperationKind::Batch) else {
            return Err(self.unpaired(OperationKind::Batch, conn));
        };

        let identity = QueryIdentity::from_sql(query.sql);

        let mut attrs = vec![
            KeyValue::new(DB_QUERY_NAME, identity.name.clone()),
            KeyValue::new(DB_QUERY_TYPE, identity.operation_type.clone()),
        ];
        if self.include_sql {
            attrs.push(KeyValue::new(DB_STATEMENT, query.sql.to_string()));
        }
        if let Some(err) = query.outcome.err {
            attrs.push(KeyValue::new(EXCEPTION_MESSAGE, err.to_string()));
        }
        trace.span.add_event(BATCH_QUERY_EVENT, attrs);

        self.metrics
            .count_batch_query(&identity, query.outcome.is_error());

        let elapsed = trace.elapsed_at(Instant::now());
        self.logs
            .maybe_emit_batch_query(&query, &identity, conn, elapsed);

        Ok(())
    }
}

/// Builder for [`DbTracer`].
///
/// Unset pieces default to the global tracer provider, a private Prometheus
/// registry and a [`TracingLogSink`].
pub struct DbTracerBuilder {
    spans: Option<SpanManager>,
    metrics: Option<MetricsRecorder>,
    registry: Option<Registry>,
    log_sink: Option<Arc<dyn LogSink>>,
    config: TracerConfig,
}

impl DbTracerBuilder {
    pub fn new() -> Self {
        Self {
            spans: None,
            metrics: None,
            registry: None,
            log_sink: None,
            config: TracerConfig::default(),
        }
    }

    /// Open spans on this tracer instead of the global one.
    pub fn tracer<T>(mut self, tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        self.spans = Some(SpanManager::new(tracer));
        self
    }

    /// Record into an existing recorder (takes precedence over `registry`).
    pub fn metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register metrics into this registry.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Send log records to this sink.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TracerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn log_policy(mut self, policy: LogPolicy) -> Self {
        self.config.log_policy = policy;
        self
    }

    /// Include SQL text in logs and `db.statement` on spans.
    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.config.log_sql = enabled;
        self
    }

    pub fn log_args(mut self, enabled: bool) -> Self {
        self.config.log_args = enabled;
        self
    }

    pub fn args_len_limit(mut self, limit: usize) -> Self {
        self.config.args_len_limit = limit;
        self
    }

    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metrics_prefix = prefix.into();
        self
    }

    /// Build the tracer.
    ///
    /// Fails if the metrics cannot be registered.
    pub fn build(self) -> Result<DbTracer, TraceError> {
        let config = self.config;

        let metrics = match (self.metrics, self.registry) {
            (Some(metrics), _) => metrics,
            (None, Some(registry)) => {
                MetricsRecorder::with_registry(registry, &config.metrics_prefix)?
            }
            (None, None) => MetricsRecorder::with_prefix(&config.metrics_prefix)?,
        };

        let sink = self
            .log_sink
            .unwrap_or_else(|| Arc::new(TracingLogSink));
        let logs = LogEmitter::new(config.log_policy, sink)
            .with_sql(config.log_sql)
            .with_args(config.log_args, config.args_len_limit);

        Ok(DbTracer {
            spans: self.spans.unwrap_or_default(),
            metrics,
            logs,
            include_sql: config.log_sql,
        })
    }
}

impl Default for DbTracerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
