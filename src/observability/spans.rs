//! Client spans for database operations.
//!
//! One span per operation, opened by the start hook with every attribute
//! that is invariant for the operation, and closed by the end hook with the
//! outcome status.

use std::error::Error;

use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{SpanContext, SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};
use opentelemetry_semantic_conventions::trace::{SERVER_ADDRESS, SERVER_PORT};

use crate::context::Descriptor;
use crate::operation::{ConnInfo, OperationKind};

/// Database system reported on every span.
pub const DB_SYSTEM_NAME: &str = "postgresql";

// Attribute keys
pub const OPERATION_TYPE: &str = "pgx.operation.type";
pub const DB_SYSTEM: &str = "db.system";
pub const DB_NAME: &str = "db.name";
pub const DB_USER: &str = "db.user";
pub const DB_STATEMENT: &str = "db.statement";
pub const DB_TABLE: &str = "db.table";
pub const DB_QUERY_NAME: &str = "db.query.name";
pub const DB_QUERY_TYPE: &str = "db.query.type";
pub const DB_BATCH_SIZE: &str = "db.batch.size";
pub const DB_PREPARED_STATEMENT: &str = "db.prepared_statement.name";

/// Name of the span event recorded for each statement of a batch.
pub const BATCH_QUERY_EVENT: &str = "batch.query";

/// Opens operation spans on a tracer.
pub struct SpanManager {
    tracer: BoxedTracer,
}

impl SpanManager {
    /// Create a manager over any tracer (SDK, noop, in-memory test tracer).
    pub fn new<T>(tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        Self {
            tracer: BoxedTracer::new(Box::new(tracer)),
        }
    }

    /// Create a manager over the globally installed tracer provider.
    pub fn global() -> Self {
        Self {
            tracer: global::tracer(crate::TRACER_NAME),
        }
    }

    /// Open a client span for an operation under `parent`.
    ///
    /// The returned guard carries `parent` extended with the new span, so
    /// work started under [`SpanGuard::context`] nests inside the operation.
    /// Never fails and never blocks on the backend.
    pub fn open(
        &self,
        parent: &Context,
        kind: OperationKind,
        attributes: Vec<KeyValue>,
    ) -> SpanGuard {
        let mut attrs = Vec::with_capacity(attributes.len() + 2);
        attrs.push(KeyValue::new(OPERATION_TYPE, kind.as_str()));
        attrs.push(KeyValue::new(DB_SYSTEM, DB_SYSTEM_NAME));
        attrs.extend(attributes);

        let span = self
            .tracer
            .span_builder(kind.span_name())
            .with_kind(SpanKind::Client)
            .with_attributes(attrs)
            .start_with_context(&self.tracer, parent);

        SpanGuard {
            cx: parent.with_span(span),
            ended: false,
        }
    }
}

impl Default for SpanManager {
    fn default() -> Self {
        Self::global()
    }
}

/// Resource attributes for an operation, set once at span creation.
///
/// SQL text is only attached when `include_sql` is set. Connection host and
/// database are attached to every kind; connect spans take them from the
/// descriptor instead.
pub fn span_attributes(
    descriptor: &Descriptor,
    conn: &ConnInfo,
    include_sql: bool,
) -> Vec<KeyValue> {
    let mut attrs = descriptor_attributes(descriptor, include_sql);
    if !matches!(descriptor, Descriptor::Connect { .. }) {
        if let Some(host) = &conn.host {
            attrs.push(KeyValue::new(SERVER_ADDRESS, host.clone()));
        }
        if let Some(database) = &conn.database {
            attrs.push(KeyValue::new(DB_NAME, database.clone()));
        }
    }
    attrs
}

fn descriptor_attributes(descriptor: &Descriptor, include_sql: bool) -> Vec<KeyValue> {
    match descriptor {
        Descriptor::Query { sql, identity, .. } => {
            let mut attrs = vec![
                KeyValue::new(DB_QUERY_NAME, identity.name.clone()),
                KeyValue::new(DB_QUERY_TYPE, identity.operation_type.clone()),
            ];
            if include_sql {
                attrs.push(KeyValue::new(DB_STATEMENT, sql.clone()));
            }
            attrs
        }
        Descriptor::Batch { size } => vec![KeyValue::new(DB_BATCH_SIZE, *size as i64)],
        Descriptor::CopyFrom { table, .. } => vec![KeyValue::new(DB_TABLE, table.sanitize())],
        Descriptor::Prepare {
            name,
            sql,
            identity,
        } => {
            let mut attrs = vec![
                KeyValue::new(DB_PREPARED_STATEMENT, name.clone()),
                KeyValue::new(DB_QUERY_NAME, identity.name.clone()),
                KeyValue::new(DB_QUERY_TYPE, identity.operation_type.clone()),
            ];
            if include_sql {
                attrs.push(KeyValue::new(DB_STATEMENT, sql.clone()));
            }
            attrs
        }
        Descriptor::Connect {
            host,
            port,
            database,
            user,
        } => {
            let mut attrs = vec![
                KeyValue::new(SERVER_ADDRESS, host.clone()),
                KeyValue::new(SERVER_PORT, i64::from(*port)),
                KeyValue::new(DB_NAME, database.clone()),
            ];
            if !user.is_empty() {
                attrs.push(KeyValue::new(DB_USER, user.clone()));
            }
            attrs
        }
    }
}

/// Owns an open span and ends it exactly once.
///
/// The span lives in the guard's context. It is ended by
/// [`close`](Self::close) or [`abandon`](Self::abandon); if neither runs
/// (early return, cancelled call, dropped context) it is ended on drop with
/// whatever status it carries.
pub struct SpanGuard {
    cx: Context,
    ended: bool,
}

impl SpanGuard {
    /// Context with the operation span active.
    #[inline]
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Identity of the operation span.
    #[inline]
    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    /// Set the outcome status and end the span.
    ///
    /// On error the error is recorded as a span event and the status carries
    /// its description.
    pub fn close(mut self, err: Option<&(dyn Error + 'static)>) {
        let span = self.cx.span();
        match err {
            Some(e) => {
                span.record_error(e);
                span.set_status(Status::error(e.to_string()));
            }
            None => span.set_status(Status::Ok),
        }
        span.end();
        self.ended = true;
    }

    /// End the span with an error status without an operation outcome.
    ///
    /// Used when a trace is superseded before its end hook runs.
    pub fn abandon(mut self, reason: &str) {
        let span = self.cx.span();
        span.set_status(Status::error(reason.to_string()));
        span.end();
        self.ended = true;
    }

    /// Add an event to the span.
    pub fn add_event(&self, name: &'static str, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    #[cfg(test)]
    pub(crate) fn noop() -> Self {
        Self {
            cx: Context::new(),
            ended: false,
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.ended {
            self.cx.span().end();
        }
    }
}
