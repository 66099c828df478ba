//! Per-call context threaded through the start and end hooks.
//!
//! The driver creates one [`CallContext`] per operation invocation and passes
//! it through both hooks. The start hook stores an [`OperationTrace`] in a
//! slot keyed by operation kind and makes the operation span the context's
//! parent, so anything started on the returned context nests under it. The
//! end hook moves the trace out again and restores the previous parent. The
//! slots are crate-private so no other code can forge or read a trace.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use opentelemetry::trace::TraceContextExt;

use crate::observability::SpanGuard;
use crate::operation::{OperationKind, StartPayload, TableIdentifier};
use crate::query_name::QueryIdentity;

/// Kind-specific descriptive fields captured at operation start.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Query {
        sql: String,
        args: Vec<serde_json::Value>,
        identity: QueryIdentity,
    },
    Batch {
        size: usize,
    },
    CopyFrom {
        table: TableIdentifier,
        columns: Vec<String>,
    },
    Prepare {
        name: String,
        sql: String,
        identity: QueryIdentity,
    },
    Connect {
        host: String,
        port: u16,
        database: String,
        user: String,
    },
}

impl Descriptor {
    /// Build the descriptor from a start payload, resolving the query identity
    /// where SQL text is available.
    pub fn from_start(payload: StartPayload) -> Self {
        match payload {
            StartPayload::Query(q) => Descriptor::Query {
                identity: QueryIdentity::from_sql(&q.sql),
                sql: q.sql,
                args: q.args,
            },
            StartPayload::Batch(b) => Descriptor::Batch { size: b.size },
            StartPayload::CopyFrom(c) => Descriptor::CopyFrom {
                table: c.table,
                columns: c.columns,
            },
            StartPayload::Prepare(p) => Descriptor::Prepare {
                identity: QueryIdentity::from_sql(&p.sql),
                name: p.name,
                sql: p.sql,
            },
            StartPayload::Connect(c) => Descriptor::Connect {
                host: c.host,
                port: c.port,
                database: c.database,
                user: c.user,
            },
        }
    }

    /// Operation kind this descriptor belongs to.
    pub fn kind(&self) -> OperationKind {
        match self {
            Descriptor::Query { .. } => OperationKind::Query,
            Descriptor::Batch { .. } => OperationKind::Batch,
            Descriptor::CopyFrom { .. } => OperationKind::CopyFrom,
            Descriptor::Prepare { .. } => OperationKind::Prepare,
            Descriptor::Connect { .. } => OperationKind::Connect,
        }
    }

    /// Resolved query identity, for kinds that carry SQL.
    pub fn identity(&self) -> Option<&QueryIdentity> {
        match self {
            Descriptor::Query { identity, .. } | Descriptor::Prepare { identity, .. } => {
                Some(identity)
            }
            _ => None,
        }
    }
}

/// State of one in-flight operation.
///
/// Created once by the start hook and consumed by the end hook. The span is
/// owned by a guard, so dropping an unfinished trace still ends the span.
pub struct OperationTrace {
    /// Start hook invocation instant (monotonic).
    pub started_at: Instant,

    /// Open span for this operation.
    pub span: SpanGuard,

    /// Kind-specific fields.
    pub descriptor: Descriptor,

    /// Parent in effect before this operation started.
    outer: Option<opentelemetry::Context>,
}

impl OperationTrace {
    pub fn new(started_at: Instant, span: SpanGuard, descriptor: Descriptor) -> Self {
        Self {
            started_at,
            span,
            descriptor,
            outer: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> OperationKind {
        self.descriptor.kind()
    }

    /// Time between the start instant and `now`, clamped to zero.
    #[inline]
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

impl fmt::Debug for OperationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTrace")
            .field("started_at", &self.started_at)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Ambient per-call context.
///
/// Carries the parent OpenTelemetry context for span parenting, the
/// in-flight operation traces and free-form values the driver wants to keep
/// alongside the call.
pub struct CallContext {
    /// Parent for spans opened under this call: the innermost in-flight
    /// operation, else the caller's context.
    parent: opentelemetry::Context,

    /// In-flight operations, one slot per kind.
    operations: HashMap<OperationKind, OperationTrace>,

    /// Custom key-value storage.
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl CallContext {
    /// Create a context parented on the current OpenTelemetry context.
    #[inline]
    pub fn new() -> Self {
        Self::with_parent(opentelemetry::Context::current())
    }

    /// Create a context with an explicit parent.
    #[inline]
    pub fn with_parent(parent: opentelemetry::Context) -> Self {
        Self {
            parent,
            operations: HashMap::new(),
            values: HashMap::new(),
        }
    }

    /// Current OpenTelemetry context of the call.
    ///
    /// While an operation is in flight its span is the active span here.
    #[inline]
    pub fn parent(&self) -> &opentelemetry::Context {
        &self.parent
    }

    /// Check if an operation of this kind is in flight.
    #[inline]
    pub fn is_tracing(&self, kind: OperationKind) -> bool {
        self.operations.contains_key(&kind)
    }

    /// Store a trace and make its span the parent of later work.
    ///
    /// Returns a stale trace left by an unfinished start of the same kind.
    pub(crate) fn attach(&mut self, mut trace: OperationTrace) -> Option<OperationTrace> {
        let inner = trace.span.context().clone();
        trace.outer = Some(std::mem::replace(&mut self.parent, inner));
        self.operations.insert(trace.kind(), trace)
    }

    /// Move the trace for this kind out of the context.
    ///
    /// The previous parent is restored when the trace's span is still the
    /// innermost one; an operation started on top of it keeps its own.
    pub(crate) fn detach(&mut self, kind: OperationKind) -> Option<OperationTrace> {
        let mut trace = self.operations.remove(&kind)?;
        let current = self.parent.span().span_context().span_id();
        if let Some(outer) = trace.outer.take() {
            if current == trace.span.span_context().span_id() {
                self.parent = outer;
            }
        }
        Some(trace)
    }

    pub(crate) fn operation_mut(&mut self, kind: OperationKind) -> Option<&mut OperationTrace> {
        self.operations.get_mut(&kind)
    }

    /// Set a custom value.
    #[inline]
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Box::new(value));
    }

    /// Get a custom value.
    #[inline]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    /// Remove a custom value.
    #[inline]
    pub fn remove<T: 'static>(&mut self, key: &str) -> Option<T> {
        self.values
            .remove(key)
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("values", &self.values.len())
            .finish_non_exhaustive()
    }
}
