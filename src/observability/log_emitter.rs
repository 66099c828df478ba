//! Structured log records for completed operations.
//!
//! Failed operations are always logged at error level. Successful ones are
//! logged at info level only when the [`LogPolicy`] asks for it.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::context::Descriptor;
use crate::operation::{BatchQuery, ConnInfo, OperationKind, Outcome};
use crate::query_name::QueryIdentity;

/// Message of the record emitted for each statement of a batch.
pub const BATCH_QUERY_MESSAGE: &str = "batch query";

/// Default maximum rendered length of one logged argument.
pub const DEFAULT_ARGS_LEN_LIMIT: usize = 64;

/// Log record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: &'static str,
    pub kind: OperationKind,
    /// Attributes in emission order.
    pub attributes: Vec<(&'static str, Value)>,
}

impl LogRecord {
    /// Get an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Attributes as a JSON object.
    pub fn attributes_json(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }
}

/// Destination of operation log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Sink that forwards records as `tracing` events under the crate target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, record: &LogRecord) {
        let attrs = record.attributes_json();
        match record.level {
            LogLevel::Info => tracing::info!(
                target: crate::LOG_TARGET,
                operation = record.kind.as_str(),
                attrs = %attrs,
                "{}",
                record.message
            ),
            LogLevel::Error => tracing::error!(
                target: crate::LOG_TARGET,
                operation = record.kind.as_str(),
                attrs = %attrs,
                "{}",
                record.message
            ),
        }
    }
}

/// Success-path logging policy. Errors are logged regardless.
#[derive(Clone, Default)]
pub enum LogPolicy {
    /// Log every successful operation.
    All,
    /// Log failures only.
    #[default]
    ErrorsOnly,
    /// Log this fraction (0.0-1.0) of successful operations.
    Sampled(f64),
    /// Decide per operation kind.
    Custom(Arc<dyn Fn(OperationKind) -> bool + Send + Sync>),
}

impl LogPolicy {
    /// Check if a successful operation of this kind should be logged.
    pub fn should_log_success(&self, kind: OperationKind) -> bool {
        match self {
            LogPolicy::All => true,
            LogPolicy::ErrorsOnly => false,
            LogPolicy::Sampled(ratio) => sample(*ratio),
            LogPolicy::Custom(decide) => decide(kind),
        }
    }
}

impl fmt::Debug for LogPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogPolicy::All => f.write_str("All"),
            LogPolicy::ErrorsOnly => f.write_str("ErrorsOnly"),
            LogPolicy::Sampled(ratio) => f.debug_tuple("Sampled").field(ratio).finish(),
            LogPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Builds and emits operation log records.
#[derive(Clone)]
pub struct LogEmitter {
    policy: LogPolicy,
    sink: Arc<dyn LogSink>,
    log_sql: bool,
    log_args: bool,
    args_len_limit: usize,
}

impl LogEmitter {
    pub fn new(policy: LogPolicy, sink: Arc<dyn LogSink>) -> Self {
        Self {
            policy,
            sink,
            log_sql: false,
            log_args: false,
            args_len_limit: DEFAULT_ARGS_LEN_LIMIT,
        }
    }

    /// Include SQL text in query and prepare records.
    pub fn with_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    /// Include bound arguments, each truncated to `len_limit` characters.
    pub fn with_args(mut self, enabled: bool, len_limit: usize) -> Self {
        self.log_args = enabled;
        self.args_len_limit = len_limit;
        self
    }

    #[inline]
    pub fn policy(&self) -> &LogPolicy {
        &self.policy
    }

    /// Emit the record for a completed operation if policy allows.
    ///
    /// `extras` are appended after the descriptor attributes. Returns whether
    /// a record was emitted.
    pub fn maybe_emit(
        &self,
        descriptor: &Descriptor,
        conn: &ConnInfo,
        outcome: &Outcome<'_>,
        elapsed: Duration,
        extras: &[(&'static str, Value)],
    ) -> bool {
        let kind = descriptor.kind();
        let Some(level) = self.level_for(kind, outcome) else {
            return false;
        };

        let mut attributes = outcome_attributes(outcome);
        self.descriptor_attributes(descriptor, &mut attributes);
        attributes.extend(extras.iter().cloned());
        attributes.push(("duration_ms", json!(duration_ms(elapsed))));
        connection_attributes(kind, conn, &mut attributes);

        self.sink.emit(&LogRecord {
            level,
            message: kind.log_message(),
            kind,
            attributes,
        });
        true
    }

    /// Emit the record for one statement of a batch if policy allows.
    ///
    /// `elapsed` is measured from the start of the batch.
    pub fn maybe_emit_batch_query(
        &self,
        query: &BatchQuery<'_>,
        identity: &QueryIdentity,
        conn: &ConnInfo,
        elapsed: Duration,
    ) -> bool {
        let Some(level) = self.level_for(OperationKind::Batch, &query.outcome) else {
            return false;
        };

        let mut attributes = outcome_attributes(&query.outcome);
        attributes.push(("query_name", json!(identity.name)));
        attributes.push(("query_type", json!(identity.operation_type)));
        self.statement_attributes(query.sql, query.args, &mut attributes);
        attributes.push(("duration_ms", json!(duration_ms(elapsed))));
        connection_attributes(OperationKind::Batch, conn, &mut attributes);

        self.sink.emit(&LogRecord {
            level,
            message: BATCH_QUERY_MESSAGE,
            kind: OperationKind::Batch,
            attributes,
        });
        true
    }

    fn level_for(&self, kind: OperationKind, outcome: &Outcome<'_>) -> Option<LogLevel> {
        if outcome.is_error() {
            Some(LogLevel::Error)
        } else if self.policy.should_log_success(kind) {
            Some(LogLevel::Info)
        } else {
            None
        }
    }

    fn descriptor_attributes(&self, descriptor: &Descriptor, out: &mut Vec<(&'static str, Value)>) {
        match descriptor {
            Descriptor::Query {
                sql,
                args,
                identity,
            } => {
                out.push(("query_name", json!(identity.name)));
                out.push(("query_type", json!(identity.operation_type)));
                self.statement_attributes(sql, args, out);
            }
            Descriptor::Batch { size } => out.push(("batch_size", json!(size))),
            Descriptor::CopyFrom { table, columns } => {
                out.push(("table_name", json!(table.sanitize())));
                out.push(("column_names", json!(columns)));
            }
            Descriptor::Prepare {
                name,
                sql,
                identity,
            } => {
                out.push(("name", json!(name)));
                out.push(("query_name", json!(identity.name)));
                out.push(("query_type", json!(identity.operation_type)));
                self.statement_attributes(sql, &[], out);
            }
            Descriptor::Connect {
                host,
                port,
                database,
                ..
            } => {
                out.push(("host", json!(host)));
                out.push(("port", json!(port)));
                out.push(("database", json!(database)));
            }
        }
    }

    fn statement_attributes(&self, sql: &str, args: &[Value], out: &mut Vec<(&'static str, Value)>) {
        if self.log_sql {
            out.push(("sql", json!(sql)));
        }
        if self.log_args && !args.is_empty() {
            out.push(("args", render_args(args, self.args_len_limit)));
        }
    }
}

impl fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEmitter")
            .field("policy", &self.policy)
            .field("log_sql", &self.log_sql)
            .field("log_args", &self.log_args)
            .field("args_len_limit", &self.args_len_limit)
            .finish_non_exhaustive()
    }
}

/// `error` on failure, `row_count` on success with a command tag.
fn outcome_attributes(outcome: &Outcome<'_>) -> Vec<(&'static str, Value)> {
    let mut attrs = Vec::with_capacity(8);
    if let Some(err) = outcome.err {
        attrs.push(("error", json!(err.to_string())));
    } else if let Some(rows) = outcome.rows_affected() {
        attrs.push(("row_count", json!(rows)));
    }
    attrs
}

/// `pid`, then host and database when known. Connect records carry the
/// target from their descriptor instead.
fn connection_attributes(
    kind: OperationKind,
    conn: &ConnInfo,
    out: &mut Vec<(&'static str, Value)>,
) {
    out.push(("pid", json!(conn.pid)));
    if kind == OperationKind::Connect {
        return;
    }
    if let Some(host) = &conn.host {
        out.push(("host", json!(host)));
    }
    if let Some(database) = &conn.database {
        out.push(("database", json!(database)));
    }
}

#[inline]
fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_nanos() as f64 / 1_000_000.0
}

/// Render arguments for logging; values longer than `limit` characters once
/// serialized are replaced by their truncated text.
fn render_args(args: &[Value], limit: usize) -> Value {
    Value::Array(
        args.iter()
            .map(|arg| {
                let text = arg.to_string();
                if text.chars().count() <= limit {
                    arg.clone()
                } else {
                    let mut truncated: String = text.chars().take(limit).collect();
                    truncated.push_str("...");
                    Value::String(truncated)
                }
            })
            .collect(),
    )
}

// ============================================================================
// Sampling with thread-local state
// ============================================================================

thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(init_rng_seed());
}

/// Initialize RNG seed from system entropy.
fn init_rng_seed() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    // xorshift state must be non-zero
    hasher.finish() | 1
}

#[inline]
fn rand_u64() -> u64 {
    RNG_STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        x
    })
}

/// Bernoulli draw with probability `ratio`.
fn sample(ratio: f64) -> bool {
    if ratio >= 1.0 {
        return true;
    }
    if ratio <= 0.0 || ratio.is_nan() {
        return false;
    }
    // 53 random bits mapped to [0, 1)
    let unit = (rand_u64() >> 11) as f64 / (1u64 << 53) as f64;
    unit < ratio
}
