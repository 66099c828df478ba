//! Operation kinds and the payloads the driver hands to the hooks.
//!
//! Every traced operation belongs to one [`OperationKind`]. The start hook
//! receives a [`StartPayload`] (owned; it becomes part of the operation trace)
//! and the end hook an [`EndPayload`] that borrows the driver's error.

use std::error::Error;
use std::fmt;

/// Category of database call being instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Single statement (query or exec).
    Query,
    /// Pipelined batch of statements.
    Batch,
    /// Bulk COPY FROM STDIN.
    CopyFrom,
    /// Server-side statement preparation.
    Prepare,
    /// Connection establishment.
    Connect,
}

impl OperationKind {
    /// Label used in span attributes and metric labels.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Batch => "batch",
            OperationKind::CopyFrom => "copy_from",
            OperationKind::Prepare => "prepare",
            OperationKind::Connect => "connect",
        }
    }

    /// Span name for this kind.
    #[inline]
    pub const fn span_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "postgresql.query",
            OperationKind::Batch => "postgresql.batch",
            OperationKind::CopyFrom => "postgresql.copy_from",
            OperationKind::Prepare => "postgresql.prepare",
            OperationKind::Connect => "postgresql.connect",
        }
    }

    /// Message of the log record emitted when the operation completes.
    #[inline]
    pub const fn log_message(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Batch => "batch",
            OperationKind::CopyFrom => "copyfrom",
            OperationKind::Prepare => "prepare",
            OperationKind::Connect => "connect",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Resource descriptors
// =============================================================================

/// Server completion tag (e.g. `INSERT 0 5`, `COPY 12`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTag(String);

impl CommandTag {
    /// Wrap a completion tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the raw tag.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rows affected, taken from the trailing integer of the tag (0 if none).
    pub fn rows_affected(&self) -> i64 {
        self.0
            .rsplit_once(' ')
            .and_then(|(_, count)| count.parse().ok())
            .unwrap_or(0)
    }
}

impl From<&str> for CommandTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for CommandTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Possibly schema-qualified table identifier (`["public", "users"]`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableIdentifier(Vec<String>);

impl TableIdentifier {
    /// Create from identifier parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Render as a quoted SQL identifier safe to embed in trace text.
    ///
    /// Each part is double-quoted with embedded quotes doubled and NUL bytes
    /// removed; parts are joined with `.`.
    pub fn sanitize(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.push('"');
            for c in part.chars() {
                match c {
                    '\0' => {}
                    '"' => out.push_str("\"\""),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        out
    }
}

impl From<&str> for TableIdentifier {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl<const N: usize> From<[&str; N]> for TableIdentifier {
    fn from(parts: [&str; N]) -> Self {
        Self::new(parts)
    }
}

impl From<Vec<String>> for TableIdentifier {
    fn from(parts: Vec<String>) -> Self {
        Self(parts)
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sanitize())
    }
}

/// Connection identity used to correlate records with server-side logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnInfo {
    /// Backend process ID (0 when there is no established connection).
    pub pid: u32,
    /// Server host, if known.
    pub host: Option<String>,
    /// Database name, if known.
    pub database: Option<String>,
}

impl ConnInfo {
    /// Create from a backend process ID.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    /// Set the server host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

// =============================================================================
// Start payloads
// =============================================================================

/// Start of a single statement.
#[derive(Debug, Clone, Default)]
pub struct QueryStart {
    pub sql: String,
    /// Bound arguments as rendered by the driver.
    pub args: Vec<serde_json::Value>,
}

impl QueryStart {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }
}

/// Start of a pipelined batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStart {
    /// Number of queued statements.
    pub size: usize,
}

impl BatchStart {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

/// Start of a bulk copy.
#[derive(Debug, Clone, Default)]
pub struct CopyFromStart {
    pub table: TableIdentifier,
    /// Target columns, in copy order.
    pub columns: Vec<String>,
}

impl CopyFromStart {
    pub fn new(table: impl Into<TableIdentifier>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }
}

/// Start of a statement preparation.
#[derive(Debug, Clone, Default)]
pub struct PrepareStart {
    /// Prepared statement name (empty for the unnamed statement).
    pub name: String,
    pub sql: String,
}

impl PrepareStart {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Start of a connection attempt.
#[derive(Debug, Clone, Default)]
pub struct ConnectStart {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl ConnectStart {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: String::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

/// Start hook payload, one variant per operation kind.
#[derive(Debug, Clone)]
pub enum StartPayload {
    Query(QueryStart),
    Batch(BatchStart),
    CopyFrom(CopyFromStart),
    Prepare(PrepareStart),
    Connect(ConnectStart),
}

impl StartPayload {
    /// Operation kind of this payload.
    pub fn kind(&self) -> OperationKind {
        match self {
            StartPayload::Query(_) => OperationKind::Query,
            StartPayload::Batch(_) => OperationKind::Batch,
            StartPayload::CopyFrom(_) => OperationKind::CopyFrom,
            StartPayload::Prepare(_) => OperationKind::Prepare,
            StartPayload::Connect(_) => OperationKind::Connect,
        }
    }
}

impl From<QueryStart> for StartPayload {
    fn from(data: QueryStart) -> Self {
        StartPayload::Query(data)
    }
}

impl From<BatchStart> for StartPayload {
    fn from(data: BatchStart) -> Self {
        StartPayload::Batch(data)
    }
}

impl From<CopyFromStart> for StartPayload {
    fn from(data: CopyFromStart) -> Self {
        StartPayload::CopyFrom(data)
    }
}

impl From<PrepareStart> for StartPayload {
    fn from(data: PrepareStart) -> Self {
        StartPayload::Prepare(data)
    }
}

impl From<ConnectStart> for StartPayload {
    fn from(data: ConnectStart) -> Self {
        StartPayload::Connect(data)
    }
}

// =============================================================================
// End payloads
// =============================================================================

/// Result of an operation as reported by the driver.
///
/// The error is borrowed: the tracer observes it and hands it back untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outcome<'a> {
    pub err: Option<&'a (dyn Error + 'static)>,
    pub command_tag: Option<&'a CommandTag>,
}

impl<'a> Outcome<'a> {
    /// Successful operation with a completion tag.
    pub fn success(command_tag: &'a CommandTag) -> Self {
        Self {
            err: None,
            command_tag: Some(command_tag),
        }
    }

    /// Successful operation without a completion tag.
    pub fn done() -> Self {
        Self::default()
    }

    /// Failed operation.
    pub fn failed(err: &'a (dyn Error + 'static)) -> Self {
        Self {
            err: Some(err),
            command_tag: None,
        }
    }

    /// Check if the operation failed.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }

    /// Rows affected, only reported for successful operations with a tag.
    pub fn rows_affected(&self) -> Option<i64> {
        if self.is_error() {
            return None;
        }
        self.command_tag.map(CommandTag::rows_affected)
    }
}

/// One statement of a batch, reported as the driver reads its result.
#[derive(Debug, Clone, Copy)]
pub struct BatchQuery<'a> {
    pub sql: &'a str,
    pub args: &'a [serde_json::Value],
    pub outcome: Outcome<'a>,
}

impl<'a> BatchQuery<'a> {
    pub fn new(sql: &'a str, outcome: Outcome<'a>) -> Self {
        Self {
            sql,
            args: &[],
            outcome,
        }
    }

    pub fn with_args(mut self, args: &'a [serde_json::Value]) -> Self {
        self.args = args;
        self
    }
}

/// End hook payload, one variant per operation kind.
#[derive(Debug, Clone, Copy)]
pub enum EndPayload<'a> {
    Query(Outcome<'a>),
    Batch(Outcome<'a>),
    CopyFrom(Outcome<'a>),
    Prepare {
        /// Statement was already prepared on this connection (no round trip).
        already_prepared: bool,
        outcome: Outcome<'a>,
    },
    Connect(Outcome<'a>),
}

impl<'a> EndPayload<'a> {
    /// Operation kind of this payload.
    pub fn kind(&self) -> OperationKind {
        match self {
            EndPayload::Query(_) => OperationKind::Query,
            EndPayload::Batch(_) => OperationKind::Batch,
            EndPayload::CopyFrom(_) => OperationKind::CopyFrom,
            EndPayload::Prepare { .. } => OperationKind::Prepare,
            EndPayload::Connect(_) => OperationKind::Connect,
        }
    }

    /// Outcome carried by this payload.
    pub fn outcome(&self) -> Outcome<'a> {
        match *self {
            EndPayload::Query(outcome)
            | EndPayload::Batch(outcome)
            | EndPayload::CopyFrom(outcome)
            | EndPayload::Connect(outcome) => outcome,
            EndPayload::Prepare { outcome, .. } => outcome,
        }
    }
}
