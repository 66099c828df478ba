//! Query identity extraction from convention comments.
//!
//! Generated query code annotates every statement with a leading comment that
//! carries a logical name and a result category:
//!
//! ```sql
//! -- name: GetUser :one
//! SELECT * FROM users WHERE id = $1
//! ```
//!
//! The block form `/* name: GetUser :one */` is accepted as well. The name
//! labels spans, metrics and logs independently of the literal SQL text.
//!
//! Only the leading comment is inspected, and it must match the grammar
//! exactly:
//!
//! ```text
//! comment    = "--" body EOL | "/*" body "*/"
//! body       = ws? "name" ws? ":" ws? identifier ws ":" type ws?
//! ```
//!
//! `name` is matched ASCII case-insensitively; `identifier` and `type` are
//! whitespace-free tokens taken verbatim. Anything else, including a partial
//! match, resolves to the unknown identity.

use std::fmt;

/// Placeholder used when no identity can be recovered.
pub const UNKNOWN: &str = "unknown";

const MARKER: &str = "name";

/// Logical identity of a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryIdentity {
    /// Logical query name (e.g. `GetUser`).
    pub name: String,
    /// Result category (e.g. `one`, `many`, `exec`), passed through as-is.
    pub operation_type: String,
}

impl QueryIdentity {
    /// Create an identity from its parts.
    pub fn new(name: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation_type: operation_type.into(),
        }
    }

    /// The `("unknown", "unknown")` identity.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Recover the identity from SQL text.
    #[inline]
    pub fn from_sql(sql: &str) -> Self {
        extract(sql)
    }

    /// Check if this is the unknown identity.
    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN && self.operation_type == UNKNOWN
    }
}

impl Default for QueryIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for QueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :{}", self.name, self.operation_type)
    }
}

/// Recover the query identity from SQL text.
///
/// Never fails: missing or malformed annotations yield [`QueryIdentity::unknown`].
pub fn extract(sql: &str) -> QueryIdentity {
    leading_comment(sql)
        .and_then(parse_annotation)
        .map(|(name, operation_type)| QueryIdentity::new(name, operation_type))
        .unwrap_or_default()
}

/// Recover `(name, type)` from SQL text.
pub fn query_name_from_sql(sql: &str) -> (String, String) {
    let identity = extract(sql);
    (identity.name, identity.operation_type)
}

/// Body of the comment at the very start of the SQL text (after whitespace).
fn leading_comment(sql: &str) -> Option<&str> {
    let sql = sql.trim_start();

    if let Some(rest) = sql.strip_prefix("--") {
        return Some(rest.lines().next().unwrap_or(""));
    }

    // Unterminated block comments are not annotations
    let rest = sql.strip_prefix("/*")?;
    rest.find("*/").map(|end| &rest[..end])
}

/// Parse `name: <identifier> :<type>` out of a comment body.
fn parse_annotation(body: &str) -> Option<(&str, &str)> {
    let body = body.trim_start();

    let marker = body.get(..MARKER.len())?;
    if !marker.eq_ignore_ascii_case(MARKER) {
        return None;
    }

    let rest = body[MARKER.len()..].trim_start().strip_prefix(':')?;

    let mut tokens = rest.split_whitespace();
    let identifier = tokens.next()?;
    let operation_type = tokens.next()?.strip_prefix(':')?;

    // Trailing garbage
    if tokens.next().is_some() {
        return None;
    }

    if identifier.starts_with(':') || operation_type.is_empty() || operation_type.contains(':') {
        return None;
    }

    Some((identifier, operation_type))
}
