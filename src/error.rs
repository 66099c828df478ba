//! Tracer error types.

use std::fmt;

use crate::operation::OperationKind;

/// Errors surfaced by the tracer to the driver.
///
/// Operation failures reported by the driver are never turned into these;
/// they are only observed. These errors signal broken hook wiring or a
/// tracer that could not be constructed.
#[derive(Debug)]
pub enum TraceError {
    /// End hook (or batch statement callback) invoked without a start hook
    /// having populated the call context for this operation kind.
    Unpaired { kind: OperationKind },

    /// Metric registration failed while building the tracer.
    Metrics(prometheus::Error),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Unpaired { kind } => write!(
                f,
                "{} end hook invoked without a matching start hook in this call context",
                kind
            ),
            TraceError::Metrics(e) => write!(f, "metrics registration failed: {}", e),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Metrics(e) => Some(e),
            _ => None,
        }
    }
}

impl From<prometheus::Error> for TraceError {
    fn from(e: prometheus::Error) -> Self {
        TraceError::Metrics(e)
    }
}
