//! Logging configuration.

use super::parse::env_or;
use super::ConfigError;

/// Default filter when neither LOG_LEVEL nor RUST_LOG is set.
const DEFAULT_FILTER: &str = "db_tracer=info";

/// Logging configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Log level filter (from LOG_LEVEL or RUST_LOG).
    pub filter: String,
    /// Service name for structured logging.
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            service_name: "db_tracer".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Load configuration from environment variables.
    ///
    /// LOG_LEVEL accepts simple values: trace, debug, info, warn, error
    /// RUST_LOG accepts full tracing filter syntax: db_tracer=debug,my_app=info
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            filter: resolve_log_filter(
                std::env::var("LOG_LEVEL").ok().as_deref(),
                std::env::var("RUST_LOG").ok().as_deref(),
            ),
            service_name: env_or("SERVICE_NAME", "db_tracer"),
        })
    }
}

/// Resolve log filter.
///
/// Priority: LOG_LEVEL > RUST_LOG > default (info)
fn resolve_log_filter(log_level: Option<&str>, rust_log: Option<&str>) -> String {
    if let Some(level) = log_level {
        let level = level.to_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {
                return format!("db_tracer={}", level);
            }
            _ => {
                // Invalid level, fall through to RUST_LOG
                eprintln!(
                    "Warning: Invalid LOG_LEVEL '{}', expected: trace, debug, info, warn, error",
                    level
                );
            }
        }
    }

    if let Some(filter) = rust_log {
        return filter.to_string();
    }

    DEFAULT_FILTER.to_string()
}
