//! Tracer behavior configuration.

use super::parse::{env_bool, env_or, env_parse};
use super::ConfigError;
use crate::observability::log_emitter::DEFAULT_ARGS_LEN_LIMIT;
use crate::observability::metrics::DEFAULT_PREFIX;
use crate::observability::LogPolicy;

/// Default fraction of successful operations logged under the `sampled` policy.
const DEFAULT_SAMPLE_RATIO: f64 = 0.1;

/// Tracer configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct TracerConfig {
    /// Success-path logging policy.
    pub log_policy: LogPolicy,
    /// Include SQL text in log records and `db.statement` on spans.
    pub log_sql: bool,
    /// Include bound arguments in log records.
    pub log_args: bool,
    /// Maximum rendered length of one logged argument.
    pub args_len_limit: usize,
    /// Metric name prefix.
    pub metrics_prefix: String,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            log_policy: LogPolicy::ErrorsOnly,
            log_sql: false,
            log_args: false,
            args_len_limit: DEFAULT_ARGS_LEN_LIMIT,
            metrics_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl TracerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ratio = env_parse("DB_TRACE_LOG_SAMPLE_RATIO", DEFAULT_SAMPLE_RATIO)?;
        let log_policy = parse_log_policy(&env_or("DB_TRACE_LOG_POLICY", "errors"), ratio)?;

        let metrics_prefix = env_or("DB_TRACE_METRICS_PREFIX", DEFAULT_PREFIX);
        validate_metrics_prefix(&metrics_prefix)?;

        Ok(Self {
            log_policy,
            log_sql: env_bool("DB_TRACE_LOG_SQL", false),
            log_args: env_bool("DB_TRACE_LOG_ARGS", false),
            args_len_limit: env_parse("DB_TRACE_ARGS_LEN_LIMIT", DEFAULT_ARGS_LEN_LIMIT)?,
            metrics_prefix,
        })
    }
}

/// Parse a policy name (`all`, `errors`, `sampled`).
///
/// The ratio only applies to `sampled` and must lie in 0.0-1.0.
pub fn parse_log_policy(name: &str, ratio: f64) -> Result<LogPolicy, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(LogPolicy::All),
        "errors" | "errors_only" | "" => Ok(LogPolicy::ErrorsOnly),
        "sampled" => {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid {
                    key: "DB_TRACE_LOG_SAMPLE_RATIO".into(),
                    message: format!("{} is outside 0.0-1.0", ratio),
                });
            }
            Ok(LogPolicy::Sampled(ratio))
        }
        other => Err(ConfigError::Invalid {
            key: "DB_TRACE_LOG_POLICY".into(),
            message: format!("unknown policy '{}', expected: all, errors, sampled", other),
        }),
    }
}

/// Check the prefix yields valid Prometheus metric names.
fn validate_metrics_prefix(prefix: &str) -> Result<(), ConfigError> {
    let valid_start = prefix
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key: "DB_TRACE_METRICS_PREFIX".into(),
            message: format!("'{}' is not a valid metric name prefix", prefix),
        })
    }
}
