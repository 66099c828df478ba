//! Configuration module for db_tracer.
//!
//! This module provides centralized configuration loading from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use db_tracer::config::Config;
//! use db_tracer::DbTracer;
//!
//! let config = Config::from_env()?;
//! db_tracer::logging::init_logging(&config.logging)?;
//!
//! let tracer = DbTracer::builder().config(config.tracer).build()?;
//! ```

mod error;
mod logging;
pub(crate) mod parse;
mod tracer;

pub use error::ConfigError;
pub use logging::LoggingConfig;
pub use tracer::{parse_log_policy, TracerConfig};

#[cfg(feature = "otel")]
pub use crate::observability::OtelConfig;

/// Complete configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Tracer behavior.
    pub tracer: TracerConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// OTLP export configuration.
    #[cfg(feature = "otel")]
    pub otel: OtelConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            tracer: TracerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            #[cfg(feature = "otel")]
            otel: OtelConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!(target: crate::LOG_TARGET, "Configuration loaded:");
        info!(target: crate::LOG_TARGET, "  Log policy: {:?}", self.tracer.log_policy);
        info!(target: crate::LOG_TARGET, "  Log filter: {}", self.logging.filter);
        info!(target: crate::LOG_TARGET, "  Metrics prefix: {}", self.tracer.metrics_prefix);

        if self.tracer.log_sql {
            info!(target: crate::LOG_TARGET, "  SQL logging: enabled");
        }

        if self.tracer.log_args {
            info!(
                target: crate::LOG_TARGET,
                "  Argument logging: enabled (limit {} chars)",
                self.tracer.args_len_limit
            );
        }

        #[cfg(feature = "otel")]
        if self.otel.is_enabled() {
            info!(target: crate::LOG_TARGET, "  OTLP export: {}", self.otel.endpoint);
        }
    }
}
