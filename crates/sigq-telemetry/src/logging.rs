//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,sigq=debug";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging section of the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Forced output format. When absent, `RUST_ENV=production` selects JSON.
    #[serde(default)]
    pub format: Option<LogFormat>,
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: None,
        }
    }
}

impl LoggingSettings {
    /// Resolve the output format from settings and environment.
    pub fn resolved_format(&self) -> LogFormat {
        self.format.unwrap_or_else(|| {
            let is_production = std::env::var("RUST_ENV")
                .map(|v| v == "production")
                .unwrap_or(false);
            if is_production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            }
        })
    }
}

/// Initialize structured logging with default settings.
pub fn init_logging() -> TelemetryResult<()> {
    init_logging_with(&LoggingSettings::default())
}

/// Initialize structured logging.
///
/// Configures tracing with JSON output for production and
/// pretty output for development.
pub fn init_logging_with(settings: &LoggingSettings) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid filter: {e}")))?;

    let result = match settings.resolved_format() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
