//! Application configuration.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sigq_offset::PrecisionRules;
use sigq_queue::LoopSettings;
use sigq_telemetry::LoggingSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Promotion loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the background promotion loop. Default: true.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Loop interval (ms). Default: 5,000.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Promotions per iteration. Default: 10.
    #[serde(default = "default_max_promotions_per_iteration")]
    pub max_promotions_per_iteration: usize,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_max_promotions_per_iteration() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_ms: default_interval_ms(),
            max_promotions_per_iteration: default_max_promotions_per_iteration(),
        }
    }
}

impl SchedulerConfig {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_millis(self.interval_ms),
            max_promotions_per_iteration: self.max_promotions_per_iteration,
        }
    }
}

/// Execution pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent position slots. Default: 10.
    #[serde(default = "default_pool_capacity")]
    pub capacity: u32,
}

fn default_pool_capacity() -> u32 {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
        }
    }
}

/// Offset planner fallback precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetConfig {
    /// Step size for symbols without published rules. Default: 0.001.
    #[serde(default = "default_step_size")]
    pub default_step_size: Decimal,
    /// Minimum notional for symbols without published rules. Default: 10.
    #[serde(default = "default_min_notional")]
    pub default_min_notional: Decimal,
}

fn default_step_size() -> Decimal {
    dec!(0.001)
}

fn default_min_notional() -> Decimal {
    dec!(10)
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            default_step_size: default_step_size(),
            default_min_notional: default_min_notional(),
        }
    }
}

impl OffsetConfig {
    pub fn precision_defaults(&self) -> PrecisionRules {
        PrecisionRules {
            step_size: self.default_step_size,
            min_notional: self.default_min_notional,
        }
    }
}

/// Signal store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON Lines journal. In-memory only when absent.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub offset: OffsetConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load configuration from `SIGQ_CONFIG` or `config/default.toml`.
    ///
    /// Falls back to defaults when the file does not exist.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("SIGQ_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Install the global tracing subscriber from `[logging]`.
    ///
    /// Call once, before [`crate::Application::new`].
    pub fn init_logging(&self) -> AppResult<()> {
        sigq_telemetry::init_logging_with(&self.logging)?;
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.scheduler.interval_ms == 0 {
            return Err(AppError::Config(
                "scheduler.interval_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.max_promotions_per_iteration == 0 {
            return Err(AppError::Config(
                "scheduler.max_promotions_per_iteration must be positive".to_string(),
            ));
        }
        if self.pool.capacity == 0 {
            return Err(AppError::Config("pool.capacity must be positive".to_string()));
        }
        if self.offset.default_step_size <= Decimal::ZERO {
            return Err(AppError::Config(
                "offset.default_step_size must be positive".to_string(),
            ));
        }
        if self.offset.default_min_notional <= Decimal::ZERO {
            return Err(AppError::Config(
                "offset.default_min_notional must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
