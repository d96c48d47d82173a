//! Collaborator ports consumed by the queue manager.
//!
//! All traits are dyn-compatible and return [`BoxFuture`] so implementations
//! can be swapped for mocks in tests.

use serde::{Deserialize, Serialize};
use sigq_core::{BoxFuture, PositionId, PositionSnapshot, Price, QueuedSignal, UserId};
use std::sync::Arc;

use crate::error::QueueResult;

/// Per-user risk settings relevant to admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRiskConfig {
    /// Admit pyramid continuations without requesting a pool slot.
    #[serde(default = "default_allow_pyramid_bypass")]
    pub allow_pyramid_bypass: bool,
}

fn default_allow_pyramid_bypass() -> bool {
    true
}

impl Default for UserRiskConfig {
    fn default() -> Self {
        Self {
            allow_pyramid_bypass: default_allow_pyramid_bypass(),
        }
    }
}

/// Entry configuration for a (pair, timeframe, exchange) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    pub pair: String,
    pub timeframe: u32,
    pub exchange: String,
    /// Strategy parameters passed through to position creation.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Source of a user's active positions.
pub trait PositionSource: Send + Sync {
    fn active_positions<'a>(
        &'a self,
        user: &'a UserId,
    ) -> BoxFuture<'a, QueueResult<Vec<PositionSnapshot>>>;
}

/// Source of per-user risk configuration.
pub trait RiskConfigSource: Send + Sync {
    fn risk_config<'a>(&'a self, user: &'a UserId) -> BoxFuture<'a, QueueResult<UserRiskConfig>>;
}

/// Lookup of entry configuration. `Ok(None)` means none is configured.
pub trait EntryConfigSource: Send + Sync {
    fn entry_config<'a>(
        &'a self,
        pair: &'a str,
        timeframe: u32,
        exchange: &'a str,
    ) -> BoxFuture<'a, QueueResult<Option<EntryConfig>>>;
}

/// Downstream position creation for promoted signals.
pub trait PositionCreator: Send + Sync {
    fn create_position<'a>(
        &'a self,
        signal: &'a QueuedSignal,
        config: &'a EntryConfig,
    ) -> BoxFuture<'a, QueueResult<PositionId>>;
}

/// Current market price used for loss depth scoring.
pub trait PriceSource: Send + Sync {
    fn current_price<'a>(
        &'a self,
        exchange: &'a str,
        symbol: &'a str,
    ) -> BoxFuture<'a, QueueResult<Price>>;
}

/// Bundle of collaborators handed to the queue manager.
#[derive(Clone)]
pub struct QueuePorts {
    pub positions: Arc<dyn PositionSource>,
    pub risk: Arc<dyn RiskConfigSource>,
    pub entries: Arc<dyn EntryConfigSource>,
    pub creator: Arc<dyn PositionCreator>,
    pub prices: Arc<dyn PriceSource>,
}

impl std::fmt::Debug for QueuePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePorts").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_config_defaults_to_bypass() {
        let config: UserRiskConfig = serde_json::from_str("{}").unwrap();
        assert!(config.allow_pyramid_bypass);
        assert_eq!(config, UserRiskConfig::default());
    }

    #[test]
    fn test_entry_config_settings_optional() {
        let config: EntryConfig =
            serde_json::from_str(r#"{"pair":"BTCUSDT","timeframe":60,"exchange":"binance"}"#)
                .unwrap();
        assert!(config.settings.is_null());
    }
}
