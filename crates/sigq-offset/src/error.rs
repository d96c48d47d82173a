//! Offset planner error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OffsetError {
    #[error("Malformed credential material: {0}")]
    MalformedCredentials(String),

    #[error("No credentials for exchange {0}")]
    MissingCredentials(String),

    #[error("Connector for {exchange} failed: {reason}")]
    Connector { exchange: String, reason: String },

    #[error("Price unavailable for {symbol} on {exchange}: {reason}")]
    PriceUnavailable {
        exchange: String,
        symbol: String,
        reason: String,
    },

    #[error("Precision rules unavailable for {exchange}: {reason}")]
    PrecisionUnavailable { exchange: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OffsetError {
    /// Stable error code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedCredentials(_) | Self::Json(_) => "malformed_credentials",
            Self::MissingCredentials(_) => "missing_credentials",
            Self::Connector { .. } => "connector_failed",
            Self::PriceUnavailable { .. } => "price_unavailable",
            Self::PrecisionUnavailable { .. } => "precision_unavailable",
        }
    }
}

pub type OffsetResult<T> = Result<T, OffsetError>;
