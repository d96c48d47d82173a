//! Queue error types.

use sigq_core::SignalId;
use sigq_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Signal has no user context")]
    MissingUser,

    #[error("Duplicate signal within the current candle period: {key}")]
    DuplicateSignal { existing: SignalId, key: String },

    #[error("No entry configuration for {pair} {timeframe}m on {exchange}")]
    MissingEntryConfig {
        pair: String,
        timeframe: u32,
        exchange: String,
    },

    #[error("Position creation failed for signal {signal_id}: {reason}")]
    PositionCreation { signal_id: SignalId, reason: String },

    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Stable error code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingUser => "missing_user",
            Self::DuplicateSignal { .. } => "duplicate_signal",
            Self::MissingEntryConfig { .. } => "missing_entry_config",
            Self::PositionCreation { .. } => "position_creation_failed",
            Self::Collaborator(_) => "collaborator_unavailable",
            Self::Store(e) => e.code(),
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
