//! Store error types.

use sigq_core::SignalId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Signal not found: {0}")]
    NotFound(SignalId),

    #[error("Queued signal already exists for key: {0}")]
    KeyConflict(String),

    #[error("Signal is no longer queued: {0}")]
    NotQueued(SignalId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Stable error code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "signal_not_found",
            Self::KeyConflict(_) => "signal_key_conflict",
            Self::NotQueued(_) => "signal_not_queued",
            Self::Io(_) | Self::Json(_) => "store_unavailable",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
