//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sigq_telemetry::TelemetryError),

    #[error("Store error: {0}")]
    Store(#[from] sigq_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] sigq_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
