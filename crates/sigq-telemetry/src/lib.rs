//! Prometheus metrics and structured logging for sigq.
//!
//! - Structured logging with tracing (JSON in production, pretty in development)
//! - Scheduler and offset planner metrics held in an explicit registry

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with, LogFormat, LoggingSettings};
pub use metrics::Metrics;
