//! sigq service.
//!
//! Wires the admission scheduler and the risk offset planner together:
//! - TOML configuration
//! - Shared metrics registry
//! - Signal store (optionally journaled)
//! - Queue manager and promotion loop lifecycle
//! - Risk offset planner

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, Collaborators};
pub use config::{AppConfig, OffsetConfig, PoolConfig, SchedulerConfig, StoreConfig};
pub use error::{AppError, AppResult};
