//! Core data contracts for the sigq signal admission scheduler.
//!
//! This crate provides the types shared by the queue, store and offset crates:
//! - `QueuedSignal`, `SignalPayload`, `SignalKey`: queued trading signals
//! - `PositionSnapshot`: read-only view of an open position
//! - `Price`, `Size`, `round_to_step`: precision-safe numerics
//! - `period_start`: candle period bucketing
//! - `Clock`: injectable time source

pub mod clock;
pub mod decimal;
pub mod error;
pub mod ids;
pub mod period;
pub mod position;
pub mod signal;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{round_to_step, Price, Size};
pub use error::{CoreError, Result};
pub use ids::{PositionId, SignalId, UserId};
pub use period::{period_start, same_period};
pub use position::PositionSnapshot;
pub use signal::{QueuedSignal, SignalKey, SignalPayload};
pub use types::{PositionStatus, Side, SignalStatus};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
