//! Priority admission scheduler for queued trading signals.
//!
//! Components:
//! - `scorer`: four-tier priority of a queued signal
//! - `manager`: enqueue/dequeue/cancel/list/history/promote
//! - `promotion_loop`: background task admitting the best candidates
//! - `pool`: execution-slot pool port and a fixed-capacity implementation
//! - `ports`: collaborator traits (positions, risk config, entry config,
//!   position creation, prices)

pub mod error;
pub mod manager;
pub mod pool;
pub mod ports;
pub mod promotion_loop;
pub mod scorer;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{QueueError, QueueResult};
pub use manager::{EnqueueOutcome, ListedSignal, PromotionHandle, PromotionPath, QueueManager};
pub use pool::{ExecutionPool, FixedSlotPool, SlotRequest};
pub use ports::{
    EntryConfig, EntryConfigSource, PositionCreator, PositionSource, PriceSource, QueuePorts,
    RiskConfigSource, UserRiskConfig,
};
pub use promotion_loop::{IterationReport, LoopSettings, PromotionLoop};
pub use scorer::{is_pyramid_continuation, score, PriorityScore};
