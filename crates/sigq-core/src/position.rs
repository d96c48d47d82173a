//! Read-only position snapshots supplied by the position manager.

use crate::{PositionId, PositionStatus, Price, Side, Size, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: PositionId,
    pub user_id: UserId,
    pub exchange: String,
    pub symbol: String,
    /// Timeframe in minutes of the strategy that owns the position.
    pub timeframe: u32,
    pub side: Side,
    pub status: PositionStatus,
    /// Weighted average entry price across all fills.
    pub weighted_avg_entry: Price,
    pub total_filled_quantity: Size,
    pub unrealized_pnl: Decimal,
}

impl PositionSnapshot {
    /// Check if the position is active.
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Profit per unit at `current` price.
    ///
    /// Long: current - entry. Short: entry - current.
    pub fn profit_per_unit(&self, current: Price) -> Decimal {
        match self.side {
            Side::Long => current.inner() - self.weighted_avg_entry.inner(),
            Side::Short => self.weighted_avg_entry.inner() - current.inner(),
        }
    }
}
