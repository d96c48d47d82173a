//! Priority scorer for queued signals.
//!
//! Ranking tiers, strongest first:
//! 1. Pyramid continuation of an active position
//! 2. Loss depth (how far the entry is underwater)
//! 3. Replacement count
//! 4. FIFO age (older first)
//!
//! [`PriorityScore`] compares lexicographically over the tiers, so a higher
//! tier can never be outweighed by any amount of a lower one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use sigq_core::{PositionSnapshot, QueuedSignal};
use std::cmp::Ordering;

/// Structured priority of a queued signal. Greater is admitted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityScore {
    pub pyramid_continuation: bool,
    /// Magnitude of a negative loss percentage; zero when not underwater.
    pub loss_depth: Decimal,
    pub replacement_count: u32,
    pub queued_at: DateTime<Utc>,
}

impl PriorityScore {
    /// Flattened numeric score for display and logging.
    ///
    /// Bands: pyramid 1e9, loss depth (capped at 1000%) 1e5 per percent,
    /// replacements (capped at 99) 10 each, age in minutes (capped at 9).
    /// Matches [`Ord`] for realistic inputs; ordering decisions never use it.
    #[must_use]
    pub fn value(&self, now: DateTime<Utc>) -> Decimal {
        let pyramid = if self.pyramid_continuation {
            dec!(1_000_000_000)
        } else {
            Decimal::ZERO
        };
        let loss = self.loss_depth.min(dec!(1000)) * dec!(100_000);
        let replacements = Decimal::from(self.replacement_count.min(99)) * dec!(10);
        let age_minutes = (now - self.queued_at).num_minutes().clamp(0, 9);
        pyramid + loss + replacements + Decimal::from(age_minutes)
    }
}

impl Ord for PriorityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pyramid_continuation
            .cmp(&other.pyramid_continuation)
            .then_with(|| self.loss_depth.cmp(&other.loss_depth))
            .then_with(|| self.replacement_count.cmp(&other.replacement_count))
            // Earlier queued_at ranks higher.
            .then_with(|| other.queued_at.cmp(&self.queued_at))
    }
}

impl PartialOrd for PriorityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Check whether `signal` adds to an active position of the same user,
/// exchange, symbol, timeframe and side.
#[must_use]
pub fn is_pyramid_continuation(signal: &QueuedSignal, positions: &[PositionSnapshot]) -> bool {
    positions.iter().any(|p| {
        p.is_active()
            && p.user_id == signal.user_id
            && p.exchange == signal.exchange
            && p.symbol == signal.symbol
            && p.timeframe == signal.timeframe
            && p.side == signal.side
    })
}

/// Score a signal against the owner's active positions.
#[must_use]
pub fn score(signal: &QueuedSignal, positions: &[PositionSnapshot]) -> PriorityScore {
    let loss_depth = match signal.current_loss_percent {
        Some(loss) if loss.is_sign_negative() => -loss,
        _ => Decimal::ZERO,
    };

    PriorityScore {
        pyramid_continuation: is_pyramid_continuation(signal, positions),
        loss_depth,
        replacement_count: signal.replacement_count,
        queued_at: signal.queued_at,
    }
}
