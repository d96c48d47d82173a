//! Queued signal types.
//!
//! A signal is queued when no execution slot is available at arrival.
//! At most one `Queued` signal exists per [`SignalKey`].

use crate::{period_start, Price, Side, SignalId, SignalStatus, Size, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deduplication key of a queued signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalKey {
    pub user_id: UserId,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: u32,
    pub side: Side,
}

impl SignalKey {
    pub fn new(
        user_id: UserId,
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: u32,
        side: Side,
    ) -> Self {
        Self {
            user_id,
            exchange: exchange.into(),
            symbol: symbol.into(),
            timeframe,
            side,
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}/{}m/{}",
            self.user_id, self.exchange, self.symbol, self.timeframe, self.side
        )
    }
}

/// Inbound entry signal as handed over by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPayload {
    /// Owning user; absent when the ingestion layer failed to attach one.
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub exchange: String,
    pub symbol: String,
    /// Timeframe in minutes.
    pub timeframe: u32,
    pub side: Side,
    pub entry_price: Price,
    #[serde(default)]
    pub position_size: Option<Size>,
    /// Original payload as received.
    #[serde(default)]
    pub raw: serde_json::Value,
    /// Arrival time. Stamped from the queue clock when absent.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

/// A signal waiting for an execution slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSignal {
    pub id: SignalId,
    pub user_id: UserId,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: u32,
    pub side: Side,
    pub entry_price: Price,
    pub position_size: Option<Size>,
    pub raw_payload: serde_json::Value,
    /// First arrival for this key. Preserved across replacements.
    pub queued_at: DateTime<Utc>,
    pub replacement_count: u32,
    /// Signed move since entry in percent; negative means the entry is underwater.
    pub current_loss_percent: Option<Decimal>,
    pub status: SignalStatus,
    pub promoted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedSignal {
    /// Create a new queued signal from a payload arriving at `now`.
    pub fn new(user_id: UserId, payload: &SignalPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: SignalId::new(),
            user_id,
            exchange: payload.exchange.clone(),
            symbol: payload.symbol.clone(),
            timeframe: payload.timeframe,
            side: payload.side,
            entry_price: payload.entry_price,
            position_size: payload.position_size,
            raw_payload: payload.raw.clone(),
            queued_at: now,
            replacement_count: 0,
            current_loss_percent: None,
            status: SignalStatus::Queued,
            promoted_at: None,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SignalKey {
        SignalKey::new(
            self.user_id.clone(),
            self.exchange.clone(),
            self.symbol.clone(),
            self.timeframe,
            self.side,
        )
    }

    pub fn is_queued(&self) -> bool {
        self.status == SignalStatus::Queued
    }

    /// Start of the candle period this signal was first queued in.
    pub fn queued_period(&self) -> DateTime<Utc> {
        period_start(self.queued_at, self.timeframe)
    }

    /// Overwrite the price and size fields with a later-period arrival.
    ///
    /// `queued_at` is kept so the signal does not lose its FIFO standing.
    pub fn apply_replacement(&mut self, payload: &SignalPayload, now: DateTime<Utc>) {
        self.entry_price = payload.entry_price;
        self.position_size = payload.position_size;
        self.raw_payload = payload.raw.clone();
        self.replacement_count = self.replacement_count.saturating_add(1);
        self.current_loss_percent = None;
        self.updated_at = now;
    }

    /// Signed percentage move of `current` against the entry price.
    ///
    /// Long: (current - entry) / entry * 100. Short: (entry - current) / entry * 100.
    /// Returns `None` for a zero entry price.
    pub fn loss_percent(&self, current: Price) -> Option<Decimal> {
        let move_pct = current.pct_from(self.entry_price)?;
        Some(match self.side {
            Side::Long => move_pct,
            Side::Short => -move_pct,
        })
    }
}
