//! Per-symbol precision rules.
//!
//! Exchanges publish quantity step sizes and minimum order notionals per
//! symbol. Symbols without published rules fall back to the defaults.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Quantity step used when an exchange publishes nothing for a symbol.
pub const DEFAULT_STEP_SIZE: Decimal = dec!(0.001);

/// Minimum order notional used when an exchange publishes nothing for a symbol.
pub const DEFAULT_MIN_NOTIONAL: Decimal = dec!(10);

/// Raw rules as returned by a connector.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPrecisionRules {
    #[serde(default)]
    pub step_size: Option<Decimal>,
    /// Quantity decimals; `3` means a step of 0.001.
    #[serde(default)]
    pub quantity_decimals: Option<u32>,
    #[serde(default)]
    pub min_notional: Option<Decimal>,
}

/// Effective rules for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionRules {
    pub step_size: Decimal,
    pub min_notional: Decimal,
}

impl Default for PrecisionRules {
    fn default() -> Self {
        Self {
            step_size: DEFAULT_STEP_SIZE,
            min_notional: DEFAULT_MIN_NOTIONAL,
        }
    }
}

impl PrecisionRules {
    /// Resolve raw rules, falling back to `defaults` field by field.
    ///
    /// An explicit `step_size` wins over `quantity_decimals`. Non-positive
    /// steps and negative notionals are ignored.
    #[must_use]
    pub fn resolve(raw: &RawPrecisionRules, defaults: PrecisionRules) -> Self {
        let step_size = raw
            .step_size
            .filter(|s| s.is_sign_positive() && !s.is_zero())
            .or_else(|| raw.quantity_decimals.map(step_from_decimals))
            .unwrap_or(defaults.step_size);
        let min_notional = raw
            .min_notional
            .filter(|n| !n.is_sign_negative())
            .unwrap_or(defaults.min_notional);
        Self {
            step_size,
            min_notional,
        }
    }
}

fn step_from_decimals(decimals: u32) -> Decimal {
    // Decimal supports at most 28 fractional digits.
    Decimal::new(1, decimals.min(28))
}

/// Normalize symbol spellings (`btc/usdt`, `BTC-USDT`) to `BTCUSDT`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ':'))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Precision rules of every symbol on one exchange.
#[derive(Debug, Clone)]
pub struct PrecisionTable {
    rules: HashMap<String, PrecisionRules>,
    defaults: PrecisionRules,
}

impl PrecisionTable {
    pub fn from_raw(raw: &HashMap<String, RawPrecisionRules>, defaults: PrecisionRules) -> Self {
        let rules = raw
            .iter()
            .map(|(symbol, r)| (normalize_symbol(symbol), PrecisionRules::resolve(r, defaults)))
            .collect();
        Self { rules, defaults }
    }

    /// Rules for `symbol`, or the defaults if the exchange has none.
    #[must_use]
    pub fn rules_for(&self, symbol: &str) -> PrecisionRules {
        match self.rules.get(&normalize_symbol(symbol)) {
            Some(rules) => *rules,
            None => {
                debug!(symbol, "No precision rules published, using defaults");
                self.defaults
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
