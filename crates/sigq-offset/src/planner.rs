//! Risk offset planner.
//!
//! Builds a partial-close plan over winning positions whose closed notional
//! covers a required USD amount (typically the unrealized loss of another
//! position). Winners are consumed in the caller's order until the
//! remaining amount is covered. A winner is never fully closed, and every
//! connector opened while planning is released.

use rust_decimal::Decimal;
use serde::Serialize;
use sigq_core::{PositionId, PositionSnapshot, Price, Side, Size, UserId};
use sigq_telemetry::Metrics;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connector::ConnectorFactory;
use crate::credentials::CredentialMaterial;
use crate::precision::PrecisionRules;
use crate::session::ConnectorSession;

/// User whose positions are being offset.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user_id: UserId,
    /// Raw credential blob, see [`CredentialMaterial::parse`].
    pub credentials: serde_json::Value,
}

/// One partial close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetPlanEntry {
    pub position_id: PositionId,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Size,
    pub current_price: Price,
    /// quantity * current_price
    pub notional: Decimal,
    /// quantity * profit per unit
    pub realized_profit: Decimal,
}

/// Ordered partial closes for one offset request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OffsetPlan {
    pub entries: Vec<OffsetPlanEntry>,
}

impl OffsetPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_realized_profit(&self) -> Decimal {
        self.entries.iter().map(|e| e.realized_profit).sum()
    }

    pub fn total_notional(&self) -> Decimal {
        self.entries.iter().map(|e| e.notional).sum()
    }

    /// Whether the plan's closed notional reaches `required`.
    pub fn covers(&self, required: Decimal) -> bool {
        self.total_notional() >= required
    }

    pub fn into_entries(self) -> Vec<OffsetPlanEntry> {
        self.entries
    }
}

/// Why a winner contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    Inactive,
    Connector,
    Price,
    NoProfit,
    Precision,
    ZeroQuantity,
    BelowMinNotional,
    FullClose,
}

impl SkipReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Connector => "connector",
            Self::Price => "price",
            Self::NoProfit => "no_profit",
            Self::Precision => "precision",
            Self::ZeroQuantity => "zero_quantity",
            Self::BelowMinNotional => "below_min_notional",
            Self::FullClose => "full_close",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RiskOffsetPlanner {
    factory: Arc<dyn ConnectorFactory>,
    defaults: PrecisionRules,
    metrics: Metrics,
}

impl fmt::Debug for RiskOffsetPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskOffsetPlanner")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl RiskOffsetPlanner {
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectorFactory>, defaults: PrecisionRules, metrics: Metrics) -> Self {
        Self {
            factory,
            defaults,
            metrics,
        }
    }

    #[must_use]
    pub fn defaults(&self) -> PrecisionRules {
        self.defaults
    }

    /// Build a partial-close plan covering `required_usd`.
    ///
    /// Per-winner failures skip the winner. Returns whatever was assembled,
    /// possibly an empty plan.
    pub async fn plan(
        &self,
        user: &UserAccount,
        winners: &[PositionSnapshot],
        required_usd: Decimal,
    ) -> OffsetPlan {
        let mut plan = OffsetPlan::default();
        if winners.is_empty() || required_usd <= Decimal::ZERO {
            return plan;
        }

        let credentials = CredentialMaterial::parse(&user.credentials);
        if let Err(e) = &credentials {
            warn!(user_id = %user.user_id, error = %e, "Unusable credential material");
        }
        let mut session =
            ConnectorSession::new(self.factory.as_ref(), credentials, self.defaults, &self.metrics);

        let mut remaining = required_usd;
        for winner in winners {
            if remaining <= Decimal::ZERO {
                break;
            }
            match self.plan_winner(&mut session, winner, remaining).await {
                Ok(entry) => {
                    remaining -= entry.notional;
                    debug!(
                        position_id = %entry.position_id,
                        quantity = %entry.quantity,
                        notional = %entry.notional,
                        remaining = %remaining,
                        "Accepted partial close"
                    );
                    plan.entries.push(entry);
                }
                Err(reason) => {
                    self.metrics.offset_skipped(reason.as_str());
                    debug!(
                        position_id = %winner.id,
                        exchange = %winner.exchange,
                        symbol = %winner.symbol,
                        reason = %reason,
                        "Skipped winner"
                    );
                }
            }
        }

        let closed = session.close_all().await;
        self.metrics.offset_plan_built(plan.len());
        info!(
            user_id = %user.user_id,
            required = %required_usd,
            covered = %plan.total_notional(),
            realized_profit = %plan.total_realized_profit(),
            entries = plan.len(),
            connectors_closed = closed,
            "Built risk offset plan"
        );
        plan
    }

    async fn plan_winner(
        &self,
        session: &mut ConnectorSession<'_>,
        winner: &PositionSnapshot,
        remaining: Decimal,
    ) -> Result<OffsetPlanEntry, SkipReason> {
        if !winner.is_active() {
            return Err(SkipReason::Inactive);
        }

        session.connector(&winner.exchange).await.map_err(|e| {
            warn!(exchange = %winner.exchange, error = %e, "Connector unavailable");
            SkipReason::Connector
        })?;

        let price = session
            .current_price(&winner.exchange, &winner.symbol)
            .await
            .map_err(|e| {
                warn!(
                    exchange = %winner.exchange,
                    symbol = %winner.symbol,
                    error = %e,
                    "Price fetch failed"
                );
                SkipReason::Price
            })?;

        let profit_per_unit = winner.profit_per_unit(price);
        if profit_per_unit <= Decimal::ZERO {
            return Err(SkipReason::NoProfit);
        }

        let raw_quantity = remaining / profit_per_unit;

        let rules = session
            .precision_rules(&winner.exchange, &winner.symbol)
            .await
            .map_err(|_| SkipReason::Precision)?;

        let quantity = Size::new(raw_quantity).round_to_step(rules.step_size);
        if !quantity.is_positive() {
            return Err(SkipReason::ZeroQuantity);
        }

        let notional = quantity.notional(price);
        if notional < rules.min_notional {
            return Err(SkipReason::BelowMinNotional);
        }

        if quantity >= winner.total_filled_quantity {
            return Err(SkipReason::FullClose);
        }

        Ok(OffsetPlanEntry {
            position_id: winner.id.clone(),
            exchange: winner.exchange.clone(),
            symbol: winner.symbol.clone(),
            side: winner.side,
            quantity,
            current_price: price,
            notional,
            realized_profit: quantity.inner() * profit_per_unit,
        })
    }
}
