//! Queue manager.
//!
//! Owns the QUEUED -> PROMOTED | CANCELLED lifecycle of queued signals:
//! - Arrival deduplication and same-key replacement by candle period
//! - Ownership-checked removal and promotion
//! - Slot-gated admission with a pyramid-continuation bypass
//!
//! Two writers can promote (the background loop and manual promotion).
//! Both take an in-process claim before requesting a slot and finish with a
//! compare-and-set in the store, so a signal is never promoted twice.
//! Removal and exit cancellation take the same claim, so neither can land
//! while a position is being created for the signal.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use sigq_core::{
    period_start, Clock, PositionId, PositionSnapshot, QueuedSignal, Side, SignalId, SignalKey,
    SignalPayload, SignalStatus, UserId,
};
use sigq_store::{SignalStore, StoreError};
use sigq_telemetry::Metrics;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::pool::{ExecutionPool, SlotRequest};
use crate::ports::{QueuePorts, UserRiskConfig};
use crate::scorer::{is_pyramid_continuation, score, PriorityScore};

// ============================================================================
// Result types
// ============================================================================

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new signal was queued.
    Created(QueuedSignal),
    /// An earlier-period signal for the same key was overwritten.
    Replaced(QueuedSignal),
}

impl EnqueueOutcome {
    #[must_use]
    pub fn signal(&self) -> &QueuedSignal {
        match self {
            Self::Created(s) | Self::Replaced(s) => s,
        }
    }

    #[must_use]
    pub fn is_replacement(&self) -> bool {
        matches!(self, Self::Replaced(_))
    }
}

/// Queued signal as returned by [`QueueManager::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ListedSignal {
    #[serde(flatten)]
    pub signal: QueuedSignal,
    /// Present when listing for a specific user.
    pub priority: Option<PriorityScore>,
    pub is_pyramid_continuation: Option<bool>,
    /// Continuation that the user's risk config lets skip the pool.
    pub bypass_eligible: Option<bool>,
}

/// How a promoted signal was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPath {
    /// Granted a slot by the execution pool.
    Pool,
    /// Pyramid continuation admitted without a slot.
    PyramidBypass,
    /// Forced by an operator.
    Forced,
}

impl PromotionPath {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::PyramidBypass => "pyramid_bypass",
            Self::Forced => "forced",
        }
    }
}

impl fmt::Display for PromotionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned for a promoted signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionHandle {
    pub signal: QueuedSignal,
    pub position_id: PositionId,
    pub path: PromotionPath,
}

/// Outcome of one promotion attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PromotionOutcome {
    Promoted(PromotionHandle),
    /// The pool denied a slot. The signal is untouched.
    SlotDenied,
    /// Not attempted (gone, no longer queued, or claimed by another writer).
    Skipped(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromotionMode {
    Normal,
    Force,
}

/// Positions and risk config of one user, loaded once per pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserContext {
    pub positions: Vec<PositionSnapshot>,
    pub risk: UserRiskConfig,
}

// ============================================================================
// Signal claims
// ============================================================================

/// Releases an in-process signal claim on drop.
struct ClaimGuard<'a> {
    claims: &'a DashMap<SignalId, ()>,
    id: SignalId,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

// ============================================================================
// QueueManager
// ============================================================================

pub struct QueueManager {
    store: Arc<dyn SignalStore>,
    pool: Arc<dyn ExecutionPool>,
    ports: QueuePorts,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    claims: DashMap<SignalId, ()>,
}

impl fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueManager")
            .field("claims", &self.claims.len())
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn SignalStore>,
        pool: Arc<dyn ExecutionPool>,
        ports: QueuePorts,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            pool,
            ports,
            clock,
            metrics,
            claims: DashMap::new(),
        }
    }

    pub(crate) fn store(&self) -> &dyn SignalStore {
        self.store.as_ref()
    }

    pub(crate) fn ports(&self) -> &QueuePorts {
        &self.ports
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // === Arrival ===

    /// Queue an entry signal.
    ///
    /// A queued signal for the same key from the same candle period makes the
    /// arrival a duplicate. One from an earlier period is replaced in place.
    pub async fn enqueue(&self, payload: SignalPayload) -> QueueResult<EnqueueOutcome> {
        let Some(user_id) = payload.user_id.clone() else {
            self.metrics.enqueue("missing_user");
            warn!(
                exchange = %payload.exchange,
                symbol = %payload.symbol,
                "Rejecting signal without user context"
            );
            return Err(QueueError::MissingUser);
        };

        let now = self.clock.now();
        let received_at = payload.received_at.unwrap_or(now);
        let key = SignalKey::new(
            user_id.clone(),
            payload.exchange.clone(),
            payload.symbol.clone(),
            payload.timeframe,
            payload.side,
        );

        if let Some(mut existing) = self.store.find_queued(&key).await? {
            let arrival_period = period_start(received_at, key.timeframe);
            if arrival_period <= existing.queued_period() {
                self.metrics.enqueue("duplicate");
                debug!(
                    signal_id = %existing.id,
                    key = %key,
                    period_start = %arrival_period,
                    "Duplicate signal within candle period"
                );
                return Err(QueueError::DuplicateSignal {
                    existing: existing.id,
                    key: key.to_string(),
                });
            }

            existing.apply_replacement(&payload, now);
            match self.store.update(existing.clone()).await {
                Ok(()) => {
                    self.metrics.enqueue("replaced");
                    info!(
                        signal_id = %existing.id,
                        key = %key,
                        replacement_count = existing.replacement_count,
                        entry_price = %existing.entry_price,
                        "Replaced queued signal"
                    );
                    return Ok(EnqueueOutcome::Replaced(existing));
                }
                // Promoted or cancelled in the meantime: queue the arrival fresh.
                Err(StoreError::NotQueued(id)) | Err(StoreError::NotFound(id)) => {
                    debug!(signal_id = %id, key = %key, "Replacement target left the queue");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let signal = QueuedSignal::new(user_id, &payload, received_at);
        match self.store.insert(signal.clone()).await {
            Ok(()) => {
                self.metrics.enqueue("created");
                info!(signal_id = %signal.id, key = %key, "Queued signal");
                self.refresh_queue_depth().await;
                Ok(EnqueueOutcome::Created(signal))
            }
            Err(StoreError::KeyConflict(_)) => {
                // Lost a race with a concurrent arrival for the same key.
                self.metrics.enqueue("duplicate");
                let existing = self
                    .store
                    .find_queued(&key)
                    .await?
                    .map_or(signal.id, |s| s.id);
                Err(QueueError::DuplicateSignal {
                    existing,
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // === Removal ===

    /// Remove a signal on behalf of `requester`.
    ///
    /// Returns false if the signal does not exist or belongs to another user.
    pub async fn dequeue(&self, id: SignalId, requester: &UserId) -> QueueResult<bool> {
        let Some(signal) = self.store.get(id).await? else {
            return Ok(false);
        };
        if &signal.user_id != requester {
            warn!(
                signal_id = %id,
                requester = %requester,
                "Dequeue denied: requester does not own signal"
            );
            return Ok(false);
        }
        self.dequeue_internal(id).await
    }

    /// Remove a signal without an ownership check.
    ///
    /// Returns false while the signal is being promoted.
    pub async fn dequeue_internal(&self, id: SignalId) -> QueueResult<bool> {
        let Some(_claim) = self.claim(id) else {
            warn!(signal_id = %id, "Dequeue skipped: promotion in progress");
            return Ok(false);
        };
        let removed = self.store.delete(id).await?;
        if removed {
            info!(signal_id = %id, "Dequeued signal");
            self.refresh_queue_depth().await;
        }
        Ok(removed)
    }

    /// Cancel queued signals for a key after an exit signal.
    ///
    /// Returns the number of signals cancelled. A signal whose promotion is
    /// already in progress is left to finish and not counted.
    pub async fn cancel_for_key(
        &self,
        user_id: &UserId,
        symbol: &str,
        exchange: &str,
        timeframe: u32,
        side: Side,
    ) -> QueueResult<usize> {
        let key = SignalKey::new(user_id.clone(), exchange, symbol, timeframe, side);
        let Some(queued) = self.store.find_queued(&key).await? else {
            return Ok(0);
        };
        let Some(_claim) = self.claim(queued.id) else {
            warn!(
                signal_id = %queued.id,
                key = %key,
                "Exit cancellation skipped: promotion in progress"
            );
            return Ok(0);
        };
        let cancelled = self.store.cancel_for_key(&key, self.clock.now()).await?;
        if !cancelled.is_empty() {
            self.metrics.cancelled(cancelled.len());
            info!(key = %key, count = cancelled.len(), "Cancelled queued signals");
            self.refresh_queue_depth().await;
        }
        Ok(cancelled.len())
    }

    // === Queries ===

    /// List queued signals.
    ///
    /// Scoped to one user, each entry carries its priority, pyramid flag
    /// and bypass eligibility. Without a user the raw signals are returned.
    pub async fn list(&self, user: Option<&UserId>) -> QueueResult<Vec<ListedSignal>> {
        let queued = self.store.list_queued(user).await?;

        let Some(user) = user else {
            return Ok(queued
                .into_iter()
                .map(|signal| ListedSignal {
                    signal,
                    priority: None,
                    is_pyramid_continuation: None,
                    bypass_eligible: None,
                })
                .collect());
        };

        let ctx = self.user_context(user).await?;
        Ok(queued
            .into_iter()
            .map(|signal| {
                let priority = score(&signal, &ctx.positions);
                let continuation = priority.pyramid_continuation;
                ListedSignal {
                    signal,
                    priority: Some(priority),
                    is_pyramid_continuation: Some(continuation),
                    bypass_eligible: Some(continuation && ctx.risk.allow_pyramid_bypass),
                }
            })
            .collect())
    }

    /// Terminal signals, most recent first.
    pub async fn history(
        &self,
        user: Option<&UserId>,
        limit: usize,
    ) -> QueueResult<Vec<QueuedSignal>> {
        Ok(self.store.history(user, limit).await?)
    }

    // === Promotion ===

    /// Promote a signal on behalf of `requester`.
    ///
    /// Returns `None` if the signal is missing, not owned by the requester,
    /// no longer queued, or the pool denied a slot.
    pub async fn promote(
        &self,
        id: SignalId,
        requester: &UserId,
    ) -> QueueResult<Option<PromotionHandle>> {
        self.promote_checked(id, Some(requester), PromotionMode::Normal)
            .await
    }

    /// Promote a signal without an ownership check.
    pub async fn promote_internal(&self, id: SignalId) -> QueueResult<Option<PromotionHandle>> {
        self.promote_checked(id, None, PromotionMode::Normal).await
    }

    /// Promote a signal without requesting a pool slot.
    pub async fn force_promote(
        &self,
        id: SignalId,
        requester: &UserId,
    ) -> QueueResult<Option<PromotionHandle>> {
        self.promote_checked(id, Some(requester), PromotionMode::Force)
            .await
    }

    /// Force-promote a signal without an ownership check.
    pub async fn force_promote_internal(
        &self,
        id: SignalId,
    ) -> QueueResult<Option<PromotionHandle>> {
        self.promote_checked(id, None, PromotionMode::Force).await
    }

    async fn promote_checked(
        &self,
        id: SignalId,
        requester: Option<&UserId>,
        mode: PromotionMode,
    ) -> QueueResult<Option<PromotionHandle>> {
        let Some(signal) = self.store.get(id).await? else {
            return Ok(None);
        };
        if let Some(requester) = requester {
            if &signal.user_id != requester {
                warn!(
                    signal_id = %id,
                    requester = %requester,
                    "Promotion denied: requester does not own signal"
                );
                return Ok(None);
            }
        }

        match self.try_promote(&signal, mode, None).await? {
            PromotionOutcome::Promoted(handle) => Ok(Some(handle)),
            PromotionOutcome::SlotDenied | PromotionOutcome::Skipped(_) => Ok(None),
        }
    }

    /// Load a user's active positions and risk config.
    pub(crate) async fn user_context(&self, user: &UserId) -> QueueResult<UserContext> {
        let positions = self.ports.positions.active_positions(user).await?;
        let risk = self.ports.risk.risk_config(user).await?;
        Ok(UserContext { positions, risk })
    }

    fn claim(&self, id: SignalId) -> Option<ClaimGuard<'_>> {
        match self.claims.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(ClaimGuard {
                    claims: &self.claims,
                    id,
                })
            }
        }
    }

    /// Single promotion path shared by manual promotion and the loop.
    ///
    /// Order: claim, re-read, entry config, admission (bypass or slot),
    /// position creation, QUEUED -> PROMOTED compare-and-set.
    pub(crate) async fn try_promote(
        &self,
        candidate: &QueuedSignal,
        mode: PromotionMode,
        ctx: Option<&UserContext>,
    ) -> QueueResult<PromotionOutcome> {
        let Some(_claim) = self.claim(candidate.id) else {
            debug!(signal_id = %candidate.id, "Promotion already in progress");
            return Ok(PromotionOutcome::Skipped("claimed"));
        };

        let Some(signal) = self.store.get(candidate.id).await? else {
            return Ok(PromotionOutcome::Skipped("missing"));
        };
        if !signal.is_queued() {
            return Ok(PromotionOutcome::Skipped("not_queued"));
        }

        let config = self
            .ports
            .entries
            .entry_config(&signal.symbol, signal.timeframe, &signal.exchange)
            .await?
            .ok_or_else(|| QueueError::MissingEntryConfig {
                pair: signal.symbol.clone(),
                timeframe: signal.timeframe,
                exchange: signal.exchange.clone(),
            })?;

        let path = match mode {
            PromotionMode::Force => PromotionPath::Forced,
            PromotionMode::Normal => {
                let loaded;
                let ctx = match ctx {
                    Some(ctx) => ctx,
                    None => {
                        loaded = self.user_context(&signal.user_id).await?;
                        &loaded
                    }
                };
                if ctx.risk.allow_pyramid_bypass && is_pyramid_continuation(&signal, &ctx.positions)
                {
                    PromotionPath::PyramidBypass
                } else {
                    PromotionPath::Pool
                }
            }
        };

        let slot = if path == PromotionPath::Pool {
            let request = SlotRequest::from(&signal);
            if !self.pool.request_slot(&request).await {
                self.metrics.slot_denied();
                debug!(signal_id = %signal.id, "Execution pool denied slot");
                return Ok(PromotionOutcome::SlotDenied);
            }
            Some(request)
        } else {
            None
        };

        let position_id = match self.ports.creator.create_position(&signal, &config).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(request) = &slot {
                    self.pool.release_slot(request).await;
                }
                warn!(signal_id = %signal.id, error = %e, "Position creation failed");
                return Err(QueueError::PositionCreation {
                    signal_id: signal.id,
                    reason: e.to_string(),
                });
            }
        };

        let promoted = self
            .store
            .transition(
                signal.id,
                SignalStatus::Queued,
                SignalStatus::Promoted,
                self.clock.now(),
            )
            .await?;
        let Some(promoted) = promoted else {
            // Only a direct store write can race here; manager writers all claim.
            error!(
                signal_id = %signal.id,
                position_id = %position_id,
                "Signal left the queue while its position was being created"
            );
            return Ok(PromotionOutcome::Skipped("status_changed"));
        };

        self.metrics.promoted(path.as_str());
        info!(
            signal_id = %promoted.id,
            user_id = %promoted.user_id,
            exchange = %promoted.exchange,
            symbol = %promoted.symbol,
            position_id = %position_id,
            path = %path,
            "Promoted queued signal"
        );
        self.refresh_queue_depth().await;

        Ok(PromotionOutcome::Promoted(PromotionHandle {
            signal: promoted,
            position_id,
            path,
        }))
    }

    async fn refresh_queue_depth(&self) {
        match self.store.list_queued(None).await {
            Ok(queued) => self.metrics.set_queue_depth(queued.len()),
            Err(e) => debug!(error = %e, "Failed to refresh queue depth"),
        }
    }
}
