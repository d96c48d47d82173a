//! Background promotion loop.
//!
//! Every tick the loop:
//! 1. Snapshots all queued signals
//! 2. Refreshes each signal's loss percentage from the price source
//! 3. Scores signals against their owner's active positions
//! 4. Promotes in descending priority until the pool denies a slot
//!
//! Errors and panics inside an iteration are logged and the loop keeps
//! running. [`PromotionLoop::stop`] waits for the task to exit, so no
//! promotion happens after it returns.

use futures_util::FutureExt;
use serde::Serialize;
use sigq_core::{SignalId, UserId};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::QueueResult;
use crate::manager::{PromotionMode, PromotionOutcome, QueueManager, UserContext};
use crate::scorer::score;

/// Loop timing and batch limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Upper bound on promotions per iteration.
    pub max_promotions_per_iteration: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_promotions_per_iteration: 10,
        }
    }
}

/// Summary of one loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    /// Signals that were scored.
    pub scored: usize,
    pub promoted: Vec<SignalId>,
    /// The iteration stopped because the pool denied a slot.
    pub slot_denied: bool,
    /// Candidates skipped (claimed elsewhere, left the queue, no user context).
    pub skipped: usize,
    /// Candidates whose promotion failed with an error.
    pub failed: usize,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the background promotion task.
pub struct PromotionLoop {
    manager: Arc<QueueManager>,
    settings: LoopSettings,
    running: Mutex<Option<RunningLoop>>,
    is_running: AtomicBool,
}

impl std::fmt::Debug for PromotionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionLoop")
            .field("settings", &self.settings)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PromotionLoop {
    #[must_use]
    pub fn new(manager: Arc<QueueManager>, settings: LoopSettings) -> Self {
        Self {
            manager,
            settings,
            running: Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Start the background task.
    ///
    /// Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Promotion loop already running");
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run(
            Arc::clone(&self.manager),
            self.settings.clone(),
            token.clone(),
        ));
        *running = Some(RunningLoop { token, handle });
        self.is_running.store(true, Ordering::Release);

        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            max_promotions = self.settings.max_promotions_per_iteration,
            "Promotion loop started"
        );
        true
    }

    /// Stop the background task and wait for it to exit.
    ///
    /// Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(RunningLoop { token, handle }) = running.take() else {
            return false;
        };

        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Promotion loop task failed");
        }
        self.is_running.store(false, Ordering::Release);
        info!("Promotion loop stopped");
        true
    }

    /// Run a single iteration in the caller's task.
    pub async fn run_iteration(&self) -> QueueResult<IterationReport> {
        iteration(
            &self.manager,
            &self.settings,
            &CancellationToken::new(),
        )
        .await
    }
}

async fn run(manager: Arc<QueueManager>, settings: LoopSettings, token: CancellationToken) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        manager.metrics().loop_iteration();
        let result = AssertUnwindSafe(iteration(&manager, &settings, &token))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(report)) => {
                if !report.promoted.is_empty() || report.failed > 0 {
                    info!(
                        scored = report.scored,
                        promoted = report.promoted.len(),
                        failed = report.failed,
                        slot_denied = report.slot_denied,
                        "Promotion iteration complete"
                    );
                }
            }
            Ok(Err(e)) => {
                manager.metrics().loop_error("error");
                warn!(error = %e, code = e.code(), "Promotion iteration failed");
            }
            Err(panic) => {
                manager.metrics().loop_error("panic");
                error!(panic = %panic_message(&*panic), "Promotion iteration panicked");
            }
        }
    }

    debug!("Promotion loop task exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn iteration(
    manager: &QueueManager,
    settings: &LoopSettings,
    token: &CancellationToken,
) -> QueueResult<IterationReport> {
    let mut report = IterationReport::default();

    let mut queued = manager.store().list_queued(None).await?;
    manager.metrics().set_queue_depth(queued.len());
    if queued.is_empty() {
        return Ok(report);
    }

    // Loss depth. A failed price only leaves the previous value in place.
    for signal in &mut queued {
        let price = match manager
            .ports()
            .prices
            .current_price(&signal.exchange, &signal.symbol)
            .await
        {
            Ok(price) => price,
            Err(e) => {
                manager.metrics().price_fetch_failed();
                warn!(
                    signal_id = %signal.id,
                    exchange = %signal.exchange,
                    symbol = %signal.symbol,
                    error = %e,
                    "Price fetch failed, keeping previous loss"
                );
                continue;
            }
        };

        let loss = signal.loss_percent(price);
        signal.current_loss_percent = loss;
        if let Err(e) = manager.store().record_loss(signal.id, loss).await {
            warn!(signal_id = %signal.id, error = %e, "Failed to record loss percentage");
        }
    }

    // One positions/risk lookup per user.
    let mut contexts: HashMap<UserId, Option<UserContext>> = HashMap::new();
    for signal in &queued {
        if contexts.contains_key(&signal.user_id) {
            continue;
        }
        let ctx = match manager.user_context(&signal.user_id).await {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(user_id = %signal.user_id, error = %e, "Failed to load user context");
                None
            }
        };
        contexts.insert(signal.user_id.clone(), ctx);
    }

    let mut candidates = Vec::with_capacity(queued.len());
    for signal in queued {
        match contexts.get(&signal.user_id).and_then(Option::as_ref) {
            Some(ctx) => candidates.push((score(&signal, &ctx.positions), signal)),
            None => report.skipped += 1,
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    report.scored = candidates.len();

    for (priority, signal) in candidates {
        if token.is_cancelled() {
            debug!("Promotion loop cancelled mid-iteration");
            break;
        }
        if report.promoted.len() >= settings.max_promotions_per_iteration {
            break;
        }

        let ctx = contexts.get(&signal.user_id).and_then(Option::as_ref);
        match manager
            .try_promote(&signal, PromotionMode::Normal, ctx)
            .await
        {
            Ok(PromotionOutcome::Promoted(handle)) => {
                debug!(
                    signal_id = %handle.signal.id,
                    priority = %priority.value(manager.clock().now()),
                    "Promoted by loop"
                );
                report.promoted.push(handle.signal.id);
            }
            Ok(PromotionOutcome::SlotDenied) => {
                report.slot_denied = true;
                break;
            }
            Ok(PromotionOutcome::Skipped(reason)) => {
                debug!(signal_id = %signal.id, reason, "Candidate skipped");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(
                    signal_id = %signal.id,
                    code = e.code(),
                    error = %e,
                    "Candidate promotion failed, trying next"
                );
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::QueuePorts;
    use crate::testkit::{
        MockEntryConfigs, MockPositionCreator, MockPositions, MockPrices, MockRiskConfigs,
        RecordingPool,
    };
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use sigq_core::{
        ManualClock, PositionId, PositionSnapshot, PositionStatus, Price, Side, SignalPayload,
        SignalStatus, Size,
    };
    use sigq_store::{InMemorySignalStore, SignalStore};
    use sigq_telemetry::Metrics;

    struct Harness {
        manager: Arc<QueueManager>,
        store: Arc<InMemorySignalStore>,
        pool: Arc<RecordingPool>,
        clock: Arc<ManualClock>,
        prices: Arc<MockPrices>,
        positions: Arc<MockPositions>,
        entries: Arc<MockEntryConfigs>,
        creator: Arc<MockPositionCreator>,
    }

    fn harness(capacity: u32) -> Harness {
        let store = Arc::new(InMemorySignalStore::new());
        let pool = Arc::new(RecordingPool::new(capacity));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        ));
        let prices = Arc::new(MockPrices::new());
        let positions = Arc::new(MockPositions::new());
        let entries = Arc::new(MockEntryConfigs::permissive());
        let creator = Arc::new(MockPositionCreator::new());
        let ports = QueuePorts {
            positions: positions.clone(),
            risk: Arc::new(MockRiskConfigs::new()),
            entries: entries.clone(),
            creator: creator.clone(),
            prices: prices.clone(),
        };
        let manager = Arc::new(QueueManager::new(
            store.clone(),
            pool.clone(),
            ports,
            clock.clone(),
            Metrics::new().unwrap(),
        ));
        Harness {
            manager,
            store,
            pool,
            clock,
            prices,
            positions,
            entries,
            creator,
        }
    }

    fn fast_settings() -> LoopSettings {
        LoopSettings {
            interval: Duration::from_millis(10),
            max_promotions_per_iteration: 10,
        }
    }

    async fn enqueue(h: &Harness, symbol: &str, entry: rust_decimal::Decimal) -> SignalId {
        h.prices.set("binance", symbol, Price::new(entry));
        let payload = SignalPayload {
            user_id: Some(UserId::new("u1")),
            exchange: "binance".to_string(),
            symbol: symbol.to_string(),
            timeframe: 60,
            side: Side::Long,
            entry_price: Price::new(entry),
            position_size: Some(Size::new(dec!(1))),
            raw: serde_json::Value::Null,
            received_at: None,
        };
        let id = h.manager.enqueue(payload).await.unwrap().signal().id;
        h.clock.advance(ChronoDuration::seconds(1));
        id
    }

    #[tokio::test]
    async fn test_iteration_promotes_deepest_loss_first() {
        let h = harness(1);
        let shallow = enqueue(&h, "BTCUSDT", dec!(100)).await;
        let deep = enqueue(&h, "ETHUSDT", dec!(100)).await;
        h.prices.set("binance", "BTCUSDT", Price::new(dec!(99)));
        h.prices.set("binance", "ETHUSDT", Price::new(dec!(90)));

        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());
        let report = lp.run_iteration().await.unwrap();

        assert_eq!(report.scored, 2);
        assert_eq!(report.promoted, vec![deep]);
        assert!(report.slot_denied);

        let remaining = h.store.get(shallow).await.unwrap().unwrap();
        assert!(remaining.is_queued());
        assert_eq!(remaining.current_loss_percent, Some(dec!(-1)));
    }

    #[tokio::test]
    async fn test_pyramid_continuation_goes_first_without_slot() {
        let h = harness(1);
        let losing = enqueue(&h, "ETHUSDT", dec!(100)).await;
        let pyramid = enqueue(&h, "SOLUSDT", dec!(100)).await;
        h.prices.set("binance", "ETHUSDT", Price::new(dec!(50)));
        h.positions.set(
            "u1",
            vec![PositionSnapshot {
                id: PositionId::new("p-sol"),
                user_id: UserId::new("u1"),
                exchange: "binance".to_string(),
                symbol: "SOLUSDT".to_string(),
                timeframe: 60,
                side: Side::Long,
                status: PositionStatus::Active,
                weighted_avg_entry: Price::new(dec!(95)),
                total_filled_quantity: Size::new(dec!(3)),
                unrealized_pnl: dec!(15),
            }],
        );

        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());
        let report = lp.run_iteration().await.unwrap();

        assert_eq!(report.promoted, vec![pyramid, losing]);
        assert_eq!(h.pool.requests().len(), 1);
        assert_eq!(h.positions.calls(), 1);
    }

    #[tokio::test]
    async fn test_price_failure_is_tolerated() {
        let h = harness(2);
        let a = enqueue(&h, "BTCUSDT", dec!(100)).await;
        let b = enqueue(&h, "ETHUSDT", dec!(100)).await;
        h.prices.fail_symbol("BTCUSDT");

        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());
        let report = lp.run_iteration().await.unwrap();

        assert_eq!(report.promoted.len(), 2);
        assert!(report.promoted.contains(&a));
        assert!(report.promoted.contains(&b));
    }

    #[tokio::test]
    async fn test_missing_config_skips_to_next_candidate() {
        let h = harness(2);
        h.entries.set_permissive(false);
        h.entries.add("ETHUSDT", 60, "binance");
        let unconfigured = enqueue(&h, "BTCUSDT", dec!(100)).await;
        let configured = enqueue(&h, "ETHUSDT", dec!(100)).await;

        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());
        let report = lp.run_iteration().await.unwrap();

        assert_eq!(report.promoted, vec![configured]);
        assert_eq!(report.failed, 1);
        assert!(h.store.get(unconfigured).await.unwrap().unwrap().is_queued());
        assert_eq!(h.pool.in_use(), 1);
    }

    #[tokio::test]
    async fn test_max_promotions_per_iteration() {
        let h = harness(10);
        for symbol in ["A", "B", "C"] {
            enqueue(&h, symbol, dec!(10)).await;
        }
        let settings = LoopSettings {
            max_promotions_per_iteration: 2,
            ..fast_settings()
        };
        let lp = PromotionLoop::new(h.manager.clone(), settings);
        let report = lp.run_iteration().await.unwrap();
        assert_eq!(report.promoted.len(), 2);
        assert!(!report.slot_denied);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let h = harness(1);
        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());

        assert!(!lp.stop().await);
        assert!(lp.start().await);
        assert!(!lp.start().await);
        assert!(lp.is_running());

        assert!(lp.stop().await);
        assert!(!lp.stop().await);
        assert!(!lp.is_running());

        // Restartable after a stop.
        assert!(lp.start().await);
        assert!(lp.stop().await);
    }

    #[tokio::test]
    async fn test_background_loop_promotes() {
        let h = harness(1);
        let id = enqueue(&h, "BTCUSDT", dec!(100)).await;
        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());

        lp.start().await;
        let mut promoted = false;
        for _ in 0..100 {
            if !h.store.get(id).await.unwrap().unwrap().is_queued() {
                promoted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        lp.stop().await;

        assert!(promoted);
        assert_eq!(
            h.store.get(id).await.unwrap().unwrap().status,
            SignalStatus::Promoted
        );
    }

    #[tokio::test]
    async fn test_no_promotion_after_stop() {
        let h = harness(1);
        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());

        lp.start().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        lp.stop().await;

        // Queued after stop returned; a live loop would promote it on the next tick.
        let id = enqueue(&h, "BTCUSDT", dec!(100)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.store.get(id).await.unwrap().unwrap().is_queued());
        assert!(h.creator.created().is_empty());
        assert!(h.pool.requests().is_empty());
    }

    #[tokio::test]
    async fn test_loop_survives_panics_and_errors() {
        let h = harness(1);
        let id = enqueue(&h, "BTCUSDT", dec!(100)).await;
        h.prices.set_panic_on_fetch(true);
        h.positions.set_failing(true);

        let lp = PromotionLoop::new(h.manager.clone(), fast_settings());
        lp.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lp.is_running());
        assert!(h.manager.metrics().loop_error_count("panic") > 0);

        // Recovers once collaborators do.
        h.prices.set_panic_on_fetch(false);
        h.positions.set_failing(false);
        let mut promoted = false;
        for _ in 0..100 {
            if !h.store.get(id).await.unwrap().unwrap().is_queued() {
                promoted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        lp.stop().await;
        assert!(promoted);
        assert!(h.manager.metrics().loop_iteration_count() > 1);
    }
}
