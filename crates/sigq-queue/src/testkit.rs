//! Mock collaborators for queue tests.
//!
//! Each mock records what it was asked and can be scripted to fail.

use parking_lot::Mutex;
use sigq_core::{BoxFuture, PositionId, PositionSnapshot, Price, QueuedSignal, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{QueueError, QueueResult};
use crate::pool::{ExecutionPool, FixedSlotPool, SlotRequest};
use crate::ports::{
    EntryConfig, EntryConfigSource, PositionCreator, PositionSource, PriceSource,
    RiskConfigSource, UserRiskConfig,
};

/// Active positions per user.
#[derive(Default)]
pub struct MockPositions {
    positions: Mutex<HashMap<UserId, Vec<PositionSnapshot>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user: &str, positions: Vec<PositionSnapshot>) {
        self.positions.lock().insert(UserId::new(user), positions);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PositionSource for MockPositions {
    fn active_positions<'a>(
        &'a self,
        user: &'a UserId,
    ) -> BoxFuture<'a, QueueResult<Vec<PositionSnapshot>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(QueueError::Collaborator("position source down".to_string()));
            }
            Ok(self.positions.lock().get(user).cloned().unwrap_or_default())
        })
    }
}

/// Risk config per user; unknown users get the default.
#[derive(Default)]
pub struct MockRiskConfigs {
    configs: Mutex<HashMap<UserId, UserRiskConfig>>,
}

impl MockRiskConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user: &str, config: UserRiskConfig) {
        self.configs.lock().insert(UserId::new(user), config);
    }
}

impl RiskConfigSource for MockRiskConfigs {
    fn risk_config<'a>(&'a self, user: &'a UserId) -> BoxFuture<'a, QueueResult<UserRiskConfig>> {
        Box::pin(async move { Ok(self.configs.lock().get(user).cloned().unwrap_or_default()) })
    }
}

/// Entry configs. In permissive mode every lookup succeeds.
pub struct MockEntryConfigs {
    permissive: AtomicBool,
    configured: Mutex<HashSet<(String, u32, String)>>,
}

impl MockEntryConfigs {
    /// Every (pair, timeframe, exchange) has a config.
    pub fn permissive() -> Self {
        Self {
            permissive: AtomicBool::new(true),
            configured: Mutex::new(HashSet::new()),
        }
    }

    /// Only explicitly added combinations have a config.
    pub fn strict() -> Self {
        Self {
            permissive: AtomicBool::new(false),
            configured: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_permissive(&self, permissive: bool) {
        self.permissive.store(permissive, Ordering::SeqCst);
    }

    pub fn add(&self, pair: &str, timeframe: u32, exchange: &str) {
        self.configured
            .lock()
            .insert((pair.to_string(), timeframe, exchange.to_string()));
    }
}

impl EntryConfigSource for MockEntryConfigs {
    fn entry_config<'a>(
        &'a self,
        pair: &'a str,
        timeframe: u32,
        exchange: &'a str,
    ) -> BoxFuture<'a, QueueResult<Option<EntryConfig>>> {
        Box::pin(async move {
            let known = self.permissive.load(Ordering::SeqCst)
                || self.configured.lock().contains(&(
                    pair.to_string(),
                    timeframe,
                    exchange.to_string(),
                ));
            Ok(known.then(|| EntryConfig {
                pair: pair.to_string(),
                timeframe,
                exchange: exchange.to_string(),
                settings: serde_json::Value::Null,
            }))
        })
    }
}

/// Records created positions and hands out sequential ids.
#[derive(Default)]
pub struct MockPositionCreator {
    created: Mutex<Vec<QueuedSignal>>,
    fail_next: Mutex<Option<String>>,
    fail_always: AtomicBool,
}

impl MockPositionCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next creation with `reason`.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }

    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<QueuedSignal> {
        self.created.lock().clone()
    }
}

impl PositionCreator for MockPositionCreator {
    fn create_position<'a>(
        &'a self,
        signal: &'a QueuedSignal,
        _config: &'a EntryConfig,
    ) -> BoxFuture<'a, QueueResult<PositionId>> {
        Box::pin(async move {
            if let Some(reason) = self.fail_next.lock().take() {
                return Err(QueueError::Collaborator(reason));
            }
            if self.fail_always.load(Ordering::SeqCst) {
                return Err(QueueError::Collaborator("creator down".to_string()));
            }
            let mut created = self.created.lock();
            created.push(signal.clone());
            Ok(PositionId::new(format!("pos-{}", created.len())))
        })
    }
}

/// Prices per (exchange, symbol).
#[derive(Default)]
pub struct MockPrices {
    prices: Mutex<HashMap<(String, String), Price>>,
    failing: Mutex<HashSet<String>>,
    panic_on_fetch: AtomicBool,
}

impl MockPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, exchange: &str, symbol: &str, price: Price) {
        self.prices
            .lock()
            .insert((exchange.to_string(), symbol.to_string()), price);
    }

    /// Make every fetch for `symbol` fail.
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().insert(symbol.to_string());
    }

    pub fn set_panic_on_fetch(&self, panic: bool) {
        self.panic_on_fetch.store(panic, Ordering::SeqCst);
    }
}

impl PriceSource for MockPrices {
    fn current_price<'a>(
        &'a self,
        exchange: &'a str,
        symbol: &'a str,
    ) -> BoxFuture<'a, QueueResult<Price>> {
        Box::pin(async move {
            if self.panic_on_fetch.load(Ordering::SeqCst) {
                panic!("price feed exploded");
            }
            if self.failing.lock().contains(symbol) {
                return Err(QueueError::Collaborator(format!("no price for {symbol}")));
            }
            self.prices
                .lock()
                .get(&(exchange.to_string(), symbol.to_string()))
                .copied()
                .ok_or_else(|| QueueError::Collaborator(format!("unknown symbol {symbol}")))
        })
    }
}

/// Fixed-capacity pool that records every request and release.
pub struct RecordingPool {
    inner: FixedSlotPool,
    requests: Mutex<Vec<SlotRequest>>,
    released: Mutex<Vec<SlotRequest>>,
}

impl RecordingPool {
    pub fn new(capacity: u32) -> Self {
        Self {
            inner: FixedSlotPool::new(capacity),
            requests: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SlotRequest> {
        self.requests.lock().clone()
    }

    pub fn released(&self) -> Vec<SlotRequest> {
        self.released.lock().clone()
    }

    pub fn in_use(&self) -> u32 {
        self.inner.in_use()
    }

    /// Free a slot as if a position had closed.
    pub fn free_one(&self) {
        self.inner.release();
    }
}

impl ExecutionPool for RecordingPool {
    fn request_slot<'a>(&'a self, request: &'a SlotRequest) -> BoxFuture<'a, bool> {
        self.requests.lock().push(request.clone());
        Box::pin(std::future::ready(self.inner.try_acquire()))
    }

    fn release_slot<'a>(&'a self, request: &'a SlotRequest) -> BoxFuture<'a, ()> {
        self.released.lock().push(request.clone());
        self.inner.release();
        Box::pin(std::future::ready(()))
    }
}
