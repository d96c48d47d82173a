//! Execution slot pool.
//!
//! The pool caps how many positions may be open at once. A slot grant is
//! the only way a queued signal reaches position creation, apart from the
//! pyramid bypass and forced promotion.

use serde::Serialize;
use sigq_core::{BoxFuture, QueuedSignal, Side, SignalId, UserId};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Slot request for one signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRequest {
    pub signal_id: SignalId,
    pub user_id: UserId,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
}

impl From<&QueuedSignal> for SlotRequest {
    fn from(signal: &QueuedSignal) -> Self {
        Self {
            signal_id: signal.id,
            user_id: signal.user_id.clone(),
            exchange: signal.exchange.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
        }
    }
}

/// Global execution-slot pool.
pub trait ExecutionPool: Send + Sync {
    /// Request a slot. `true` means granted.
    fn request_slot<'a>(&'a self, request: &'a SlotRequest) -> BoxFuture<'a, bool>;

    /// Return a slot whose promotion did not produce a position.
    fn release_slot<'a>(&'a self, _request: &'a SlotRequest) -> BoxFuture<'a, ()> {
        Box::pin(std::future::ready(()))
    }
}

/// Fixed-capacity pool backed by a lock-free counter.
#[derive(Debug)]
pub struct FixedSlotPool {
    in_use: AtomicU32,
    capacity: u32,
}

impl FixedSlotPool {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            in_use: AtomicU32::new(0),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.in_use())
    }

    /// Take a slot if one is free.
    ///
    /// CAS loop so concurrent callers can never exceed the capacity.
    pub fn try_acquire(&self) -> bool {
        loop {
            let current = self.in_use.load(Ordering::Acquire);
            if current >= self.capacity {
                return false;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Free a slot, e.g. when a position closes. Never underflows.
    pub fn release(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }
}

impl ExecutionPool for FixedSlotPool {
    fn request_slot<'a>(&'a self, request: &'a SlotRequest) -> BoxFuture<'a, bool> {
        let granted = self.try_acquire();
        debug!(
            signal_id = %request.signal_id,
            granted,
            in_use = self.in_use(),
            capacity = self.capacity,
            "Slot requested"
        );
        Box::pin(std::future::ready(granted))
    }

    fn release_slot<'a>(&'a self, request: &'a SlotRequest) -> BoxFuture<'a, ()> {
        self.release();
        debug!(signal_id = %request.signal_id, in_use = self.in_use(), "Slot released");
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request() -> SlotRequest {
        SlotRequest {
            signal_id: SignalId::new(),
            user_id: UserId::new("u1"),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
        }
    }

    #[test]
    fn test_acquire_up_to_capacity() {
        let pool = FixedSlotPool::new(2);
        assert!(pool.try_acquire());
        assert!(pool.try_acquire());
        assert!(!pool.try_acquire());
        assert_eq!(pool.available(), 0);

        pool.release();
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire());
    }

    #[test]
    fn test_release_never_underflows() {
        let pool = FixedSlotPool::new(1);
        pool.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_request_and_release_through_trait() {
        let pool: Arc<dyn ExecutionPool> = Arc::new(FixedSlotPool::new(1));
        let req = request();
        assert!(pool.request_slot(&req).await);
        assert!(!pool.request_slot(&req).await);
        pool.release_slot(&req).await;
        assert!(pool.request_slot(&req).await);
    }

    #[test]
    fn test_concurrent_acquire_respects_capacity() {
        let pool = Arc::new(FixedSlotPool::new(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..5).filter(|_| pool.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
        assert_eq!(pool.in_use(), 10);
    }
}
