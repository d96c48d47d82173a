//! In-memory signal store.
//!
//! All state lives behind one `parking_lot::RwLock`, so every operation is
//! atomic with respect to the others. With a journal attached, each mutation
//! is appended to the journal before it is applied in memory; a failed
//! append leaves the in-memory state untouched.

use std::collections::HashMap;
use std::future::ready;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use sigq_core::{BoxFuture, QueuedSignal, SignalId, SignalKey, SignalStatus, UserId};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::journal::{JournalEntry, JsonLinesJournal};
use crate::store::SignalStore;

#[derive(Default)]
struct StoreState {
    signals: HashMap<SignalId, QueuedSignal>,
    /// Index of `Queued` signals by key.
    queued_by_key: HashMap<SignalKey, SignalId>,
}

impl StoreState {
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Upsert { signal } => {
                let key = signal.key();
                if signal.is_queued() {
                    self.queued_by_key.insert(key, signal.id);
                } else if self.queued_by_key.get(&key) == Some(&signal.id) {
                    self.queued_by_key.remove(&key);
                }
                self.signals.insert(signal.id, signal);
            }
            JournalEntry::Delete { id } => {
                if let Some(signal) = self.signals.remove(&id) {
                    let key = signal.key();
                    if self.queued_by_key.get(&key) == Some(&id) {
                        self.queued_by_key.remove(&key);
                    }
                }
            }
        }
    }
}

/// Signal store backed by process memory.
#[derive(Default)]
pub struct InMemorySignalStore {
    state: RwLock<StoreState>,
    journal: Option<Mutex<JsonLinesJournal>>,
}

impl InMemorySignalStore {
    /// Create an empty, non-journaled store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journaled store, replaying any existing journal at `path`.
    pub fn with_journal(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let mut state = StoreState::default();
        let entries = JsonLinesJournal::read_entries(path)?;
        let replayed = entries.len();
        for entry in entries {
            state.apply(entry);
        }

        info!(
            path = %path.display(),
            replayed,
            queued = state.queued_by_key.len(),
            "Signal store restored from journal"
        );

        Ok(Self {
            state: RwLock::new(state),
            journal: Some(Mutex::new(JsonLinesJournal::open(path)?)),
        })
    }

    /// Number of signals held, in any status.
    pub fn len(&self) -> usize {
        self.state.read().signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().signals.is_empty()
    }

    fn commit(&self, state: &mut StoreState, entry: JournalEntry) -> StoreResult<()> {
        if let Some(journal) = &self.journal {
            journal.lock().append(&entry)?;
        }
        state.apply(entry);
        Ok(())
    }

    fn insert_sync(&self, signal: QueuedSignal) -> StoreResult<()> {
        let mut state = self.state.write();
        let key = signal.key();
        if signal.is_queued() && state.queued_by_key.contains_key(&key) {
            return Err(StoreError::KeyConflict(key.to_string()));
        }
        debug!(signal_id = %signal.id, key = %key, "Inserting signal");
        self.commit(&mut state, JournalEntry::Upsert { signal })
    }

    fn update_sync(&self, signal: QueuedSignal) -> StoreResult<()> {
        let mut state = self.state.write();
        let existing = state
            .signals
            .get(&signal.id)
            .ok_or(StoreError::NotFound(signal.id))?;
        if !existing.is_queued() {
            return Err(StoreError::NotQueued(signal.id));
        }
        if existing.key() != signal.key() {
            return Err(StoreError::KeyConflict(signal.key().to_string()));
        }
        self.commit(&mut state, JournalEntry::Upsert { signal })
    }

    fn delete_sync(&self, id: SignalId) -> StoreResult<bool> {
        let mut state = self.state.write();
        if !state.signals.contains_key(&id) {
            return Ok(false);
        }
        self.commit(&mut state, JournalEntry::Delete { id })?;
        Ok(true)
    }

    fn transition_sync(
        &self,
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<QueuedSignal>> {
        let mut state = self.state.write();
        let Some(current) = state.signals.get(&id) else {
            return Ok(None);
        };
        if current.status != from {
            return Ok(None);
        }

        let mut next = current.clone();
        next.status = to;
        next.updated_at = at;
        if to == SignalStatus::Promoted {
            next.promoted_at = Some(at);
        }

        self.commit(&mut state, JournalEntry::Upsert { signal: next.clone() })?;
        Ok(Some(next))
    }

    fn record_loss_sync(&self, id: SignalId, loss: Option<Decimal>) -> StoreResult<bool> {
        let mut state = self.state.write();
        let Some(current) = state.signals.get(&id) else {
            return Ok(false);
        };
        if !current.is_queued() {
            return Ok(false);
        }
        if current.current_loss_percent == loss {
            return Ok(true);
        }
        let mut next = current.clone();
        next.current_loss_percent = loss;
        self.commit(&mut state, JournalEntry::Upsert { signal: next })?;
        Ok(true)
    }

    fn list_queued_sync(&self, user: Option<&UserId>) -> Vec<QueuedSignal> {
        let state = self.state.read();
        let mut queued: Vec<QueuedSignal> = state
            .queued_by_key
            .values()
            .filter_map(|id| state.signals.get(id))
            .filter(|s| user.map_or(true, |u| &s.user_id == u))
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));
        queued
    }

    fn history_sync(&self, user: Option<&UserId>, limit: usize) -> Vec<QueuedSignal> {
        let state = self.state.read();
        let mut terminal: Vec<QueuedSignal> = state
            .signals
            .values()
            .filter(|s| s.status.is_terminal())
            .filter(|s| user.map_or(true, |u| &s.user_id == u))
            .cloned()
            .collect();
        terminal.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        terminal.truncate(limit);
        terminal
    }

    fn cancel_for_key_sync(
        &self,
        key: &SignalKey,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<SignalId>> {
        let mut state = self.state.write();
        let Some(id) = state.queued_by_key.get(key).copied() else {
            return Ok(Vec::new());
        };
        let Some(current) = state.signals.get(&id) else {
            return Ok(Vec::new());
        };

        let mut next = current.clone();
        next.status = SignalStatus::Cancelled;
        next.updated_at = at;
        self.commit(&mut state, JournalEntry::Upsert { signal: next })?;
        Ok(vec![id])
    }
}

impl SignalStore for InMemorySignalStore {
    fn get(&self, id: SignalId) -> BoxFuture<'_, StoreResult<Option<QueuedSignal>>> {
        let found = self.state.read().signals.get(&id).cloned();
        Box::pin(ready(Ok(found)))
    }

    fn find_queued<'a>(
        &'a self,
        key: &'a SignalKey,
    ) -> BoxFuture<'a, StoreResult<Option<QueuedSignal>>> {
        let state = self.state.read();
        let found = state
            .queued_by_key
            .get(key)
            .and_then(|id| state.signals.get(id))
            .cloned();
        Box::pin(ready(Ok(found)))
    }

    fn insert(&self, signal: QueuedSignal) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(ready(self.insert_sync(signal)))
    }

    fn update(&self, signal: QueuedSignal) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(ready(self.update_sync(signal)))
    }

    fn delete(&self, id: SignalId) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(ready(self.delete_sync(id)))
    }

    fn transition(
        &self,
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Option<QueuedSignal>>> {
        Box::pin(ready(self.transition_sync(id, from, to, at)))
    }

    fn record_loss(
        &self,
        id: SignalId,
        loss: Option<Decimal>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(ready(self.record_loss_sync(id, loss)))
    }

    fn list_queued<'a>(
        &'a self,
        user: Option<&'a UserId>,
    ) -> BoxFuture<'a, StoreResult<Vec<QueuedSignal>>> {
        Box::pin(ready(Ok(self.list_queued_sync(user))))
    }

    fn history<'a>(
        &'a self,
        user: Option<&'a UserId>,
        limit: usize,
    ) -> BoxFuture<'a, StoreResult<Vec<QueuedSignal>>> {
        Box::pin(ready(Ok(self.history_sync(user, limit))))
    }

    fn cancel_for_key<'a>(
        &'a self,
        key: &'a SignalKey,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<Vec<SignalId>>> {
        Box::pin(ready(self.cancel_for_key_sync(key, at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use sigq_core::{Price, Side, SignalPayload};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn payload(user: &str, symbol: &str) -> SignalPayload {
        SignalPayload {
            user_id: Some(UserId::new(user)),
            exchange: "binance".to_string(),
            symbol: symbol.to_string(),
            timeframe: 15,
            side: Side::Long,
            entry_price: Price::new(dec!(100)),
            position_size: None,
            raw: serde_json::Value::Null,
            received_at: None,
        }
    }

    fn signal(user: &str, symbol: &str, at: DateTime<Utc>) -> QueuedSignal {
        QueuedSignal::new(UserId::new(user), &payload(user, symbol), at)
    }

    #[tokio::test]
    async fn test_insert_rejects_second_queued_for_key() {
        let store = InMemorySignalStore::new();
        store.insert(signal("u1", "BTCUSDT", t0())).await.unwrap();

        let err = store
            .insert(signal("u1", "BTCUSDT", t0()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KeyConflict(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_find_queued_by_key() {
        let store = InMemorySignalStore::new();
        let s = signal("u1", "BTCUSDT", t0());
        store.insert(s.clone()).await.unwrap();

        let found = store.find_queued(&s.key()).await.unwrap();
        assert_eq!(found.map(|f| f.id), Some(s.id));

        let other = SignalKey::new(UserId::new("u2"), "binance", "BTCUSDT", 15, Side::Long);
        assert!(store.find_queued(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = InMemorySignalStore::new();
        let s = signal("u1", "BTCUSDT", t0());
        store.insert(s.clone()).await.unwrap();

        let at = t0() + Duration::minutes(3);
        let promoted = store
            .transition(s.id, SignalStatus::Queued, SignalStatus::Promoted, at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.status, SignalStatus::Promoted);
        assert_eq!(promoted.promoted_at, Some(at));

        // Second writer loses.
        let again = store
            .transition(s.id, SignalStatus::Queued, SignalStatus::Promoted, at)
            .await
            .unwrap();
        assert!(again.is_none());

        // Key is free again once the signal left the queue.
        assert!(store.find_queued(&s.key()).await.unwrap().is_none());
        store.insert(signal("u1", "BTCUSDT", at)).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_requires_queued() {
        let store = InMemorySignalStore::new();
        let s = signal("u1", "BTCUSDT", t0());
        store.insert(s.clone()).await.unwrap();
        store
            .transition(s.id, SignalStatus::Queued, SignalStatus::Cancelled, t0())
            .await
            .unwrap();

        let err = store.update(s.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotQueued(_)));

        let missing = signal("u1", "ETHUSDT", t0());
        let err = store.update(missing).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_queued_scoped_and_ordered() {
        let store = InMemorySignalStore::new();
        let late = signal("u1", "ETHUSDT", t0() + Duration::minutes(5));
        let early = signal("u1", "BTCUSDT", t0());
        let other_user = signal("u2", "BTCUSDT", t0());
        store.insert(late.clone()).await.unwrap();
        store.insert(early.clone()).await.unwrap();
        store.insert(other_user).await.unwrap();

        let all = store.list_queued(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let u1 = UserId::new("u1");
        let mine = store.list_queued(Some(&u1)).await.unwrap();
        let ids: Vec<_> = mine.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn test_history_returns_terminal_newest_first() {
        let store = InMemorySignalStore::new();
        let a = signal("u1", "BTCUSDT", t0());
        let b = signal("u1", "ETHUSDT", t0());
        let c = signal("u1", "SOLUSDT", t0());
        for s in [&a, &b, &c] {
            store.insert(s.clone()).await.unwrap();
        }
        store
            .transition(
                a.id,
                SignalStatus::Queued,
                SignalStatus::Promoted,
                t0() + Duration::minutes(1),
            )
            .await
            .unwrap();
        store
            .cancel_for_key(&b.key(), t0() + Duration::minutes(2))
            .await
            .unwrap();

        let history = store.history(None, 10).await.unwrap();
        let ids: Vec<_> = history.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);

        let limited = store.history(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_for_key_counts() {
        let store = InMemorySignalStore::new();
        let s = signal("u1", "BTCUSDT", t0());
        store.insert(s.clone()).await.unwrap();

        let cancelled = store.cancel_for_key(&s.key(), t0()).await.unwrap();
        assert_eq!(cancelled, vec![s.id]);
        let cancelled = store.cancel_for_key(&s.key(), t0()).await.unwrap();
        assert!(cancelled.is_empty());

        let stored = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_record_loss_only_for_queued() {
        let store = InMemorySignalStore::new();
        let s = signal("u1", "BTCUSDT", t0());
        store.insert(s.clone()).await.unwrap();

        assert!(store.record_loss(s.id, Some(dec!(-4.5))).await.unwrap());
        let stored = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(stored.current_loss_percent, Some(dec!(-4.5)));

        store.delete(s.id).await.unwrap();
        assert!(!store.record_loss(s.id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_journal_replay_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.jsonl");
        let kept = signal("u1", "BTCUSDT", t0());
        let removed = signal("u1", "ETHUSDT", t0());
        let promoted = signal("u2", "BTCUSDT", t0());

        {
            let store = InMemorySignalStore::with_journal(&path).unwrap();
            store.insert(kept.clone()).await.unwrap();
            store.insert(removed.clone()).await.unwrap();
            store.insert(promoted.clone()).await.unwrap();
            store.delete(removed.id).await.unwrap();
            store
                .transition(promoted.id, SignalStatus::Queued, SignalStatus::Promoted, t0())
                .await
                .unwrap();
        }

        let restored = InMemorySignalStore::with_journal(&path).unwrap();
        assert_eq!(restored.len(), 2);
        let queued = restored.list_queued(None).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, kept.id);
        assert!(restored.get(removed.id).await.unwrap().is_none());

        // Key index is rebuilt, so the invariant still holds after restart.
        let err = restored
            .insert(signal("u1", "BTCUSDT", t0()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KeyConflict(_)));
    }
}
