//! Signal store port.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sigq_core::{BoxFuture, QueuedSignal, SignalId, SignalKey, SignalStatus, UserId};

use crate::error::StoreResult;

/// Durable collection of queued signals.
///
/// Implementations must enforce that at most one `Queued` signal exists
/// per [`SignalKey`], and must apply [`SignalStore::transition`] as an
/// atomic compare-and-set.
pub trait SignalStore: Send + Sync {
    /// Fetch a signal by id, in any status.
    fn get(&self, id: SignalId) -> BoxFuture<'_, StoreResult<Option<QueuedSignal>>>;

    /// Fetch the `Queued` signal for a key, if any.
    fn find_queued<'a>(
        &'a self,
        key: &'a SignalKey,
    ) -> BoxFuture<'a, StoreResult<Option<QueuedSignal>>>;

    /// Insert a new signal.
    ///
    /// Fails with `KeyConflict` if a `Queued` signal already exists for its key.
    fn insert(&self, signal: QueuedSignal) -> BoxFuture<'_, StoreResult<()>>;

    /// Replace a `Queued` signal record as a whole.
    fn update(&self, signal: QueuedSignal) -> BoxFuture<'_, StoreResult<()>>;

    /// Delete a signal. Returns whether it existed.
    fn delete(&self, id: SignalId) -> BoxFuture<'_, StoreResult<bool>>;

    /// Atomically move a signal from `from` to `to`.
    ///
    /// Returns the updated signal, or `None` if the signal is missing or
    /// its status was not `from`. Moving to `Promoted` stamps `promoted_at`.
    fn transition(
        &self,
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Option<QueuedSignal>>>;

    /// Record the latest loss percentage of a `Queued` signal.
    ///
    /// Returns false when the signal is gone or no longer queued.
    fn record_loss(&self, id: SignalId, loss: Option<Decimal>)
        -> BoxFuture<'_, StoreResult<bool>>;

    /// All `Queued` signals, oldest first, optionally scoped to one user.
    fn list_queued<'a>(
        &'a self,
        user: Option<&'a UserId>,
    ) -> BoxFuture<'a, StoreResult<Vec<QueuedSignal>>>;

    /// Terminal signals, most recently updated first.
    fn history<'a>(
        &'a self,
        user: Option<&'a UserId>,
        limit: usize,
    ) -> BoxFuture<'a, StoreResult<Vec<QueuedSignal>>>;

    /// Cancel every `Queued` signal for a key. Returns the cancelled ids.
    fn cancel_for_key<'a>(
        &'a self,
        key: &'a SignalKey,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<Vec<SignalId>>>;
}
