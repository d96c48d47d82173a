//! Queued signal storage for sigq.
//!
//! Defines the [`SignalStore`] port used by the queue manager and an
//! in-memory implementation with an optional JSON Lines journal for
//! restart recovery.

pub mod error;
pub mod journal;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use journal::{JournalEntry, JournalRecord, JsonLinesJournal};
pub use memory::InMemorySignalStore;
pub use store::SignalStore;
