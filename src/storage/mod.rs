//! Storage collaborators.
//!
//! The index core only depends on the traits in this module. Durable
//! snapshot storage, the interim overlay slot, the rebuild lock and the
//! invalidation tokens can each live in a different backend.
//!
//! # Modules
//!
//! - [`memory`] - in-process implementations (single node, tests)
//! - [`file`] - snapshot file with atomic replacement
//! - [`lock`] - in-process and lock-file rebuild locks
//!
//! # Invariants
//!
//! - **Atomic publish**: `IndexStore::write` replaces the visible snapshot
//!   wholesale; readers never observe a partially written snapshot.
//! - **Read latest**: `read(true)` bypasses any replica or cached copy.

pub mod file;
pub mod lock;
pub mod memory;

use crate::core::error::IndexResult;
use crate::core::time::Timestamp;
use crate::index::diff::KeyChanges;
use crate::index::interim::InterimEntry;
use crate::index::key::NormalizedKey;
use crate::index::snapshot::{GroupIds, IndexSnapshot};
use std::time::Duration;

/// Durable holder of the full index snapshot.
pub trait IndexStore: Send + Sync {
    /// Read the whole snapshot. `read_latest` bypasses replica lag.
    fn read(&self, read_latest: bool) -> IndexResult<IndexSnapshot>;

    /// Claimants of a single key, tolerating replica lag.
    fn get(&self, key: &NormalizedKey) -> IndexResult<Option<GroupIds>> {
        Ok(self.read(false)?.get(key).cloned())
    }

    /// Publish a new snapshot. `changes` lists the keys that differ from the
    /// snapshot returned by the last `read(true)`, for backends that write
    /// incrementally.
    fn write(&self, snapshot: &IndexSnapshot, changes: &KeyChanges) -> IndexResult<()>;
}

/// Short-lived keyed cache holding interim overlay entries.
pub trait InterimStore: Send + Sync {
    /// Read a slot. `read_latest` must observe every completed `set`.
    fn get(&self, slot: &str, read_latest: bool) -> IndexResult<Option<InterimEntry>>;

    /// Replace a slot; it expires after `ttl`.
    fn set(&self, slot: &str, entry: InterimEntry, ttl: Duration) -> IndexResult<()>;

    /// Remove a slot.
    fn delete(&self, slot: &str) -> IndexResult<()>;

    /// Remove a slot only if its entry still carries `timestamp`. Returns
    /// false, leaving the slot alone, if it was replaced or is gone. Must be
    /// atomic with respect to `set`.
    fn delete_if_unchanged(&self, slot: &str, timestamp: Timestamp) -> IndexResult<bool>;
}

/// Mutual exclusion for full rebuilds, shared by every process that
/// rebuilds the same index.
pub trait IndexLock: Send + Sync {
    /// Try to take the lock, waiting up to the backend's timeout.
    /// Returns false if the lock is held elsewhere.
    fn acquire(&self) -> IndexResult<bool>;

    /// Release a lock obtained by `acquire`.
    fn release(&self) -> IndexResult<()>;
}

/// Monotonic change tokens other subsystems poll to detect index changes.
pub trait InvalidationTokens: Send + Sync {
    /// Bump the token for `key`.
    fn touch(&self, key: &str) -> IndexResult<()>;
}

// Re-exports for convenience
pub use file::FileStore;
pub use lock::{FileLock, MemoryLock};
pub use memory::{MemoryInterimStore, MemoryStore, MemoryTokens};
