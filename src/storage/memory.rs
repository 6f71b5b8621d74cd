//! In-process storage collaborators.

use super::{IndexStore, InterimStore, InvalidationTokens};
use crate::core::error::IndexResult;
use crate::core::time::{Clock, Timestamp};
use crate::index::diff::KeyChanges;
use crate::index::interim::InterimEntry;
use crate::index::key::NormalizedKey;
use crate::index::snapshot::{GroupIds, IndexSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot store kept in memory, with an optional lagging replica.
///
/// Writes are applied incrementally under one write lock: deletions come
/// from the change set, then every key whose stored claimant list differs
/// from the new snapshot is upserted. The change set treats a reordered
/// claimant list as unchanged, but the order decides the primary group, so
/// the upsert compares lists, not sets. Without lag the replica is
/// refreshed on every write; with lag it only catches up on
/// [`MemoryStore::sync_replicas`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    primary: RwLock<IndexSnapshot>,
    replica: RwLock<IndexSnapshot>,
    lagged: bool,
}

impl MemoryStore {
    /// Create an empty store whose replica is always current.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose replica only updates on `sync_replicas`.
    pub fn with_replication_lag() -> Self {
        Self {
            lagged: true,
            ..Self::default()
        }
    }

    /// Create a store seeded with a snapshot on both primary and replica.
    pub fn with_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            primary: RwLock::new(snapshot.clone()),
            replica: RwLock::new(snapshot),
            lagged: false,
        }
    }

    /// Copy the primary onto the replica.
    pub fn sync_replicas(&self) {
        let primary = self.primary.read().clone();
        *self.replica.write() = primary;
    }
}

impl IndexStore for MemoryStore {
    fn read(&self, read_latest: bool) -> IndexResult<IndexSnapshot> {
        if read_latest {
            Ok(self.primary.read().clone())
        } else {
            Ok(self.replica.read().clone())
        }
    }

    fn get(&self, key: &NormalizedKey) -> IndexResult<Option<GroupIds>> {
        Ok(self.replica.read().get(key).cloned())
    }

    fn write(&self, snapshot: &IndexSnapshot, changes: &KeyChanges) -> IndexResult<()> {
        let mut primary = self.primary.write();
        for key in changes.del.keys() {
            primary.remove(key);
        }
        for (key, ids) in snapshot.iter() {
            if primary.get(key) != Some(ids) {
                primary.insert(key.clone(), ids.clone());
            }
        }
        if !self.lagged {
            *self.replica.write() = primary.clone();
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Slot {
    entry: InterimEntry,
    expires_at: Timestamp,
}

/// Interim overlay slots with TTL expiry against a clock.
pub struct MemoryInterimStore {
    slots: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl MemoryInterimStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.slots
            .lock()
            .values()
            .filter(|slot| !slot.expires_at.is_at_or_before(now))
            .count()
    }

    /// Check if no live slot exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InterimStore for MemoryInterimStore {
    fn get(&self, slot: &str, _read_latest: bool) -> IndexResult<Option<InterimEntry>> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        match slots.get(slot) {
            Some(s) if s.expires_at.is_at_or_before(now) => {
                slots.remove(slot);
                Ok(None)
            }
            Some(s) => Ok(Some(s.entry.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, slot: &str, entry: InterimEntry, ttl: Duration) -> IndexResult<()> {
        let expires_at = self.clock.now().add(ttl);
        self.slots
            .lock()
            .insert(slot.to_string(), Slot { entry, expires_at });
        Ok(())
    }

    fn delete(&self, slot: &str) -> IndexResult<()> {
        self.slots.lock().remove(slot);
        Ok(())
    }

    fn delete_if_unchanged(&self, slot: &str, timestamp: Timestamp) -> IndexResult<bool> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        match slots.get(slot) {
            Some(s) if !s.expires_at.is_at_or_before(now) && s.entry.timestamp == timestamp => {
                slots.remove(slot);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Invalidation tokens held as per-key counters.
#[derive(Debug, Default)]
pub struct MemoryTokens {
    tokens: Mutex<HashMap<String, u64>>,
}

impl MemoryTokens {
    /// Create an empty token table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token for a key (0 if never touched).
    pub fn value(&self, key: &str) -> u64 {
        self.tokens.lock().get(key).copied().unwrap_or(0)
    }
}

impl InvalidationTokens for MemoryTokens {
    fn touch(&self, key: &str) -> IndexResult<()> {
        *self.tokens.lock().entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::index::diff::diff;
    use crate::index::key::GroupId;

    fn snapshot_with(keys: &[&str]) -> IndexSnapshot {
        let mut snapshot = IndexSnapshot::new();
        for k in keys {
            snapshot.claim(NormalizedKey::new(0, k), &GroupId::from("g"));
        }
        snapshot
    }

    #[test]
    fn test_incremental_write_matches_snapshot() {
        let old = snapshot_with(&["a", "b"]);
        let store = MemoryStore::with_snapshot(old.clone());
        let new = snapshot_with(&["b", "c"]);
        let changes = diff(&old, &new).keys;
        store.write(&new, &changes).unwrap();
        assert_eq!(store.read(true).unwrap(), new);
    }

    #[test]
    fn test_write_applies_reordered_claimants() {
        let mut old = IndexSnapshot::new();
        old.claim(NormalizedKey::new(0, "k"), &GroupId::from("a"));
        old.claim(NormalizedKey::new(0, "k"), &GroupId::from("b"));
        let mut new = IndexSnapshot::new();
        new.claim(NormalizedKey::new(0, "k"), &GroupId::from("b"));
        new.claim(NormalizedKey::new(0, "k"), &GroupId::from("a"));

        let store = MemoryStore::with_snapshot(old.clone());
        let changes = diff(&old, &new).keys;
        assert!(changes.is_empty());
        store.write(&new, &changes).unwrap();

        assert_eq!(store.read(true).unwrap(), new);
        assert_eq!(
            store.get(&NormalizedKey::new(0, "k")).unwrap().unwrap().to_vec(),
            vec![GroupId::from("b"), GroupId::from("a")]
        );
    }

    #[test]
    fn test_lagged_replica_hides_writes_until_synced() {
        let store = MemoryStore::with_replication_lag();
        let new = snapshot_with(&["a"]);
        let changes = diff(&IndexSnapshot::new(), &new).keys;
        store.write(&new, &changes).unwrap();

        assert!(store.read(false).unwrap().is_empty());
        assert_eq!(store.read(true).unwrap().len(), 1);
        store.sync_replicas();
        assert_eq!(store.read(false).unwrap().len(), 1);
    }

    #[test]
    fn test_interim_slot_expires() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs_f64(1000.0)));
        let store = MemoryInterimStore::new(clock.clone());
        let entry = InterimEntry::new(clock.now(), HashMap::new());
        store.set("slot", entry, Duration::from_secs(10)).unwrap();
        assert!(store.get("slot", true).unwrap().is_some());

        clock.advance(Duration::from_secs(10));
        assert!(store.get("slot", true).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_conditional_delete_spares_replaced_entry() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs_f64(1000.0)));
        let store = MemoryInterimStore::new(clock.clone());
        let read = clock.now();
        store
            .set("slot", InterimEntry::new(read, HashMap::new()), Duration::from_secs(60))
            .unwrap();

        clock.advance(Duration::from_secs(1));
        store
            .set("slot", InterimEntry::new(clock.now(), HashMap::new()), Duration::from_secs(60))
            .unwrap();

        assert!(!store.delete_if_unchanged("slot", read).unwrap());
        assert!(store.get("slot", true).unwrap().is_some());
        assert!(store.delete_if_unchanged("slot", clock.now()).unwrap());
        assert!(store.get("slot", true).unwrap().is_none());
    }

    #[test]
    fn test_tokens_are_monotonic() {
        let tokens = MemoryTokens::new();
        assert_eq!(tokens.value("k"), 0);
        tokens.touch("k").unwrap();
        tokens.touch("k").unwrap();
        assert_eq!(tokens.value("k"), 2);
    }
}
