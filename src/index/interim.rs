//! Interim overlay.
//!
//! Group edits land here immediately, without the rebuild lock, so newly
//! added keys resolve before the next full rebuild. The overlay is one
//! TTL-bound slot holding every key added since the last rebuild and the
//! time of the latest merge.
//!
//! A rebuild deletes the slot only if the slot's timestamp is at or before
//! the rebuild's purge timestamp; a newer slot holds edits the rebuild may
//! have missed and is kept for a follow-up rebuild.

use crate::core::error::IndexResult;
use crate::core::time::{Clock, Timestamp};
use crate::groups::MessageGroup;
use crate::index::key::{GroupId, NormalizedKey};
use crate::storage::InterimStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Well-known slot holding the overlay entry.
pub const INTERIM_SLOT: &str = "message-index:interim";

/// Default lifetime of an overlay entry.
pub const DEFAULT_INTERIM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Keys added since the last rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterimEntry {
    /// Time of the latest merge.
    pub timestamp: Timestamp,
    /// Added keys and the group that added them.
    pub new_keys: HashMap<NormalizedKey, GroupId>,
}

impl InterimEntry {
    /// Create an entry.
    pub fn new(timestamp: Timestamp, new_keys: HashMap<NormalizedKey, GroupId>) -> Self {
        Self {
            timestamp,
            new_keys,
        }
    }

    /// Union with newer keys, producing a fresh entry. `newer` wins for keys
    /// present in both.
    pub fn merged_with(
        &self,
        newer: HashMap<NormalizedKey, GroupId>,
        timestamp: Timestamp,
    ) -> Self {
        let mut new_keys = self.new_keys.clone();
        new_keys.extend(newer);
        Self {
            timestamp,
            new_keys,
        }
    }
}

/// What a rebuild did with the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// No overlay entry existed.
    Empty,
    /// The entry was fully captured by the rebuild and deleted.
    Purged { keys: usize },
    /// The entry is newer than the rebuild and was kept.
    Retained { timestamp: Timestamp },
}

/// Overlay of recently added keys over the full snapshot.
pub struct InterimOverlay {
    store: Arc<dyn InterimStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InterimOverlay {
    /// Create an overlay over a store slot.
    pub fn new(store: Arc<dyn InterimStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record keys just added to `group`.
    ///
    /// Reads the current entry with read-latest semantics, unions the new
    /// keys into it and writes back a fresh entry stamped with the current
    /// time. Concurrent merges are last-write-wins.
    pub fn store_interim<I, S>(&self, group: &dyn MessageGroup, new_keys: I) -> IndexResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let namespace = group.namespace();
        let id = group.id();
        let normalized: HashMap<NormalizedKey, GroupId> = new_keys
            .into_iter()
            .map(|key| (NormalizedKey::new(namespace, key.as_ref()), id.clone()))
            .collect();
        let added = normalized.len();

        let now = self.clock.now();
        let entry = match self.store.get(INTERIM_SLOT, true)? {
            Some(current) => current.merged_with(normalized, now),
            None => InterimEntry::new(now, normalized),
        };
        let total = entry.new_keys.len();
        self.store.set(INTERIM_SLOT, entry, self.ttl)?;

        tracing::debug!(
            group = %id,
            added,
            total,
            timestamp = %now,
            "merged keys into interim overlay"
        );
        Ok(())
    }

    /// Current overlay entry, if any.
    pub fn current(&self, read_latest: bool) -> IndexResult<Option<InterimEntry>> {
        self.store.get(INTERIM_SLOT, read_latest)
    }

    /// Group recorded for a key in the overlay.
    pub fn lookup(&self, key: &NormalizedKey) -> IndexResult<Option<GroupId>> {
        Ok(self
            .current(false)?
            .and_then(|entry| entry.new_keys.get(key).cloned()))
    }

    /// Drop the overlay if a rebuild with the given purge timestamp has
    /// captured it. The boundary is inclusive.
    ///
    /// The delete is conditional on the timestamp that was read, so a merge
    /// landing between the read and the delete survives and is reported as
    /// retained.
    pub fn reconcile(&self, purge_timestamp: Timestamp) -> IndexResult<Reconciliation> {
        loop {
            let entry = match self.current(true)? {
                None => return Ok(Reconciliation::Empty),
                Some(entry) => entry,
            };
            if !entry.timestamp.is_at_or_before(purge_timestamp) {
                return Ok(Reconciliation::Retained {
                    timestamp: entry.timestamp,
                });
            }
            if self
                .store
                .delete_if_unchanged(INTERIM_SLOT, entry.timestamp)?
            {
                return Ok(Reconciliation::Purged {
                    keys: entry.new_keys.len(),
                });
            }
            tracing::debug!(
                read = %entry.timestamp,
                "interim overlay changed during reconciliation, re-reading"
            );
        }
    }
}
