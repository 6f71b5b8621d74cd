//! Snapshot diffing.
//!
//! Compares two snapshots key by key. Claimant lists are compared as sets:
//! reordering the claimants of a key is not a modification. The touched
//! group set is exact and scopes downstream statistics invalidation.

use crate::index::key::{GroupId, NormalizedKey};
use crate::index::snapshot::{GroupIds, IndexSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Claimants of one key before and after a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChange {
    /// Claimants before (empty for additions).
    pub old: Vec<GroupId>,
    /// Claimants after (empty for deletions).
    pub new: Vec<GroupId>,
}

impl KeyChange {
    fn added(new: &GroupIds) -> Self {
        Self {
            old: Vec::new(),
            new: new.to_vec(),
        }
    }

    fn deleted(old: &GroupIds) -> Self {
        Self {
            old: old.to_vec(),
            new: Vec::new(),
        }
    }

    fn modified(old: &GroupIds, new: &GroupIds) -> Self {
        Self {
            old: old.to_vec(),
            new: new.to_vec(),
        }
    }
}

/// Kind of change recorded for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Key is new.
    Add,
    /// Key disappeared.
    Del,
    /// Claimant set changed.
    Mod,
}

/// Per-key changes, partitioned by kind. A key is in at most one map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChanges {
    /// Keys absent from the old snapshot.
    pub add: BTreeMap<NormalizedKey, KeyChange>,
    /// Keys absent from the new snapshot.
    pub del: BTreeMap<NormalizedKey, KeyChange>,
    /// Keys whose claimant set changed.
    #[serde(rename = "mod")]
    pub modified: BTreeMap<NormalizedKey, KeyChange>,
}

impl KeyChanges {
    /// Total number of changed keys.
    pub fn len(&self) -> usize {
        self.add.len() + self.del.len() + self.modified.len()
    }

    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every change with its kind.
    pub fn iter(&self) -> impl Iterator<Item = (ChangeKind, &NormalizedKey, &KeyChange)> {
        self.add
            .iter()
            .map(|(k, c)| (ChangeKind::Add, k, c))
            .chain(self.del.iter().map(|(k, c)| (ChangeKind::Del, k, c)))
            .chain(self.modified.iter().map(|(k, c)| (ChangeKind::Mod, k, c)))
    }
}

/// Outcome of comparing two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Changed keys.
    pub keys: KeyChanges,
    /// Every group id gained or lost by any changed key.
    pub values: BTreeSet<GroupId>,
}

impl DiffResult {
    /// Check if the snapshots were equivalent.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Compare two snapshots. Linear in `|old| + |new|`.
pub fn diff(old: &IndexSnapshot, new: &IndexSnapshot) -> DiffResult {
    let mut result = DiffResult::default();

    for (key, new_ids) in new.iter() {
        match old.get(key) {
            None => {
                result.values.extend(new_ids.as_slice().iter().cloned());
                result.keys.add.insert(key.clone(), KeyChange::added(new_ids));
            }
            Some(old_ids) if !old_ids.same_members(new_ids) => {
                // Only gained or lost claimants are touched.
                for id in old_ids.as_slice() {
                    if !new_ids.contains(id) {
                        result.values.insert(id.clone());
                    }
                }
                for id in new_ids.as_slice() {
                    if !old_ids.contains(id) {
                        result.values.insert(id.clone());
                    }
                }
                result
                    .keys
                    .modified
                    .insert(key.clone(), KeyChange::modified(old_ids, new_ids));
            }
            Some(_) => {}
        }
    }

    for (key, old_ids) in old.iter() {
        if !new.contains_key(key) {
            result.values.extend(old_ids.as_slice().iter().cloned());
            result.keys.del.insert(key.clone(), KeyChange::deleted(old_ids));
        }
    }

    result
}
