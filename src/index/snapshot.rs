//! Index snapshot and claim values.
//!
//! Each key maps to [`GroupIds`]: a single claimant or, when two or more
//! groups claim the same key, the ordered list of claimants in discovery
//! order. The first entry is the primary group.

use crate::core::error::IndexError;
use crate::index::key::{GroupId, NormalizedKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Groups claiming one key.
///
/// `Multi` always holds at least two distinct ids. Serialized as a plain
/// list so the shape never has to be inferred from content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GroupId>", into = "Vec<GroupId>")]
pub enum GroupIds {
    /// Exactly one claimant.
    Single(GroupId),
    /// Conflict: two or more claimants, first claimant first.
    Multi(Vec<GroupId>),
}

impl GroupIds {
    /// The primary (first) claimant. None only for a hand-built empty
    /// `Multi`, which deserialization and `claim` never produce.
    pub fn primary(&self) -> Option<&GroupId> {
        self.as_slice().first()
    }

    /// All claimants in order.
    pub fn as_slice(&self) -> &[GroupId] {
        match self {
            Self::Single(id) => std::slice::from_ref(id),
            Self::Multi(ids) => ids,
        }
    }

    /// Owned list of claimants in order.
    pub fn to_vec(&self) -> Vec<GroupId> {
        self.as_slice().to_vec()
    }

    /// Number of claimants.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Check if there is no claimant.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Check if the key is claimed by more than one group.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    /// Check if a group claims this key.
    pub fn contains(&self, id: &GroupId) -> bool {
        self.as_slice().contains(id)
    }

    /// Append a claimant. Returns false if it was already present.
    pub fn push(&mut self, id: GroupId) -> bool {
        if self.contains(&id) {
            return false;
        }
        match self {
            Self::Single(first) => {
                *self = Self::Multi(vec![first.clone(), id]);
            }
            Self::Multi(ids) => ids.push(id),
        }
        true
    }

    /// Compare claimant sets, ignoring order.
    pub fn same_members(&self, other: &GroupIds) -> bool {
        self.len() == other.len() && self.as_slice().iter().all(|id| other.contains(id))
    }
}

impl TryFrom<Vec<GroupId>> for GroupIds {
    type Error = IndexError;

    fn try_from(mut ids: Vec<GroupId>) -> Result<Self, Self::Error> {
        let mut seen = Vec::with_capacity(ids.len());
        ids.retain(|id| {
            if seen.contains(id) {
                false
            } else {
                seen.push(id.clone());
                true
            }
        });
        match ids.len() {
            0 => Err(IndexError::InvalidSnapshot {
                message: "key has an empty claimant list".to_string(),
            }),
            1 => Ok(Self::Single(ids.remove(0))),
            _ => Ok(Self::Multi(ids)),
        }
    }
}

impl From<GroupIds> for Vec<GroupId> {
    fn from(ids: GroupIds) -> Self {
        match ids {
            GroupIds::Single(id) => vec![id],
            GroupIds::Multi(ids) => ids,
        }
    }
}

impl From<GroupId> for GroupIds {
    fn from(id: GroupId) -> Self {
        Self::Single(id)
    }
}

/// Result of claiming a key for a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First claimant of the key.
    New,
    /// Key was already claimed by other groups (listed before the append).
    Conflict { existing: Vec<GroupId> },
    /// This group already claimed the key.
    Duplicate,
}

/// Full mapping from normalized key to claimants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSnapshot {
    entries: HashMap<NormalizedKey, GroupIds>,
}

impl IndexSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Claimants of a key.
    pub fn get(&self, key: &NormalizedKey) -> Option<&GroupIds> {
        self.entries.get(key)
    }

    /// Check if a key is indexed.
    pub fn contains_key(&self, key: &NormalizedKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Claimant list of a key, empty if absent.
    pub fn group_ids(&self, key: &NormalizedKey) -> Vec<GroupId> {
        self.entries.get(key).map(GroupIds::to_vec).unwrap_or_default()
    }

    /// Record that `group` claims `key`, appending to any existing claimants.
    pub fn claim(&mut self, key: NormalizedKey, group: &GroupId) -> Claim {
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(key, GroupIds::Single(group.clone()));
                Claim::New
            }
            Some(ids) => {
                let existing = ids.to_vec();
                if ids.push(group.clone()) {
                    Claim::Conflict { existing }
                } else {
                    Claim::Duplicate
                }
            }
        }
    }

    /// Set the claimants of a key wholesale.
    pub fn insert(&mut self, key: NormalizedKey, ids: GroupIds) -> Option<GroupIds> {
        self.entries.insert(key, ids)
    }

    /// Drop a key.
    pub fn remove(&mut self, key: &NormalizedKey) -> Option<GroupIds> {
        self.entries.remove(key)
    }

    /// Iterate over all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&NormalizedKey, &GroupIds)> {
        self.entries.iter()
    }

    /// All keys in sorted order.
    pub fn sorted_keys(&self) -> Vec<NormalizedKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of keys claimed by more than one group.
    pub fn conflict_count(&self) -> usize {
        self.entries.values().filter(|ids| ids.is_conflict()).count()
    }
}

impl FromIterator<(NormalizedKey, GroupIds)> for IndexSnapshot {
    fn from_iter<I: IntoIterator<Item = (NormalizedKey, GroupIds)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> NormalizedKey {
        NormalizedKey::new(0, k)
    }

    #[test]
    fn test_single_becomes_multi_on_second_claim() {
        let mut snapshot = IndexSnapshot::new();
        assert_eq!(snapshot.claim(key("a"), &"G1".into()), Claim::New);
        assert_eq!(
            snapshot.claim(key("a"), &"G2".into()),
            Claim::Conflict {
                existing: vec!["G1".into()]
            }
        );
        let ids = snapshot.get(&key("a")).unwrap();
        assert!(ids.is_conflict());
        assert_eq!(ids.primary(), Some(&GroupId::from("G1")));
        assert_eq!(ids.to_vec(), vec![GroupId::from("G1"), GroupId::from("G2")]);
    }

    #[test]
    fn test_empty_multi_has_no_primary() {
        let ids = GroupIds::Multi(Vec::new());
        assert_eq!(ids.primary(), None);
        assert!(ids.is_empty());
    }

    #[test]
    fn test_duplicate_claim_is_not_a_conflict() {
        let mut snapshot = IndexSnapshot::new();
        snapshot.claim(key("a"), &"G1".into());
        assert_eq!(snapshot.claim(key("a"), &"G1".into()), Claim::Duplicate);
        assert!(!snapshot.get(&key("a")).unwrap().is_conflict());
    }

    #[test]
    fn test_same_members_ignores_order() {
        let ab = GroupIds::try_from(vec![GroupId::from("a"), GroupId::from("b")]).unwrap();
        let ba = GroupIds::try_from(vec![GroupId::from("b"), GroupId::from("a")]).unwrap();
        let a = GroupIds::from(GroupId::from("a"));
        assert!(ab.same_members(&ba));
        assert!(!ab.same_members(&a));
    }

    #[test]
    fn test_try_from_rejects_empty() {
        assert!(GroupIds::try_from(Vec::<GroupId>::new()).is_err());
    }

    #[test]
    fn test_try_from_single_element_is_single() {
        let ids = GroupIds::try_from(vec![GroupId::from("a"), GroupId::from("a")]).unwrap();
        assert_eq!(ids, GroupIds::Single("a".into()));
    }

    #[test]
    fn test_serialized_as_list() {
        let mut snapshot = IndexSnapshot::new();
        snapshot.claim(key("a"), &"G1".into());
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"0:a":["G1"]}"#);
        let back: IndexSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_deserialize_rejects_empty_list() {
        let result: Result<IndexSnapshot, _> = serde_json::from_str(r#"{"0:a":[]}"#);
        assert!(result.is_err());
    }
}
