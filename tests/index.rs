//! Rebuild, overlay and lookup behavior of the assembled index.

mod common;

use common::{group, harness, harness_with, ids, Harness, T0};
use message_index::core::error::{IndexError, IndexResult};
use message_index::core::time::Timestamp;
use message_index::groups::{AggregateGroup, MessageGroup, StaticGroup};
use message_index::index::interim::Reconciliation;
use message_index::index::{GroupId, GroupIds, IndexSettings, MessageIndex, NormalizedKey};
use message_index::jobs::{self, IndexTask};
use message_index::metrics::names;
use message_index::storage::{IndexLock, IndexStore, MemoryStore};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

// ============================================================================
// Test groups
// ============================================================================

/// Group whose key enumeration fails.
struct BrokenGroup {
    id: GroupId,
}

impl MessageGroup for BrokenGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn namespace(&self) -> i32 {
        8
    }

    fn keys(&self) -> IndexResult<Vec<String>> {
        Err(IndexError::group_keys(self.id.as_str(), "definition file unreadable"))
    }
}

/// Group that rebuilds the index while being enumerated.
struct RecursiveGroup {
    id: GroupId,
    index: OnceLock<Weak<MessageIndex>>,
    inner: Mutex<Option<IndexResult<usize>>>,
}

impl MessageGroup for RecursiveGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn namespace(&self) -> i32 {
        8
    }

    fn keys(&self) -> IndexResult<Vec<String>> {
        if let Some(index) = self.index.get().and_then(Weak::upgrade) {
            *self.inner.lock() = Some(index.rebuild(None).map(|s| s.len()));
        }
        Ok(vec!["Loop".to_string()])
    }
}

/// Group that records an edit in the overlay while being enumerated, as if
/// an edit landed between the rebuild's snapshot read and its write.
struct EditingGroup {
    id: GroupId,
    index: OnceLock<Weak<MessageIndex>>,
    clock: OnceLock<Arc<message_index::core::time::ManualClock>>,
}

impl MessageGroup for EditingGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn namespace(&self) -> i32 {
        8
    }

    fn keys(&self) -> IndexResult<Vec<String>> {
        if let (Some(index), Some(clock)) = (self.index.get().and_then(Weak::upgrade), self.clock.get()) {
            clock.advance(Duration::from_secs(1));
            let late = StaticGroup::new("late", 8, Vec::<String>::new());
            index.store_interim(&late, ["Late-arrival"])?;
        }
        Ok(vec!["Stable".to_string()])
    }
}

fn key(namespace: i32, raw: &str) -> NormalizedKey {
    NormalizedKey::new(namespace, raw)
}

// ============================================================================
// Rebuild
// ============================================================================

#[test]
fn rebuild_publishes_every_group() {
    let h = harness(vec![
        group("core", 8, &["Mainpage", "Edit"]),
        group("ext-foo", 8, &["Foo-desc"]),
    ]);

    let snapshot = h.index.rebuild(None).unwrap();

    assert_eq!(snapshot.len(), 3);
    assert_eq!(h.store.read(true).unwrap(), snapshot);
    assert_eq!(h.index.lookup_group_ids(8, "Mainpage"), ids(&["core"]));
    assert_eq!(h.index.lookup_group_ids(8, "foo-desc"), ids(&["ext-foo"]));
    assert!(!h.lock.is_held());
}

#[test]
fn conflicting_claims_keep_both_groups_in_order() {
    let h = harness(vec![
        group("groupA", 0, &["ExampleKey"]),
        group("groupB", 0, &["ExampleKey"]),
    ]);

    let report = h.index.rebuild_with_report(None).unwrap();

    let example = NormalizedKey::from_normalized("0:exampleKey");
    let value = report.snapshot.get(&example).unwrap();
    assert!(matches!(value, GroupIds::Multi(_)));
    assert_eq!(value.to_vec(), ids(&["groupA", "groupB"]));

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].existing, ids(&["groupA"]));
    assert_eq!(report.conflicts[0].claimant, GroupId::from("groupB"));
    assert!(!report.conflicts[0].ignored);

    assert_eq!(
        h.index.primary_group_id(0, "ExampleKey"),
        Some(GroupId::from("groupA"))
    );
    assert_eq!(
        h.index.lookup_group_ids(0, "exampleKey"),
        ids(&["groupA", "groupB"])
    );
}

#[test]
fn missing_group_contributes_nothing() {
    let h = harness(vec![
        group("core", 8, &["Shared"]),
        Arc::new(StaticGroup::missing("retired", 8)),
    ]);

    let report = h.index.rebuild_with_report(None).unwrap();

    assert_eq!(report.snapshot.len(), 1);
    assert!(report.conflicts.is_empty());
    assert!(report
        .snapshot
        .iter()
        .all(|(_, ids)| !ids.contains(&GroupId::from("retired"))));
}

#[test]
fn meta_groups_run_after_normal_groups_without_warnings() {
    let core = group("core", 8, &["Mainpage"]);
    let ext = group("ext", 8, &["Ext-name"]);
    let all: Arc<dyn MessageGroup> = Arc::new(AggregateGroup::new(
        "all",
        8,
        vec![core.clone(), ext.clone()],
    ));
    // Registered first, still enumerated last.
    let h = harness(vec![all, core, ext]);

    let report = h.index.rebuild_with_report(None).unwrap();

    assert_eq!(h.index.lookup_group_ids(8, "Mainpage"), ids(&["core", "all"]));
    assert_eq!(report.conflicts.len(), 2);
    assert!(report.conflicts.iter().all(|c| c.ignored));
    assert_eq!(report.reported_conflicts().count(), 0);
}

#[test]
fn duplicate_key_within_one_group_is_not_a_conflict() {
    let h = harness(vec![group("core", 8, &["Edit", "edit"])]);
    let report = h.index.rebuild_with_report(None).unwrap();
    assert_eq!(report.snapshot.len(), 1);
    assert!(report.conflicts.is_empty());
    assert_eq!(h.index.lookup_group_ids(8, "Edit"), ids(&["core"]));
}

#[test]
fn failing_group_aborts_without_writing() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    h.index.rebuild(None).unwrap();
    h.queue.drain();

    h.registry.register(Arc::new(BrokenGroup {
        id: GroupId::from("broken"),
    }));
    let before = h.store.read(true).unwrap();
    let token_before = h.tokens.value(&h.index.invalidation_key());

    let err = h.index.rebuild(None).unwrap_err();

    assert!(matches!(err, IndexError::GroupKeys { .. }));
    assert_eq!(h.store.read(true).unwrap(), before);
    assert_eq!(h.tokens.value(&h.index.invalidation_key()), token_before);
    assert!(h.queue.is_empty());
    assert!(!h.lock.is_held());
    assert_eq!(
        h.index
            .metrics()
            .registry()
            .counter_get(names::REBUILD_FAILURES_TOTAL),
        1
    );
}

#[test]
fn lock_contention_fails_the_rebuild() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    assert!(h.lock.acquire().unwrap());

    let err = h.index.rebuild(None).unwrap_err();

    assert!(matches!(err, IndexError::LockUnavailable { .. }));
    assert!(err.is_retriable());
    assert!(h.store.read(true).unwrap().is_empty());
    assert!(h.queue.is_empty());
    assert!(h.observer.is_empty());
    assert_eq!(h.tokens.value(&h.index.invalidation_key()), 0);

    h.lock.release().unwrap();
    assert_eq!(h.index.rebuild(None).unwrap().len(), 1);
}

#[test]
fn reentrant_rebuild_is_skipped() {
    let recursive = Arc::new(RecursiveGroup {
        id: GroupId::from("recursive"),
        index: OnceLock::new(),
        inner: Mutex::new(None),
    });
    let h = harness(vec![
        group("core", 8, &["Mainpage"]),
        recursive.clone() as Arc<dyn MessageGroup>,
    ]);
    let _ = recursive.index.set(Arc::downgrade(&h.index));

    let snapshot = h.index.rebuild(None).unwrap();

    assert_eq!(snapshot.len(), 2);
    assert!(matches!(*recursive.inner.lock(), Some(Ok(0))));
    assert_eq!(
        h.index
            .metrics()
            .registry()
            .counter_get(names::REBUILDS_SKIPPED_TOTAL),
        1
    );
    assert_eq!(h.tokens.value(&h.index.invalidation_key()), 1);
    assert!(!h.index.is_rebuilding());
}

#[test]
fn rebuild_after_reentrancy_runs_normally() {
    let recursive = Arc::new(RecursiveGroup {
        id: GroupId::from("recursive"),
        index: OnceLock::new(),
        inner: Mutex::new(None),
    });
    let h = harness(vec![recursive.clone() as Arc<dyn MessageGroup>]);
    let _ = recursive.index.set(Arc::downgrade(&h.index));

    h.index.rebuild(None).unwrap();
    let second = h.index.rebuild_with_report(None).unwrap();
    assert!(!second.skipped);
}

#[test]
fn rebuild_diffs_against_latest_state_despite_replica_lag() {
    let h = harness_with(
        vec![group("core", 8, &["Mainpage"])],
        MemoryStore::with_replication_lag(),
        IndexSettings::default(),
    );

    let first = h.index.rebuild_with_report(None).unwrap();
    assert_eq!(first.diff.keys.add.len(), 1);
    assert!(h.store.read(false).unwrap().is_empty());

    let second = h.index.rebuild_with_report(None).unwrap();
    assert!(second.diff.is_empty());
}

#[test]
fn rebuild_clears_lookup_cache() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    assert!(h.index.lookup_group_ids(8, "Mainpage").is_empty());

    h.index.rebuild(None).unwrap();

    assert_eq!(h.index.lookup_group_ids(8, "Mainpage"), ids(&["core"]));
}

#[test]
fn reordered_claimants_change_the_stored_primary() {
    let h = harness(vec![
        group("A", 0, &["Shared"]),
        group("B", 0, &["Shared"]),
    ]);
    h.index.rebuild(None).unwrap();
    assert_eq!(h.index.primary_group_id(0, "Shared"), Some(GroupId::from("A")));

    // Re-registering A moves it behind B in enumeration order.
    h.registry.unregister(&GroupId::from("A"));
    h.registry.register(group("A", 0, &["Shared"]));
    let report = h.index.rebuild_with_report(None).unwrap();

    let shared = NormalizedKey::new(0, "Shared");
    assert!(report.diff.is_empty());
    assert_eq!(report.snapshot.group_ids(&shared), ids(&["B", "A"]));
    assert_eq!(h.index.snapshot(true).unwrap().group_ids(&shared), ids(&["B", "A"]));
    assert_eq!(h.index.lookup_group_ids(0, "Shared"), ids(&["B", "A"]));
    assert_eq!(h.index.primary_group_id(0, "Shared"), Some(GroupId::from("B")));
}

// ============================================================================
// Post-commit side effects
// ============================================================================

#[test]
fn rebuild_touches_token_and_notifies_changes() {
    let h = harness(vec![
        group("core", 8, &["Mainpage", "Edit"]),
        group("ext", 8, &["Ext-name"]),
    ]);
    h.index.rebuild(None).unwrap();
    h.queue.drain();

    h.registry.unregister(&GroupId::from("ext"));
    h.registry.register(group("ext2", 8, &["Edit"]));
    let report = h.index.rebuild_with_report(None).unwrap();

    assert_eq!(h.tokens.value(&h.index.invalidation_key()), 2);
    assert_eq!(report.diff.values, ids(&["ext", "ext2"]).into_iter().collect());

    let changes = h.observer.changes();
    let edit = changes
        .iter()
        .rev()
        .find(|c| c.key.key == "edit")
        .unwrap();
    assert_eq!(edit.key.namespace, 8);
    assert_eq!(edit.old, ids(&["core"]));
    assert_eq!(edit.new, ids(&["core", "ext2"]));
    let removed = changes
        .iter()
        .rev()
        .find(|c| c.key.key == "ext-name")
        .unwrap();
    assert!(removed.new.is_empty());

    let tasks = h.queue.drain();
    assert_eq!(
        tasks,
        vec![IndexTask::RefreshGroupStats {
            group_ids: ids(&["ext", "ext2"]).into_iter().collect(),
        }]
    );
}

#[test]
fn unchanged_rebuild_enqueues_nothing() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    h.index.rebuild(None).unwrap();
    h.queue.drain();
    let notified = h.observer.len();

    let report = h.index.rebuild_with_report(None).unwrap();

    assert!(report.diff.is_empty());
    assert!(h.queue.is_empty());
    assert_eq!(h.observer.len(), notified);
}

// ============================================================================
// Interim overlay
// ============================================================================

#[test]
fn interim_keys_resolve_before_rebuild() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    h.index.rebuild(None).unwrap();

    h.index
        .store_interim_for(&GroupId::from("core"), ["Brand-new"])
        .unwrap();

    assert_eq!(h.index.lookup_group_ids(8, "Brand-new"), ids(&["core"]));
}

#[test]
fn interim_overrides_stale_snapshot() {
    let h = harness(vec![group("core", 8, &["Moved"])]);
    h.index.rebuild(None).unwrap();

    let target = StaticGroup::new("ext", 8, Vec::<String>::new());
    h.index.store_interim(&target, ["Moved"]).unwrap();

    assert_eq!(h.index.lookup_group_ids(8, "Moved"), ids(&["ext"]));
}

#[test]
fn disjoint_interim_merges_are_unioned() {
    let h = harness(vec![]);
    let a = StaticGroup::new("a", 8, Vec::<String>::new());
    let b = StaticGroup::new("b", 1198, Vec::<String>::new());

    h.index.store_interim(&a, ["One", "Two"]).unwrap();
    h.clock.advance(Duration::from_millis(5));
    h.index.store_interim(&b, ["Three"]).unwrap();

    let entry = h.index.interim().unwrap().unwrap();
    assert_eq!(entry.new_keys.len(), 3);
    assert_eq!(entry.new_keys[&key(8, "one")], GroupId::from("a"));
    assert_eq!(entry.new_keys[&key(1198, "three")], GroupId::from("b"));
    assert_eq!(entry.timestamp, Timestamp::from_secs_f64(T0 + 0.005));
}

#[test]
fn overlay_captured_by_rebuild_is_purged() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    let core = StaticGroup::new("core", 8, Vec::<String>::new());
    h.index.store_interim(&core, ["Mainpage"]).unwrap();

    // Same instant as the rebuild start: the boundary is inclusive.
    let report = h.index.rebuild_with_report(None).unwrap();

    assert_eq!(report.overlay, Some(Reconciliation::Purged { keys: 1 }));
    assert!(h.index.interim().unwrap().is_none());
    assert_eq!(h.queued_rebuilds(), 0);
}

#[test]
fn explicit_purge_timestamp_bounds_the_purge() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    let core = StaticGroup::new("core", 8, Vec::<String>::new());
    h.index.store_interim(&core, ["Mainpage"]).unwrap();

    let earlier = Timestamp::from_secs_f64(T0 - 1.0);
    let report = h.index.rebuild_with_report(Some(earlier)).unwrap();

    assert!(report.overlay_retained());
    assert_eq!(report.purge_timestamp, Some(earlier));
    assert!(h.index.interim().unwrap().is_some());
    assert_eq!(h.queued_rebuilds(), 1);
}

#[test]
fn edit_during_rebuild_survives_and_schedules_one_followup() {
    let editing = Arc::new(EditingGroup {
        id: GroupId::from("editing"),
        index: OnceLock::new(),
        clock: OnceLock::new(),
    });
    let h = harness(vec![editing.clone() as Arc<dyn MessageGroup>]);
    let _ = editing.index.set(Arc::downgrade(&h.index));
    let _ = editing.clock.set(h.clock.clone());

    let report = h.index.rebuild_with_report(None).unwrap();

    assert_eq!(report.purge_timestamp, Some(Timestamp::from_secs_f64(T0)));
    assert_eq!(
        report.overlay,
        Some(Reconciliation::Retained {
            timestamp: Timestamp::from_secs_f64(T0 + 1.0)
        })
    );
    let entry = h.index.interim().unwrap().unwrap();
    assert!(entry.new_keys.contains_key(&key(8, "Late-arrival")));
    assert_eq!(h.queued_rebuilds(), 1);
    assert_eq!(
        h.queue.pending()[0],
        IndexTask::Rebuild {
            purge_timestamp: None
        }
    );
    assert_eq!(
        h.index.lookup_group_ids(8, "Late-arrival"),
        ids(&["late"])
    );
}

#[test]
fn followup_rebuild_purges_retained_overlay() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    let core = StaticGroup::new("core", 8, Vec::<String>::new());
    h.index.store_interim(&core, ["Mainpage"]).unwrap();
    h.index
        .rebuild_with_report(Some(Timestamp::from_secs_f64(T0 - 1.0)))
        .unwrap();

    h.clock.advance(Duration::from_secs(1));
    for task in h.queue.drain() {
        jobs::execute(&h.index, task).unwrap();
    }

    assert!(h.index.interim().unwrap().is_none());
}

// ============================================================================
// Lookup
// ============================================================================

#[test]
fn lookup_of_unknown_key_is_empty() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    h.index.rebuild(None).unwrap();
    assert!(h.index.lookup_group_ids(8, "Nope").is_empty());
    assert_eq!(h.index.primary_group_id(8, "Nope"), None);
}

#[test]
fn namespace_filter_hides_other_namespaces() {
    let settings = IndexSettings {
        message_namespaces: vec![8],
        ..IndexSettings::default()
    };
    let h = harness_with(
        vec![group("core", 8, &["Mainpage"]), group("pages", 0, &["Mainpage"])],
        MemoryStore::new(),
        settings,
    );
    h.index.rebuild(None).unwrap();

    assert_eq!(h.index.lookup_group_ids(8, "Mainpage"), ids(&["core"]));
    assert!(h.index.lookup_group_ids(0, "Mainpage").is_empty());
    assert_eq!(h.index.snapshot(true).unwrap().len(), 2);
}

#[test]
fn lookups_count_answering_tier() {
    let h = harness(vec![group("core", 8, &["Mainpage"])]);
    h.index.rebuild(None).unwrap();

    h.index.lookup_group_ids(8, "Mainpage");
    h.index.lookup_group_ids(8, "Mainpage");

    let registry = h.index.metrics().registry();
    assert_eq!(registry.counter_get(names::LOOKUPS_TOTAL), 2);
    assert_eq!(registry.counter_get(names::LOOKUP_CACHE_HITS_TOTAL), 1);
}

#[test]
fn keys_lists_every_indexed_key() {
    let h: Harness = harness(vec![group("core", 8, &["B", "A"])]);
    h.index.rebuild(None).unwrap();
    assert_eq!(h.index.keys().unwrap(), vec![key(8, "a"), key(8, "b")]);
}
