//! Full index rebuild.
//!
//! A rebuild recomputes the snapshot from every registered group and
//! publishes it under the index lock:
//!
//! ```text
//! guard -> lock -> clear cache -> read latest -> enumerate groups -> diff -> write -> unlock
//!       -> touch token -> reconcile overlay -> notify changes -> enqueue stats refresh
//! ```
//!
//! Nothing is written unless the whole new snapshot was computed. Steps
//! after the write are side effects of an already committed snapshot; their
//! failures are logged and do not fail the rebuild.
//!
//! # Re-entrancy
//!
//! A rebuild started from within a rebuild on the same thread (for example
//! from a group's key enumeration) is skipped with a warning and returns an
//! empty report. The guard is per coordinator and per thread, so unrelated
//! call chains on other threads are not affected; those contend on the
//! index lock instead.

use crate::core::error::{IndexError, IndexResult};
use crate::core::time::{Clock, Timestamp};
use crate::groups::{GroupRegistry, MessageGroup};
use crate::index::cache::LookupCache;
use crate::index::diff::{diff, DiffResult};
use crate::index::interim::{InterimOverlay, Reconciliation};
use crate::index::key::{GroupId, NormalizedKey};
use crate::index::snapshot::{Claim, IndexSnapshot};
use crate::jobs::{IndexTask, MembershipObserver, TaskQueue};
use crate::ops::metrics::IndexMetrics;
use crate::storage::{IndexLock, IndexStore, InvalidationTokens};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Two groups claiming the same normalized key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConflict {
    /// Contested key.
    pub key: NormalizedKey,
    /// Claimants recorded before this claim, first claimant first.
    pub existing: Vec<GroupId>,
    /// Group whose claim was appended.
    pub claimant: GroupId,
    /// Claim came from the meta group pass and was not warned about.
    pub ignored: bool,
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    /// Published snapshot (empty if skipped).
    pub snapshot: IndexSnapshot,
    /// Changes against the previous snapshot.
    pub diff: DiffResult,
    /// Every conflicting claim, in enumeration order.
    pub conflicts: Vec<KeyConflict>,
    /// Time spent waiting for the index lock.
    pub lock_wait: Duration,
    /// Time the lock was held.
    pub critical_section: Duration,
    /// Purge point used for overlay reconciliation.
    pub purge_timestamp: Option<Timestamp>,
    /// Overlay outcome; None if reconciliation failed or was not reached.
    pub overlay: Option<Reconciliation>,
    /// The rebuild was skipped because one was already running on this
    /// thread.
    pub skipped: bool,
}

impl RebuildReport {
    /// Report for a skipped re-entrant rebuild.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Conflicts that were warned about.
    pub fn reported_conflicts(&self) -> impl Iterator<Item = &KeyConflict> {
        self.conflicts.iter().filter(|c| !c.ignored)
    }

    /// Check if a follow-up rebuild was needed for a newer overlay.
    pub fn overlay_retained(&self) -> bool {
        matches!(self.overlay, Some(Reconciliation::Retained { .. }))
    }
}

/// Collaborators a coordinator runs against.
pub struct RebuildDeps {
    pub registry: Arc<dyn GroupRegistry>,
    pub store: Arc<dyn IndexStore>,
    pub lock: Arc<dyn IndexLock>,
    pub tokens: Arc<dyn InvalidationTokens>,
    pub queue: Arc<dyn TaskQueue>,
    pub observer: Arc<dyn MembershipObserver>,
    pub overlay: Arc<InterimOverlay>,
    pub cache: Arc<LookupCache>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<IndexMetrics>,
}

/// Runs rebuilds for one index.
pub struct RebuildCoordinator {
    name: String,
    deps: RebuildDeps,
    active: Mutex<HashSet<ThreadId>>,
}

/// Marks the current thread as rebuilding until dropped.
struct ActiveRebuild<'a> {
    active: &'a Mutex<HashSet<ThreadId>>,
    thread: ThreadId,
}

impl<'a> ActiveRebuild<'a> {
    fn enter(active: &'a Mutex<HashSet<ThreadId>>) -> Option<Self> {
        let thread = std::thread::current().id();
        if !active.lock().insert(thread) {
            return None;
        }
        Some(Self { active, thread })
    }
}

impl Drop for ActiveRebuild<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.thread);
    }
}

/// Held index lock, released on drop unless released explicitly.
struct HeldLock<'a> {
    lock: &'a dyn IndexLock,
    index: &'a str,
    released: bool,
}

impl<'a> HeldLock<'a> {
    fn new(lock: &'a dyn IndexLock, index: &'a str) -> Self {
        Self {
            lock,
            index,
            released: false,
        }
    }

    fn release(mut self) -> IndexResult<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release() {
            tracing::error!(index = %self.index, error = %e, "failed to release index lock");
        }
    }
}

impl RebuildCoordinator {
    /// Create a coordinator for the index called `name`.
    pub fn new(name: impl Into<String>, deps: RebuildDeps) -> Self {
        Self {
            name: name.into(),
            deps,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Index identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invalidation token bumped after every committed rebuild.
    pub fn invalidation_key(&self) -> String {
        format!("{}:rebuilt", self.name)
    }

    /// Check if a rebuild is running on the calling thread.
    pub fn is_rebuilding(&self) -> bool {
        self.active.lock().contains(&std::thread::current().id())
    }

    /// Rebuild the index.
    ///
    /// `purge_timestamp` bounds which overlay entry the rebuild may delete;
    /// it defaults to the rebuild's start time.
    pub fn rebuild(&self, purge_timestamp: Option<Timestamp>) -> IndexResult<RebuildReport> {
        let Some(_active) = ActiveRebuild::enter(&self.active) else {
            tracing::warn!(
                index = %self.name,
                "rebuild requested while one is already running on this thread, skipping"
            );
            self.deps.metrics.record_rebuild_skipped();
            return Ok(RebuildReport::skipped());
        };

        let result = self.run(purge_timestamp);
        if result.is_err() {
            self.deps.metrics.record_rebuild_failure();
        }
        result
    }

    fn run(&self, purge_timestamp: Option<Timestamp>) -> IndexResult<RebuildReport> {
        let deps = &self.deps;

        let wait_started = Instant::now();
        if !deps.lock.acquire()? {
            let waited = wait_started.elapsed();
            deps.metrics.record_lock_unavailable();
            return Err(IndexError::lock_unavailable(
                &self.name,
                waited.as_millis() as u64,
            ));
        }
        let lock_wait = wait_started.elapsed();
        let held = HeldLock::new(deps.lock.as_ref(), &self.name);
        tracing::debug!(
            index = %self.name,
            lock_wait_ms = lock_wait.as_millis() as u64,
            "acquired index lock"
        );

        let critical_started = Instant::now();
        let started_at = deps.clock.now();
        deps.cache.clear();

        let old = deps.store.read(true)?;
        let (snapshot, conflicts) = self.build_snapshot()?;
        let changes = diff(&old, &snapshot);
        deps.store.write(&snapshot, &changes.keys)?;

        if let Err(e) = held.release() {
            tracing::error!(index = %self.name, error = %e, "failed to release index lock");
            deps.metrics.record_side_effect_failure();
        }
        let critical_section = critical_started.elapsed();
        tracing::debug!(
            index = %self.name,
            critical_section_ms = critical_section.as_millis() as u64,
            "released index lock"
        );

        // Lookups racing the critical section may have cached pre-commit answers.
        deps.cache.clear();

        let purge = purge_timestamp.unwrap_or(started_at);
        let overlay = self.after_commit(&changes, purge);

        let reported = conflicts.iter().filter(|c| !c.ignored).count();
        deps.metrics.record_conflicts(reported);
        deps.metrics.record_rebuild(
            snapshot.len(),
            snapshot.conflict_count(),
            changes.keys.len(),
            lock_wait,
            critical_section,
        );
        tracing::info!(
            index = %self.name,
            keys = snapshot.len(),
            added = changes.keys.add.len(),
            deleted = changes.keys.del.len(),
            modified = changes.keys.modified.len(),
            conflicts = reported,
            "index rebuilt"
        );

        Ok(RebuildReport {
            snapshot,
            diff: changes,
            conflicts,
            lock_wait,
            critical_section,
            purge_timestamp: Some(purge),
            overlay,
            skipped: false,
        })
    }

    /// Enumerate every registered group into a fresh snapshot. Normal
    /// groups go first so meta groups see their final key set.
    fn build_snapshot(&self) -> IndexResult<(IndexSnapshot, Vec<KeyConflict>)> {
        let (meta, normal): (Vec<_>, Vec<_>) = self
            .deps
            .registry
            .groups()
            .into_iter()
            .partition(|g| g.is_meta());

        let mut snapshot = IndexSnapshot::new();
        let mut conflicts = Vec::new();
        for group in &normal {
            self.index_group(&mut snapshot, group.as_ref(), false, &mut conflicts)?;
        }
        for group in &meta {
            self.index_group(&mut snapshot, group.as_ref(), true, &mut conflicts)?;
        }
        Ok((snapshot, conflicts))
    }

    fn index_group(
        &self,
        snapshot: &mut IndexSnapshot,
        group: &dyn MessageGroup,
        ignore_conflicts: bool,
        conflicts: &mut Vec<KeyConflict>,
    ) -> IndexResult<()> {
        let id = group.id();
        if !group.exists() {
            tracing::warn!(index = %self.name, group = %id, "group does not exist, skipping");
            return Ok(());
        }

        let namespace = group.namespace();
        for raw in group.keys()? {
            let key = NormalizedKey::new(namespace, &raw);
            if let Claim::Conflict { existing } = snapshot.claim(key.clone(), id) {
                if !ignore_conflicts {
                    tracing::warn!(
                        index = %self.name,
                        key = %key,
                        existing = ?existing,
                        claimant = %id,
                        "message key claimed by more than one group"
                    );
                }
                conflicts.push(KeyConflict {
                    key,
                    existing,
                    claimant: id.clone(),
                    ignored: ignore_conflicts,
                });
            }
        }
        Ok(())
    }

    fn after_commit(&self, changes: &DiffResult, purge: Timestamp) -> Option<Reconciliation> {
        let deps = &self.deps;

        if let Err(e) = deps.tokens.touch(&self.invalidation_key()) {
            self.side_effect_failed("touch invalidation token", &e);
        }

        let overlay = match deps.overlay.reconcile(purge) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.side_effect_failed("reconcile interim overlay", &e);
                None
            }
        };
        match &overlay {
            Some(Reconciliation::Purged { keys }) => {
                deps.metrics.record_interim_purged();
                tracing::debug!(index = %self.name, keys, "purged interim overlay");
            }
            Some(Reconciliation::Retained { timestamp }) => {
                deps.metrics.record_interim_retained();
                tracing::info!(
                    index = %self.name,
                    overlay = %timestamp,
                    purge = %purge,
                    "interim overlay is newer than this rebuild, scheduling follow-up"
                );
                match deps.queue.enqueue(IndexTask::Rebuild {
                    purge_timestamp: None,
                }) {
                    Ok(()) => deps.metrics.record_followup(),
                    Err(e) => self.side_effect_failed("enqueue follow-up rebuild", &e),
                }
            }
            Some(Reconciliation::Empty) | None => {}
        }

        for (kind, key, change) in changes.keys.iter() {
            match key.page() {
                Some(page) => deps
                    .observer
                    .membership_changed(&page, &change.old, &change.new),
                None => tracing::warn!(
                    index = %self.name,
                    key = %key,
                    kind = ?kind,
                    "changed key has no page identity, not notified"
                ),
            }
        }

        if !changes.values.is_empty() {
            let task = IndexTask::RefreshGroupStats {
                group_ids: changes.values.clone(),
            };
            if let Err(e) = deps.queue.enqueue(task) {
                self.side_effect_failed("enqueue group statistics refresh", &e);
            }
        }

        overlay
    }

    fn side_effect_failed(&self, step: &str, error: &IndexError) {
        self.deps.metrics.record_side_effect_failure();
        tracing::error!(index = %self.name, step, error = %error, "post-commit step failed");
    }
}
