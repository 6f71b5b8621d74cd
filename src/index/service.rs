//! The message index as one object.
//!
//! [`MessageIndex`] wires the rebuild coordinator, the interim overlay and
//! the lookup facade over one set of collaborators. The owning process
//! builds it once and shares it by reference; tests build a fresh one per
//! test with in-memory collaborators.

use crate::core::config::IndexConfig;
use crate::core::error::{IndexError, IndexResult};
use crate::core::time::{Clock, SystemClock, Timestamp};
use crate::groups::{GroupRegistry, MessageGroup};
use crate::index::cache::{LookupCache, DEFAULT_LOOKUP_CACHE_CAPACITY};
use crate::index::interim::{InterimEntry, InterimOverlay, DEFAULT_INTERIM_TTL};
use crate::index::key::{GroupId, NormalizedKey};
use crate::index::lookup::LookupFacade;
use crate::index::rebuild::{RebuildCoordinator, RebuildDeps, RebuildReport};
use crate::index::snapshot::IndexSnapshot;
use crate::jobs::{MemoryQueue, MembershipObserver, TaskQueue, TracingObserver};
use crate::ops::metrics::IndexMetrics;
use crate::storage::{
    IndexLock, IndexStore, InterimStore, InvalidationTokens, MemoryInterimStore, MemoryLock,
    MemoryStore, MemoryTokens,
};
use std::sync::Arc;
use std::time::Duration;

/// Tunables of one index.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Index identity.
    pub name: String,
    /// Keys held by the lookup cache.
    pub lookup_cache_capacity: usize,
    /// Overlay lifetime.
    pub interim_ttl: Duration,
    /// Namespaces holding messages; empty accepts all.
    pub message_namespaces: Vec<i32>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            name: "message-index".to_string(),
            lookup_cache_capacity: DEFAULT_LOOKUP_CACHE_CAPACITY,
            interim_ttl: DEFAULT_INTERIM_TTL,
            message_namespaces: Vec::new(),
        }
    }
}

impl From<&IndexConfig> for IndexSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            name: config.name.clone(),
            lookup_cache_capacity: config.lookup_cache_capacity,
            interim_ttl: config.interim_ttl(),
            message_namespaces: config.message_namespaces.clone(),
        }
    }
}

/// External collaborators of an index.
pub struct IndexComponents {
    pub registry: Arc<dyn GroupRegistry>,
    pub store: Arc<dyn IndexStore>,
    pub interim: Arc<dyn InterimStore>,
    pub lock: Arc<dyn IndexLock>,
    pub tokens: Arc<dyn InvalidationTokens>,
    pub queue: Arc<dyn TaskQueue>,
    pub observer: Arc<dyn MembershipObserver>,
    pub clock: Arc<dyn Clock>,
}

impl IndexComponents {
    /// Single-process collaborators: memory store, overlay, lock, tokens and
    /// queue, a logging observer and the system clock.
    pub fn in_memory(registry: Arc<dyn GroupRegistry>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            registry,
            store: Arc::new(MemoryStore::new()),
            interim: Arc::new(MemoryInterimStore::new(Arc::clone(&clock))),
            lock: Arc::new(MemoryLock::default()),
            tokens: Arc::new(MemoryTokens::new()),
            queue: Arc::new(MemoryQueue::new()),
            observer: Arc::new(TracingObserver),
            clock,
        }
    }

    /// Replace the snapshot store.
    pub fn with_store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the rebuild lock.
    pub fn with_lock(mut self, lock: Arc<dyn IndexLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Replace the task queue.
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the membership observer.
    pub fn with_observer(mut self, observer: Arc<dyn MembershipObserver>) -> Self {
        self.observer = observer;
        self
    }
}

/// Message key to group index.
pub struct MessageIndex {
    settings: IndexSettings,
    registry: Arc<dyn GroupRegistry>,
    store: Arc<dyn IndexStore>,
    overlay: Arc<InterimOverlay>,
    lookup: LookupFacade,
    coordinator: RebuildCoordinator,
    metrics: Arc<IndexMetrics>,
}

impl MessageIndex {
    /// Assemble an index over the given collaborators.
    pub fn new(settings: IndexSettings, components: IndexComponents) -> Self {
        let metrics = Arc::new(IndexMetrics::new());
        let cache = Arc::new(LookupCache::new(settings.lookup_cache_capacity));
        let overlay = Arc::new(InterimOverlay::new(
            components.interim,
            Arc::clone(&components.clock),
            settings.interim_ttl,
        ));
        let lookup = LookupFacade::new(
            Arc::clone(&cache),
            Arc::clone(&overlay),
            Arc::clone(&components.store),
            settings.message_namespaces.iter().copied(),
            Arc::clone(&metrics),
        );
        let coordinator = RebuildCoordinator::new(
            settings.name.clone(),
            RebuildDeps {
                registry: Arc::clone(&components.registry),
                store: Arc::clone(&components.store),
                lock: components.lock,
                tokens: components.tokens,
                queue: components.queue,
                observer: components.observer,
                overlay: Arc::clone(&overlay),
                cache,
                clock: components.clock,
                metrics: Arc::clone(&metrics),
            },
        );

        Self {
            settings,
            registry: components.registry,
            store: components.store,
            overlay,
            lookup,
            coordinator,
            metrics,
        }
    }

    /// Index identity.
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Settings the index was built with.
    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Rebuild the index and return the published snapshot.
    ///
    /// A rebuild requested from within a running rebuild on the same thread
    /// returns an empty snapshot without side effects.
    pub fn rebuild(&self, purge_timestamp: Option<Timestamp>) -> IndexResult<IndexSnapshot> {
        Ok(self.rebuild_with_report(purge_timestamp)?.snapshot)
    }

    /// Rebuild the index and return everything the rebuild observed.
    pub fn rebuild_with_report(
        &self,
        purge_timestamp: Option<Timestamp>,
    ) -> IndexResult<RebuildReport> {
        self.coordinator.rebuild(purge_timestamp)
    }

    /// Check if a rebuild is running on the calling thread.
    pub fn is_rebuilding(&self) -> bool {
        self.coordinator.is_rebuilding()
    }

    /// Invalidation token bumped after every committed rebuild.
    pub fn invalidation_key(&self) -> String {
        self.coordinator.invalidation_key()
    }

    /// Make keys just added to `group` resolvable before the next rebuild.
    pub fn store_interim<I, S>(&self, group: &dyn MessageGroup, new_keys: I) -> IndexResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.overlay.store_interim(group, new_keys)?;
        self.metrics.record_interim_merge();
        Ok(())
    }

    /// Like [`MessageIndex::store_interim`], resolving the group by id.
    pub fn store_interim_for<I, S>(&self, group_id: &GroupId, new_keys: I) -> IndexResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let group = self
            .registry
            .groups()
            .into_iter()
            .find(|g| g.id() == group_id)
            .ok_or_else(|| IndexError::UnknownGroup {
                group_id: group_id.to_string(),
            })?;
        self.store_interim(group.as_ref(), new_keys)
    }

    /// Current overlay entry.
    pub fn interim(&self) -> IndexResult<Option<InterimEntry>> {
        self.overlay.current(true)
    }

    /// Groups claiming `key` in `namespace`, first claimant first.
    pub fn lookup_group_ids(&self, namespace: i32, key: &str) -> Vec<GroupId> {
        self.lookup.lookup_group_ids(namespace, key)
    }

    /// First claimant of `key`, if any.
    pub fn primary_group_id(&self, namespace: i32, key: &str) -> Option<GroupId> {
        self.lookup.primary_group_id(namespace, key)
    }

    /// The published snapshot. `read_latest` bypasses replica lag.
    pub fn snapshot(&self, read_latest: bool) -> IndexResult<IndexSnapshot> {
        self.store.read(read_latest)
    }

    /// Every indexed key, sorted.
    pub fn keys(&self) -> IndexResult<Vec<NormalizedKey>> {
        Ok(self.store.read(false)?.sorted_keys())
    }

    /// Index metrics.
    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }
}
