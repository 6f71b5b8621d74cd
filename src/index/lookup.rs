//! Key to group resolution.
//!
//! Tiers, in order: the process-local cache, the interim overlay, then the
//! durable store with replica reads allowed. An overlay hit is
//! authoritative because it captures edits newer than the last rebuild.
//!
//! Lookups never fail. A backend error is logged, the lookup falls through
//! to the next tier (or an empty answer), and the degraded answer is not
//! cached. Neither is an answer whose read overlapped a cache clear.

use crate::index::cache::LookupCache;
use crate::index::interim::InterimOverlay;
use crate::index::key::{GroupId, NormalizedKey};
use crate::ops::metrics::{IndexMetrics, LookupSource};
use crate::storage::IndexStore;
use std::collections::HashSet;
use std::sync::Arc;

/// Read path of the index.
pub struct LookupFacade {
    cache: Arc<LookupCache>,
    overlay: Arc<InterimOverlay>,
    store: Arc<dyn IndexStore>,
    namespaces: HashSet<i32>,
    metrics: Arc<IndexMetrics>,
}

impl LookupFacade {
    /// Create a facade. An empty `namespaces` set accepts every namespace.
    pub fn new(
        cache: Arc<LookupCache>,
        overlay: Arc<InterimOverlay>,
        store: Arc<dyn IndexStore>,
        namespaces: impl IntoIterator<Item = i32>,
        metrics: Arc<IndexMetrics>,
    ) -> Self {
        Self {
            cache,
            overlay,
            store,
            namespaces: namespaces.into_iter().collect(),
            metrics,
        }
    }

    /// Check if keys in `namespace` can be indexed at all.
    pub fn is_message_namespace(&self, namespace: i32) -> bool {
        self.namespaces.is_empty() || self.namespaces.contains(&namespace)
    }

    /// Groups claiming `key` in `namespace`, first claimant first. Empty if
    /// the key is unknown.
    pub fn lookup_group_ids(&self, namespace: i32, key: &str) -> Vec<GroupId> {
        if !self.is_message_namespace(namespace) {
            self.metrics.record_lookup(LookupSource::Filtered);
            return Vec::new();
        }
        self.lookup_normalized(&NormalizedKey::new(namespace, key))
    }

    /// Groups claiming an already normalized key.
    pub fn lookup_normalized(&self, key: &NormalizedKey) -> Vec<GroupId> {
        if let Some(ids) = self.cache.get(key) {
            self.metrics.record_lookup(LookupSource::Cache);
            return ids;
        }

        let generation = self.cache.generation();
        let mut degraded = false;
        match self.overlay.lookup(key) {
            Ok(Some(id)) => {
                let ids = vec![id];
                self.cache.put_if_current(generation, key.clone(), ids.clone());
                self.metrics.record_lookup(LookupSource::Interim);
                return ids;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(key = %key, error = %e, "interim overlay lookup failed");
                degraded = true;
            }
        }

        match self.store.get(key) {
            Ok(found) => {
                let ids = found.map(|ids| ids.to_vec()).unwrap_or_default();
                if degraded {
                    self.metrics.record_lookup(LookupSource::Degraded);
                } else {
                    self.cache.put_if_current(generation, key.clone(), ids.clone());
                    self.metrics.record_lookup(LookupSource::Store);
                }
                ids
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "index store lookup failed");
                self.metrics.record_lookup(LookupSource::Degraded);
                Vec::new()
            }
        }
    }

    /// First claimant of `key`, if any.
    pub fn primary_group_id(&self, namespace: i32, key: &str) -> Option<GroupId> {
        self.lookup_group_ids(namespace, key).into_iter().next()
    }

    /// Drop every cached answer.
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}
