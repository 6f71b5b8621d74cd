//! Bounded in-process lookup cache.
//!
//! Holds the most recently resolved keys so repeated lookups skip the
//! overlay and backing store. Process-local; cleared wholesale when a
//! rebuild starts and again after it commits.
//!
//! Every clear bumps a generation. A lookup records the generation before
//! reading the lower tiers and caches its answer only if no clear happened
//! meanwhile, so an answer read before a commit is never cached after it.

use crate::index::key::{GroupId, NormalizedKey};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Default number of keys held.
pub const DEFAULT_LOOKUP_CACHE_CAPACITY: usize = 30;

struct CacheState {
    entries: LruCache<NormalizedKey, Vec<GroupId>>,
    generation: u64,
}

/// Least-recently-used map from key to claimant list.
pub struct LookupCache {
    state: Mutex<CacheState>,
}

impl LookupCache {
    /// Create a cache holding up to `capacity` keys (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                generation: 0,
            }),
        }
    }

    /// Cached claimants of a key; refreshes its recency.
    pub fn get(&self, key: &NormalizedKey) -> Option<Vec<GroupId>> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Cache the claimants of a key, evicting the least recently used key
    /// when full.
    pub fn put(&self, key: NormalizedKey, ids: Vec<GroupId>) {
        self.state.lock().entries.put(key, ids);
    }

    /// Current generation; changes on every [`LookupCache::clear`].
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Cache an answer read while the cache was at `generation`. Dropped
    /// if the cache was cleared since. Returns whether it was stored.
    pub fn put_if_current(&self, generation: u64, key: NormalizedKey, ids: Vec<GroupId>) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.entries.put(key, ids);
        true
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.generation = state.generation.wrapping_add(1);
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of keys held.
    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_CACHE_CAPACITY)
    }
}
