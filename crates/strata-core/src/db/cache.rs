//! Per-repository prepared-statement cache.
//!
//! Entries are keyed by the structural `CacheKey` of a planned query. A key
//! holds at most one entry: insertion is insert-if-absent and a caller that
//! loses the race adopts the entry already present.

use crate::{
    db::query::plan::CacheKey,
    obs::sink::{self, MetricsEvent},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

///
/// CacheEntry
///
/// `Prepared` holds an adapter statement that has not been registered with
/// the backend yet; `Cached` holds the backend's handle once it has.
///

pub enum CacheEntry<P, C> {
    Prepared(Arc<P>),
    Cached(Arc<C>),
}

impl<P, C> Clone for CacheEntry<P, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Prepared(prepared) => Self::Prepared(prepared.clone()),
            Self::Cached(cached) => Self::Cached(cached.clone()),
        }
    }
}

///
/// CacheStats
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

///
/// QueryCache
///

pub struct QueryCache<P, C> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<P, C>>>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P, C> QueryCache<P, C> {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Disabled caches never store entries; every plan is prepared fresh.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<P, C>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert `entry` unless `key` is already present; returns the entry that
    /// ends up stored under `key`.
    pub fn insert_new(&self, key: CacheKey, entry: CacheEntry<P, C>) -> CacheEntry<P, C> {
        if !self.enabled {
            return entry;
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let stored = entries.entry(key).or_insert_with(|| {
            sink::record(MetricsEvent::CacheInsert);
            entry
        });

        stored.clone()
    }

    /// Overwrite an existing entry. Keys evicted in the meantime stay evicted.
    pub fn replace(&self, key: &CacheKey, entry: CacheEntry<P, C>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(key) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    pub fn evict(&self, key: &CacheKey) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            sink::record(MetricsEvent::CacheEvict);
        }

        removed
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    // Stats are best-effort; relaxed ordering is enough.
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        sink::record(MetricsEvent::CacheHit);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        sink::record(MetricsEvent::CacheMiss);
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

impl<P, C> fmt::Debug for QueryCache<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

///
/// ErasedCache
/// Type-erased view used by the registry to clear a cache on stop.
///

pub(crate) trait ErasedCache: Send + Sync {
    fn clear_all(&self);
}

impl<P: Send + Sync, C: Send + Sync> ErasedCache for QueryCache<P, C> {
    fn clear_all(&self) {
        self.clear();
    }
}

///
/// CacheSlot
///
/// Callback handle into one cache key, handed to the adapter with a cached
/// plan so it can register a prepared statement or report a stale one.
///

pub struct CacheSlot<P, C> {
    cache: Arc<QueryCache<P, C>>,
    key: CacheKey,
}

impl<P, C> CacheSlot<P, C> {
    pub(crate) const fn new(cache: Arc<QueryCache<P, C>>, key: CacheKey) -> Self {
        Self { cache, key }
    }

    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Record the backend handle for a statement prepared under this key.
    pub fn store(&self, cached: C) -> bool {
        self.cache
            .replace(&self.key, CacheEntry::Cached(Arc::new(cached)))
    }

    /// Revert a registered statement to its un-registered prepared form.
    pub fn reset(&self, prepared: P) -> bool {
        self.cache
            .replace(&self.key, CacheEntry::Prepared(Arc::new(prepared)))
    }

    /// Drop the entry; the next plan for this shape is prepared from scratch.
    pub fn evict(&self) -> bool {
        self.cache.evict(&self.key)
    }
}

impl<P, C> Clone for CacheSlot<P, C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key: self.key,
        }
    }
}
