use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, trace};
use serde::Serialize;
use tokio::time::Instant;

use mir_core::{Data, Interest};

use crate::config::CachePolicy;
use crate::eviction::{ArcCache, EvictionCache, LfuCache, LruCache};
use crate::trie::PrefixTrie;

/// Cached Data entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsEntry {
    pub data: Data,
    /// From this instant on the entry no longer counts as fresh
    pub stale_at: Instant,
}

impl CsEntry {
    /// Entry cached at `now`; Data without a freshness period is stale immediately.
    pub fn new(data: Data, now: Instant) -> Self {
        let stale_at = now + data.freshness_period.unwrap_or_default();
        Self { data, stale_at }
    }

    pub fn with_stale_at(data: Data, stale_at: Instant) -> Self {
        Self { data, stale_at }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.stale_at
    }

    pub fn can_satisfy(&self, interest: &Interest, now: Instant) -> bool {
        interest.matches_data(&self.data) && !(interest.must_be_fresh && self.is_stale(now))
    }
}

/// Content store statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsStats {
    pub policy: CachePolicy,
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// `None` for the unbounded store
    pub capacity: Option<usize>,
}

/// Data cache consulted before an Interest is forwarded
pub trait ContentStore: Send + Sync {
    fn find(&self, interest: &Interest) -> Option<Arc<CsEntry>>;

    /// Cache `data`, returning the entry now stored under its name.
    fn insert(&self, data: Data) -> Arc<CsEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CsStats;
}

#[derive(Debug, Default)]
struct HitCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounters {
    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Exact-name cache on the shared trie, without a capacity bound.
///
/// Re-inserting a name replaces the cached Data.
#[derive(Default)]
pub struct TrieContentStore {
    trie: PrefixTrie<Arc<CsEntry>>,
    size: AtomicUsize,
    counters: HitCounters,
}

impl TrieContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for TrieContentStore {
    fn find(&self, interest: &Interest) -> Option<Arc<CsEntry>> {
        let now = Instant::now();
        let found = self
            .trie
            .exact_match(interest.name.components())
            .into_value()
            .filter(|entry| entry.can_satisfy(interest, now));
        self.counters.record(found.is_some());
        trace!("CS lookup {}: {}", interest.name, if found.is_some() { "hit" } else { "miss" });
        found
    }

    fn insert(&self, data: Data) -> Arc<CsEntry> {
        let entry = Arc::new(CsEntry::new(data, Instant::now()));
        let replaced = self.trie.insert(entry.data.name.components(), Arc::clone(&entry));
        if replaced.is_none() {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Cached Data: {} (cache size: {})", entry.data.name, self.len());
        entry
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn stats(&self) -> CsStats {
        CsStats {
            policy: CachePolicy::Unbounded,
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            size: self.len(),
            capacity: None,
        }
    }
}

/// Capacity-bounded cache with a pluggable eviction policy, keyed by the
/// Data's canonical name string.
pub struct BoundedContentStore {
    policy: CachePolicy,
    cache: Mutex<Box<dyn EvictionCache<Arc<CsEntry>>>>,
    counters: HitCounters,
}

impl BoundedContentStore {
    pub fn new(cache: Box<dyn EvictionCache<Arc<CsEntry>>>, policy: CachePolicy) -> Self {
        Self {
            policy,
            cache: Mutex::new(cache),
            counters: HitCounters::default(),
        }
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut dyn EvictionCache<Arc<CsEntry>>) -> R) -> R {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(cache.as_mut())
    }
}

impl ContentStore for BoundedContentStore {
    fn find(&self, interest: &Interest) -> Option<Arc<CsEntry>> {
        let now = Instant::now();
        let key = interest.name.to_string();
        let found = self
            .with_cache(|cache| cache.get(&key))
            .filter(|entry| entry.can_satisfy(interest, now));
        self.counters.record(found.is_some());
        trace!("CS lookup {}: {}", key, if found.is_some() { "hit" } else { "miss" });
        found
    }

    /// Get-or-create: an entry already cached under the same name is
    /// returned as is.
    fn insert(&self, data: Data) -> Arc<CsEntry> {
        let key = data.name.to_string();
        let candidate = Arc::new(CsEntry::new(data, Instant::now()));
        let entry = self.with_cache(|cache| cache.get_or_insert(key.clone(), Arc::clone(&candidate)));
        if Arc::ptr_eq(&entry, &candidate) {
            debug!("Cached Data: {} (cache size: {})", key, self.len());
        }
        entry
    }

    fn len(&self) -> usize {
        self.with_cache(|cache| cache.len())
    }

    fn stats(&self) -> CsStats {
        let (size, capacity) = self.with_cache(|cache| (cache.len(), cache.capacity()));
        CsStats {
            policy: self.policy,
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            size,
            capacity: Some(capacity),
        }
    }
}

/// Build the store selected by `policy`.
pub fn new_content_store(policy: CachePolicy, capacity: usize) -> Box<dyn ContentStore> {
    let cache: Box<dyn EvictionCache<Arc<CsEntry>>> = match policy {
        CachePolicy::Unbounded => return Box::new(TrieContentStore::new()),
        CachePolicy::Lru => Box::new(LruCache::new(capacity)),
        CachePolicy::Lfu => Box::new(LfuCache::new(capacity)),
        CachePolicy::Arc => Box::new(ArcCache::new(capacity)),
    };
    Box::new(BoundedContentStore::new(cache, policy))
}
