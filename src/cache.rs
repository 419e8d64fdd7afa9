//! Bounded least-recently-used caches shared by concurrent queries.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;

use crate::{
    config::CacheConfig,
    pipeline::features::FeatureSet,
    similarity::SimilarityScore,
    store::TemplateEvent,
    types::{MatchResult, TemplateId},
};

/// Least-recently-used map. Every access stamps the entry with a fresh tick; the smallest
/// tick is evicted first.
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Clone + Eq + Hash, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Returns a clone and marks the entry as most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let (value, stamp) = self.entries.get_mut(key)?;
        self.order.remove(stamp);
        *stamp = tick;
        self.order.insert(tick, key.clone());
        Some(value.clone())
    }

    /// Returns a clone without touching recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|(v, _)| v.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((_, old)) = self.entries.insert(key.clone(), (value, tick)) {
            self.order.remove(&old);
        }
        self.order.insert(tick, key);

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, stamp) = self.entries.remove(key)?;
        self.order.remove(&stamp);
        Some(value)
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        let order = &mut self.order;
        self.entries.retain(|key, (_, stamp)| {
            let kept = keep(key);
            if !kept {
                order.remove(stamp);
            }
            kept
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

/// An [`LruCache`] behind a mutex, with hit and miss counters.
pub struct SharedCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Clone + Eq + Hash, V: Clone> SharedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.lock().get(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: K, value: V) {
        self.lock().insert(key, value);
    }

    /// Inserts only if `admit` still holds once the lock is taken.
    pub fn insert_if<F>(&self, key: K, value: V, admit: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut cache = self.lock();
        if !admit() {
            return false;
        }
        cache.insert(key, value);
        true
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    pub fn retain<F>(&self, keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.lock().retain(keep);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}

/// Key of a cached match result: query content and the threshold it was decided against.
pub type ResultKey = (u64, u32);

pub fn result_key(query_hash: u64, threshold: f32) -> ResultKey {
    (query_hash, threshold.to_bits())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchCacheStats {
    pub features: CacheStats,
    pub distances: CacheStats,
    pub results: CacheStats,
}

/// Feature sets by sequence content, pairwise scores by (query content, template) and
/// final results by (query content, threshold).
///
/// Every invalidation bumps a generation counter before it drops entries. Queries record the
/// generation they started under and only write scores and results back while it is unchanged,
/// so a query that read the template set before a mutation cannot repopulate what the
/// mutation cleared.
pub struct MatchCaches {
    pub features: SharedCache<u64, Arc<FeatureSet>>,
    pub distances: SharedCache<(u64, TemplateId), SimilarityScore>,
    pub results: SharedCache<ResultKey, MatchResult>,
    generation: AtomicU64,
}

impl MatchCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            features: SharedCache::new(config.features),
            distances: SharedCache::new(config.distances),
            results: SharedCache::new(config.results),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Caches a pairwise score computed under `generation`. Returns false if it was stale.
    pub fn store_distance(&self, generation: u64, key: (u64, TemplateId), score: SimilarityScore) -> bool {
        self.distances.insert_if(key, score, || self.is_current(generation))
    }

    /// Caches a result computed under `generation`. Returns false if it was stale.
    pub fn store_result(&self, generation: u64, key: ResultKey, result: MatchResult) -> bool {
        self.results.insert_if(key, result, || self.is_current(generation))
    }

    /// Drops every entry a template mutation could have made stale.
    pub fn invalidate(&self, event: &TemplateEvent) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.results.clear();
        let id = event.id();
        self.distances.retain(|(_, template)| *template != id);
        if let Some(hash) = event.previous_hash() {
            self.features.remove(&hash);
        }
        log::debug!("invalidated caches for template {id}");
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.features.clear();
        self.distances.clear();
        self.results.clear();
    }

    pub fn stats(&self) -> MatchCacheStats {
        MatchCacheStats {
            features: self.features.stats(),
            distances: self.distances.stats(),
            results: self.results.stats(),
        }
    }
}
