//! Cache store with LRU eviction of value entries
//!
//! The store is a plain map from [`CacheKey`] to [`CacheEntry`] behind a
//! non-suspending lock. Lookups never await: the only place a caller waits is
//! on an in-flight computation, see [`crate::cache::flight`].
//!
//! Invariants:
//! - at most one live entry per key (`put` replaces)
//! - the LRU queue holds exactly the value keys, each once
//! - resource entries count toward neither bound and are never evicted

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason, InvalidationScope},
    key::CacheKey,
    types::{CacheStats, Fingerprint},
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// How many invalidation events are kept for inspection
const EVENT_HISTORY: usize = 64;

/// Process-wide map of cached results
pub struct CacheStore {
    max_entries: usize,
    max_size_bytes: usize,
    keep_history: bool,
    inner: Mutex<StoreInner>,
    history: Mutex<VecDeque<InvalidationEvent>>,
}

/// Internal cache storage
#[derive(Default)]
struct StoreInner {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking for value entries, least recent first
    lru_queue: VecDeque<CacheKey>,

    /// Hit/miss/eviction counters
    stats: CacheStats,

    /// Total size estimate of value entries
    value_size_bytes: usize,
}

impl StoreInner {
    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if entry.discipline.is_evictable() {
            self.lru_queue.retain(|k| k != key);
            self.value_size_bytes = self
                .value_size_bytes
                .saturating_sub(entry.metadata.size_estimate);
        }
        Some(entry)
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            if let Some(k) = self.lru_queue.remove(pos) {
                self.lru_queue.push_back(k);
            }
        }
    }

    /// Evict least recently used value entries until back under the bounds
    fn evict(&mut self, max_entries: usize, max_size_bytes: usize) -> Option<InvalidationEvent> {
        let mut evicted = Vec::new();

        while self.lru_queue.len() > max_entries || self.value_size_bytes > max_size_bytes {
            let Some(key) = self.lru_queue.front().cloned() else {
                break;
            };
            debug!("Evicting least recently used entry: {}", key);
            self.remove_entry(&key);
            self.stats.evictions_size += 1;
            evicted.push(key.to_string());
        }

        if evicted.is_empty() {
            None
        } else {
            Some(InvalidationEvent::new(
                InvalidationReason::LeastRecentlyUsed,
                evicted,
            ))
        }
    }
}

impl CacheStore {
    /// Create a new store bounded by `config`
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_size_bytes: config.max_size_bytes,
            keep_history: config.enable_metrics,
            inner: Mutex::new(StoreInner::default()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Look up a usable entry, refreshing its LRU position and hit count.
    ///
    /// Expired value entries and value entries computed under a different
    /// fingerprint are dropped and reported as a miss. The returned entry
    /// shares its payload with the stored one; a later eviction cannot pull
    /// the payload out from under the caller.
    pub fn get(&self, key: &CacheKey, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get(key) else {
            inner.stats.misses += 1;
            return None;
        };

        if entry.is_expired() {
            debug!("Cache entry expired: {}", key);
            inner.remove_entry(key);
            inner.stats.misses += 1;
            inner.stats.evictions_ttl += 1;
            return None;
        }

        if !entry.is_current(fingerprint) {
            debug!(
                "Cache entry {} was computed under fingerprint {}, expected {}",
                key, entry.fingerprint, fingerprint
            );
            inner.remove_entry(key);
            inner.stats.misses += 1;
            inner.stats.invalidations += 1;
            return None;
        }

        let discipline = entry.discipline;
        let found = inner.entries.get_mut(key).map(|entry| {
            entry.mark_accessed();
            entry.clone()
        });
        if discipline.is_evictable() {
            inner.touch(key);
        }
        inner.stats.hits += 1;

        debug!("Cache hit: {}", key);
        found
    }

    /// Check if a key exists in the store (without updating access metadata)
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Install an entry, replacing any entry under the same key, then evict
    /// least recently used values until back under the bounds.
    ///
    /// A value larger than the whole size bound is not stored. Returns the
    /// eviction event, if the insert pushed anything out.
    pub fn put(&self, entry: CacheEntry) -> Option<InvalidationEvent> {
        let mut inner = self.inner.lock();
        let key = entry.key.clone();
        let evictable = entry.discipline.is_evictable();

        if evictable && entry.metadata.size_estimate > self.max_size_bytes {
            warn!(
                "Not caching {}: {} bytes exceeds the {} byte bound",
                key, entry.metadata.size_estimate, self.max_size_bytes
            );
            inner.remove_entry(&key);
            return None;
        }

        if inner.remove_entry(&key).is_some() {
            debug!("Replacing existing cache entry: {}", key);
        }

        if evictable {
            inner.value_size_bytes += entry.metadata.size_estimate;
            inner.lru_queue.push_back(key.clone());
        }

        debug!("Inserting new {} entry: {}", entry.discipline, key);
        inner.entries.insert(key, entry);

        // The newest entry sits at the back of the queue and fits on its own
        let event = self.evict_locked(&mut inner);
        drop(inner);
        event
    }

    /// Evict least recently used value entries until back under the bounds
    pub fn evict_if_needed(&self) -> Option<InvalidationEvent> {
        let mut inner = self.inner.lock();
        let event = self.evict_locked(&mut inner);
        drop(inner);
        event
    }

    fn evict_locked(&self, inner: &mut StoreInner) -> Option<InvalidationEvent> {
        let event = inner.evict(self.max_entries, self.max_size_bytes)?;
        self.record(event.clone());
        Some(event)
    }

    /// Keep `event` in the history when `enable_metrics` is set
    pub fn record(&self, event: InvalidationEvent) {
        if !self.keep_history || event.is_empty() {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == EVENT_HISTORY {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Most recent invalidation events, oldest first
    pub fn recent_events(&self) -> Vec<InvalidationEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// Remove every entry covered by `scope`.
    ///
    /// `FunctionValues` leaves the function's resources in place; every other
    /// scope removes resources too. Releasing a removed resource (closing a
    /// connection) is the caller's responsibility.
    pub fn invalidate(
        &self,
        scope: &InvalidationScope,
        reason: InvalidationReason,
    ) -> InvalidationEvent {
        let mut inner = self.inner.lock();

        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, entry)| {
                scope.covers(key)
                    && !(matches!(scope, InvalidationScope::FunctionValues(_))
                        && !entry.discipline.is_evictable())
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            inner.remove_entry(key);
        }
        inner.stats.invalidations += doomed.len() as u64;

        info!("Invalidated {} entries ({})", doomed.len(), reason);
        InvalidationEvent::new(reason, doomed.iter().map(|k| k.to_string()).collect())
    }

    /// Remove all expired value entries
    pub fn cleanup_expired(&self) -> Option<InvalidationEvent> {
        let mut inner = self.inner.lock();

        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return None;
        }

        for key in &expired {
            inner.remove_entry(key);
        }
        inner.stats.evictions_ttl += expired.len() as u64;

        debug!("Cleaned up {} expired entries", expired.len());
        Some(
            InvalidationEvent::new(
                InvalidationReason::Expired,
                expired.iter().map(|k| k.to_string()).collect(),
            )
            .with_context(format!("Cleaned up {} expired entries", expired.len())),
        )
    }

    /// Snapshot of the store counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.value_entries = inner.lru_queue.len();
        stats.resource_entries = inner.entries.len() - inner.lru_queue.len();
        stats.size_bytes = inner.value_size_bytes;
        stats
    }

    /// Estimated size of value entries in bytes
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().value_size_bytes
    }

    /// Get number of entries in the store
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
