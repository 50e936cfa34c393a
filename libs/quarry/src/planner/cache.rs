//! Bounded, TTL-checked result cache shared across concurrent requests.
//!
//! Entries are immutable once written: they are only inserted or evicted,
//! so a single mutex around the LRU map is the only synchronization needed.

use crate::metrics::{CACHE_ENTRIES, CACHE_LOOKUPS_TOTAL};
use crate::models::PaginatedResult;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CacheEntry {
    pub result: PaginatedResult,
    pub stored_at: Instant,
}

pub struct QueryCache {
    entries: Mutex<LruCache<String, Arc<CacheEntry>>>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<CacheEntry>>> {
        // Entries are never mutated in place, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh entry for `key`, if any. Expired entries are evicted on read.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut entries = self.lock();
        let Some(entry) = entries.get(key).cloned() else {
            CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
            return None;
        };

        if entry.stored_at.elapsed() < self.ttl {
            CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
            return Some(entry);
        }

        entries.pop(key);
        CACHE_ENTRIES.set(entries.len() as i64);
        CACHE_LOOKUPS_TOTAL.with_label_values(&["expired"]).inc();
        None
    }

    pub fn insert(&self, key: String, result: PaginatedResult) {
        self.insert_at(key, result, Instant::now());
    }

    fn insert_at(&self, key: String, result: PaginatedResult, stored_at: Instant) {
        let mut entries = self.lock();
        entries.put(key, Arc::new(CacheEntry { result, stored_at }));
        CACHE_ENTRIES.set(entries.len() as i64);
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        CACHE_ENTRIES.set(0);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CacheStatus, QueryMetadata};
    use crate::planner::ExecutionStrategy;

    fn result(page: u32) -> PaginatedResult {
        PaginatedResult {
            items: Vec::new(),
            total: Some(0),
            page,
            limit: 10,
            total_pages: Some(0),
            has_next: false,
            has_prev: false,
            metadata: QueryMetadata {
                query_time_ms: 0.0,
                backend: "document".to_string(),
                search_algorithms: Vec::new(),
                search_groups: Vec::new(),
                backend_conditions: Vec::new(),
                relations_requested: Vec::new(),
                relations_loaded: Vec::new(),
                relation_errors: Vec::new(),
                fields: Vec::new(),
                cache_status: CacheStatus::Miss,
                execution_strategy: ExecutionStrategy::CountAndFetch,
                fingerprint: String::new(),
            },
        }
    }

    fn cache(capacity: usize, ttl: Duration) -> QueryCache {
        QueryCache::new(NonZeroUsize::new(capacity).unwrap(), ttl)
    }

    #[test]
    fn fresh_entries_are_returned() {
        let c = cache(4, Duration::from_secs(60));
        c.insert("a".into(), result(1));
        assert_eq!(c.get("a").map(|e| e.result.page), Some(1));
        assert!(c.get("b").is_none());
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let c = cache(4, Duration::from_secs(5));
        let old = Instant::now()
            .checked_sub(Duration::from_secs(10))
            .unwrap_or_else(Instant::now);
        c.insert_at("a".into(), result(1), old);
        assert_eq!(c.len(), 1);
        assert!(c.get("a").is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn zero_ttl_never_serves() {
        let c = cache(4, Duration::ZERO);
        c.insert("a".into(), result(1));
        assert!(c.get("a").is_none());
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let c = cache(2, Duration::from_secs(60));
        c.insert("a".into(), result(1));
        c.insert("b".into(), result(2));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(c.get("a").is_some());
        c.insert("c".into(), result(3));

        assert_eq!(c.len(), 2);
        assert!(c.get("a").is_some());
        assert!(c.get("b").is_none());
        assert!(c.get("c").is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let c = cache(4, Duration::from_secs(60));
        c.insert("a".into(), result(1));
        c.clear();
        assert!(c.get("a").is_none());
    }
}
