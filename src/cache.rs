use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::{SearchResult, TypeFilter};

/// 缓存键：规范化后的查询 + 范围 + 类型过滤 + 是否模糊
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    query: String,
    scope: Option<PathBuf>,
    type_filter: TypeFilter,
    fuzzy: bool,
}

impl CacheKey {
    pub fn new(query: &str, scope: Option<PathBuf>, type_filter: TypeFilter, fuzzy: bool) -> Self {
        Self {
            query: query.to_string(),
            scope,
            type_filter,
            fuzzy,
        }
    }
}

/// 缓存条目
struct CacheEntry {
    results: Arc<Vec<SearchResult>>,
    timestamp: Instant,
}

struct Inner {
    ttl: Duration,
    capacity: usize,
    records: HashMap<CacheKey, CacheEntry>,
}

/// 短 TTL 结果缓存，吸收连续按键产生的重复查询
pub struct ResultCache {
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ttl,
                capacity: capacity.max(1),
                records: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 过期记录视为未命中，并在返回前移除
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<SearchResult>>> {
        let mut inner = self.inner.lock();
        let ttl = inner.ttl;
        let found = inner
            .records
            .get(key)
            .map(|e| (e.timestamp.elapsed() < ttl, e.results.clone()));
        let live = match found {
            Some((true, results)) => Some(results),
            Some((false, _)) => {
                inner.records.remove(key);
                None
            }
            None => None,
        };
        match live {
            Some(results) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(results)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, results: Arc<Vec<SearchResult>>) {
        let mut inner = self.inner.lock();
        if inner.records.len() >= inner.capacity && !inner.records.contains_key(&key) {
            let ttl = inner.ttl;
            inner.records.retain(|_, e| e.timestamp.elapsed() < ttl);
            if inner.records.len() >= inner.capacity {
                let oldest = inner
                    .records
                    .iter()
                    .min_by_key(|(_, e)| e.timestamp)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    inner.records.remove(&oldest);
                }
            }
        }
        inner.records.insert(
            key,
            CacheEntry {
                results,
                timestamp: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.inner.lock().records.clear();
    }

    /// 调整 TTL 与容量，同时清空
    pub fn reconfigure(&self, ttl: Duration, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.ttl = ttl;
        inner.capacity = capacity.max(1);
        inner.records.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(q: &str) -> CacheKey {
        CacheKey::new(q, None, TypeFilter::All, true)
    }

    #[test]
    fn hit_within_ttl_returns_same_results() {
        let cache = ResultCache::new(Duration::from_secs(60), 8);
        let results = Arc::new(Vec::new());
        cache.put(key("a"), results.clone());
        let hit = cache.get(&key("a")).unwrap();
        assert!(Arc::ptr_eq(&hit, &results));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn expired_record_is_evicted_on_lookup() {
        let cache = ResultCache::new(Duration::from_millis(20), 8);
        cache.put(key("a"), Arc::new(Vec::new()));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn filters_are_part_of_the_key() {
        let cache = ResultCache::new(Duration::from_secs(60), 8);
        cache.put(key("a"), Arc::new(Vec::new()));
        assert!(cache.get(&CacheKey::new("a", None, TypeFilter::File, true)).is_none());
        assert!(cache.get(&CacheKey::new("a", None, TypeFilter::All, false)).is_none());
        assert!(cache
            .get(&CacheKey::new("a", Some(PathBuf::from("/x")), TypeFilter::All, true))
            .is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.put(key("a"), Arc::new(Vec::new()));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(key("b"), Arc::new(Vec::new()));
        cache.put(key("c"), Arc::new(Vec::new()));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn clear_and_reconfigure_drop_records() {
        let cache = ResultCache::new(Duration::from_secs(60), 8);
        cache.put(key("a"), Arc::new(Vec::new()));
        cache.clear();
        assert!(cache.is_empty());
        cache.put(key("a"), Arc::new(Vec::new()));
        cache.reconfigure(Duration::from_secs(1), 4);
        assert!(cache.is_empty());
    }
}
