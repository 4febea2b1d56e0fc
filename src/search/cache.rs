//! Search result cache / 搜索结果缓存
//!
//! TTL + bounded capacity. Eviction is FIFO by write time: when full and the
//! key is new, the entry with the oldest timestamp goes, regardless of how
//! often it was read. Expired entries are only treated as absent by `get`;
//! `purge_expired` removes them explicitly.
//!
//! The whole map is persisted as one JSON blob after every mutation. Several
//! owners may share one blob; a scoped cache prefixes its keys with the owner.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::schema::SearchResultItem;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::storage::KeyValueStore;
use crate::utils::normalize_key;

/// Cached search result / 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<SearchResultItem>,
    /// Write time (epoch ms) / 写入时间
    pub timestamp: i64,
}

/// Cache statistics / 缓存统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_items: usize,
    pub valid_items: usize,
    pub max_items: usize,
    pub expiry_ms: i64,
}

/// Search cache / 搜索缓存
pub struct SearchCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    scope: String,
}

impl SearchCache {
    /// Create the cache and load the persisted blob / 创建并加载持久化数据
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let mut entries = Self::load(kv.as_ref(), &config.storage_key);
        tracing::debug!("Search cache loaded with {} entries", entries.len());
        let mut trimmed = false;
        while entries.len() > config.max_items {
            if evict_oldest(&mut entries).is_none() {
                break;
            }
            trimmed = true;
        }
        let cache = Self {
            entries: Mutex::new(entries),
            kv,
            clock,
            config,
            scope: String::new(),
        };
        if trimmed {
            let entries = cache.entries.lock();
            tracing::debug!("Search cache trimmed to {} entries", entries.len());
            cache.persist(&entries);
        }
        cache
    }

    /// Keep this cache's keys apart from other owners in the same blob
    /// 按所有者隔离缓存键
    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    fn entry_key(&self, query: &str) -> String {
        let key = normalize_key(query);
        if self.scope.is_empty() {
            key
        } else {
            format!("{}\u{1f}{}", self.scope, key)
        }
    }

    fn load(kv: &dyn KeyValueStore, storage_key: &str) -> HashMap<String, CacheEntry> {
        let bytes = match kv.get(storage_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read search cache, starting empty: {}", e);
                return HashMap::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Persisted search cache is corrupt, starting empty: {}", e);
                HashMap::new()
            }
        }
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) {
        let result = serde_json::to_vec(entries)
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.kv.set(&self.config.storage_key, &bytes).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!("Failed to persist search cache: {}", e);
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: i64) -> bool {
        now - entry.timestamp < self.config.expiry_ms
    }

    /// Cached results for a query, if still fresh / 获取未过期的缓存结果
    pub fn get(&self, query: &str) -> Option<Vec<SearchResultItem>> {
        let key = self.entry_key(query);
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        let entry = entries.get(&key)?;
        if !self.is_fresh(entry, now) {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Store results, evicting the oldest entry when full / 写入缓存
    pub fn set(&self, query: &str, data: Vec<SearchResultItem>) {
        let key = self.entry_key(query);
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        while !entries.contains_key(&key) && entries.len() >= self.config.max_items {
            match evict_oldest(&mut entries) {
                Some(oldest) => tracing::debug!("Search cache full, evicted {:?}", oldest),
                None => break,
            }
        }
        if self.config.max_items > 0 {
            entries.insert(key.clone(), CacheEntry { key, data, timestamp: now });
        }
        self.persist(&entries);
    }

    /// Drop every entry / 清空缓存
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        if let Err(e) = self.kv.remove(&self.config.storage_key) {
            tracing::warn!("Failed to remove persisted search cache: {}", e);
        }
    }

    /// Remove expired entries, returning how many were dropped / 清除过期条目
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now - e.timestamp < self.config.expiry_ms);
        let purged = before - entries.len();
        if purged > 0 {
            self.persist(&entries);
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        CacheStats {
            total_items: entries.len(),
            valid_items: entries.values().filter(|e| self.is_fresh(e, now)).count(),
            max_items: self.config.max_items,
            expiry_ms: self.config.expiry_ms,
        }
    }
}

/// Remove the entry written first / 移除最早写入的条目
fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) -> Option<String> {
    let oldest = entries.iter().min_by_key(|(_, e)| e.timestamp).map(|(k, _)| k.clone())?;
    entries.remove(&oldest);
    Some(oldest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::search::schema::BookHit;
    use crate::storage::MemoryKvStore;

    fn item(id: &str) -> SearchResultItem {
        SearchResultItem::Book(BookHit {
            id: id.to_string(),
            parent_id: None,
            title: format!("Book {}", id),
            author: String::new(),
            status: None,
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        })
    }

    fn cache_with(kv: Arc<MemoryKvStore>, clock: Arc<ManualClock>, max_items: usize) -> SearchCache {
        let config = CacheConfig { max_items, ..CacheConfig::default() };
        SearchCache::new(kv, clock, config)
    }

    #[test]
    fn test_get_normalizes_and_expires() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = cache_with(Arc::new(MemoryKvStore::new()), clock.clone(), 50);
        cache.set("Dune ", vec![item("1")]);
        assert_eq!(cache.get(" dune").unwrap().len(), 1);

        clock.advance(299_999);
        assert!(cache.get("dune").is_some());
        clock.advance(1);
        assert!(cache.get("dune").is_none());

        // 过期条目不会被 get 删除
        let stats = cache.stats();
        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.valid_items, 0);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().total_items, 0);
    }

    #[test]
    fn test_fifo_eviction_ignores_reads() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(Arc::new(MemoryKvStore::new()), clock.clone(), 2);
        cache.set("a", vec![item("a")]);
        clock.advance(10);
        cache.set("b", vec![item("b")]);
        clock.advance(10);
        assert!(cache.get("a").is_some());

        cache.set("c", vec![item("c")]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());

        // 覆盖已有键不触发淘汰
        clock.advance(10);
        cache.set("b", vec![item("b2")]);
        assert_eq!(cache.stats().total_items, 2);
        assert_eq!(cache.get("b").unwrap()[0].id(), "b2");
    }

    #[test]
    fn test_persisted_across_instances() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::new(0));
        cache_with(kv.clone(), clock.clone(), 50).set("dune", vec![item("1")]);

        let reloaded = cache_with(kv.clone(), clock.clone(), 50);
        assert_eq!(reloaded.get("dune").unwrap(), vec![item("1")]);

        reloaded.clear();
        assert!(kv.get("search_cache").unwrap().is_none());
        assert!(cache_with(kv, clock, 50).get("dune").is_none());
    }

    #[test]
    fn test_lowered_capacity_trims_loaded_entries() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(kv.clone(), clock.clone(), 5);
        for key in ["a", "b", "c", "d", "e"] {
            cache.set(key, vec![item(key)]);
            clock.advance(10);
        }

        let smaller = cache_with(kv.clone(), clock.clone(), 2);
        assert_eq!(smaller.stats().total_items, 2);
        assert!(smaller.get("c").is_none());
        assert!(smaller.get("d").is_some());
        assert!(smaller.get("e").is_some());

        smaller.set("new", vec![item("new")]);
        let stats = smaller.stats();
        assert_eq!((stats.total_items, stats.max_items), (2, 2));
        assert!(smaller.get("d").is_none());
        assert!(smaller.get("new").is_some());

        // 裁剪结果已写回
        assert_eq!(cache_with(kv, clock, 5).stats().total_items, 2);
    }

    #[test]
    fn test_scopes_share_blob_without_mixing() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let mine = cache_with(kv.clone(), clock.clone(), 50).scoped("u1");
        mine.set("dune", vec![item("a")]);

        let theirs = cache_with(kv.clone(), clock.clone(), 50).scoped("u2");
        assert!(theirs.get("dune").is_none());
        theirs.set("dune", vec![item("b")]);

        let reloaded = cache_with(kv, clock, 50).scoped("u1");
        assert_eq!(reloaded.get("Dune").unwrap(), vec![item("a")]);
        assert_eq!(reloaded.stats().total_items, 2);
    }

    #[test]
    fn test_corrupt_blob_loads_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("search_cache", b"{not json").unwrap();
        let cache = cache_with(kv, Arc::new(ManualClock::new(0)), 50);
        assert_eq!(cache.stats().total_items, 0);
        cache.set("x", vec![item("1")]);
        assert!(cache.get("x").is_some());
    }
}
