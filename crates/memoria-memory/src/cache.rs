// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-bounded result cache.
//!
//! Entries expire `expiry` after insertion. When the cache grows past
//! `max_size`, expired entries are swept first and then the least
//! accessed entries are evicted (oldest access breaks ties).

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use memoria_config::model::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    access_count: u64,
    last_accessed: Instant,
}

/// A TTL cache with access-count eviction. Last write wins.
pub struct TtlCache<K, V> {
    name: &'static str,
    expiry: Duration,
    max_size: usize,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `name` labels this cache in metrics.
    pub fn new(name: &'static str, expiry: Duration, max_size: usize) -> Self {
        Self {
            name,
            expiry,
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(name: &'static str, config: &CacheConfig) -> Self {
        Self::new(name, Duration::from_secs(config.expiry_secs), config.max_size)
    }

    /// The cached value, if present and not expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired = match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.created_at) < self.expiry => {
                entry.access_count += 1;
                entry.last_accessed = now;
                crate::telemetry::record_cache_hit(self.name);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        crate::telemetry::record_cache_miss(self.name);
        None
    }

    pub async fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                access_count: 0,
                last_accessed: now,
            },
        );
        if entries.len() > self.max_size {
            self.evict(&mut entries, now);
        }
    }

    /// Drop every entry whose key matches. Returns how many were dropped.
    pub async fn invalidate(&self, matches: impl Fn(&K) -> bool) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|k, _| !matches(k));
        before - entries.len()
    }

    /// Remove expired entries. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.sweep_expired(&mut entries, now)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    fn sweep_expired(&self, entries: &mut HashMap<K, CacheEntry<V>>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.created_at) < self.expiry);
        before - entries.len()
    }

    fn evict(&self, entries: &mut HashMap<K, CacheEntry<V>>, now: Instant) {
        let swept = self.sweep_expired(entries, now);
        let overflow = entries.len().saturating_sub(self.max_size);
        if overflow > 0 {
            let mut by_use: Vec<(K, u64, Instant)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.access_count, e.last_accessed))
                .collect();
            by_use.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
            for (key, _, _) in by_use.into_iter().take(overflow) {
                entries.remove(&key);
            }
        }
        debug!(cache = self.name, swept, evicted = overflow, "cache eviction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = TtlCache::new("test", Duration::from_secs(10), 10);
        cache.insert("a", 1).await;
        assert_eq!(cache.get(&"a").await, Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn least_accessed_entry_is_evicted() {
        let cache = TtlCache::new("test", Duration::from_secs(60), 2);
        cache.insert("hot", 1).await;
        cache.insert("cold", 2).await;
        cache.get(&"hot").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("new", 3).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&"cold").await, None);
        assert_eq!(cache.get(&"hot").await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_swept_before_eviction() {
        let cache = TtlCache::new("test", Duration::from_secs(5), 2);
        cache.insert("old", 1).await;
        cache.get(&"old").await;
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.insert("b", 2).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.insert("c", 3).await;

        assert_eq!(cache.get(&"b").await, Some(2));
        assert_eq!(cache.get(&"c").await, Some(3));
    }

    #[tokio::test]
    async fn invalidate_by_predicate() {
        let cache = TtlCache::new("test", Duration::from_secs(60), 10);
        cache.insert(("u1", "q1"), 1).await;
        cache.insert(("u1", "q2"), 2).await;
        cache.insert(("u2", "q1"), 3).await;

        assert_eq!(cache.invalidate(|(user, _)| *user == "u1").await, 2);
        assert_eq!(cache.get(&("u2", "q1")).await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn last_write_wins_and_resets_ttl() {
        let cache = TtlCache::new("test", Duration::from_secs(10), 10);
        cache.insert("k", 1).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("k", 2).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&"k").await, Some(2));
        assert_eq!(cache.sweep().await, 0);
    }
}
