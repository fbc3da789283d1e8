//! Bounded store with least-recently-used eviction.

use super::{CacheKey, CacheStore, CacheValue, StoreProvider};
use ::lru::LruCache;
use async_trait::async_trait;
use chronicle_core::{ChronicleResult, StoreError};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store holding at most `capacity` entries.
///
/// Reads refresh recency, so they take the mutex too.
pub struct LruStore<K: CacheKey, V: CacheValue> {
    name: String,
    inner: Mutex<LruCache<K, V>>,
    shut_down: AtomicBool,
}

impl<K: CacheKey, V: CacheValue> LruStore<K, V> {
    /// A zero capacity is treated as one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            inner: Mutex::new(LruCache::new(cap)),
            shut_down: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> ChronicleResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(StoreError::ShutDown {
                store: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> CacheStore<K, V> for LruStore<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> ChronicleResult<Option<V>> {
        self.ensure_open()?;
        let mut guard = self.inner.lock().await;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: K, value: V) -> ChronicleResult<()> {
        self.ensure_open()?;
        let mut guard = self.inner.lock().await;
        // push returns the old entry for this key on overwrite, or the
        // evicted LRU entry when full
        if let Some((evicted, _)) = guard.push(key.clone(), value) {
            if evicted != key {
                tracing::trace!(store = %self.name, key = ?evicted, "Evicted least recently used entry");
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &K) -> ChronicleResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.lock().await.pop(key).is_some())
    }

    async fn clear(&self) -> ChronicleResult<u64> {
        self.ensure_open()?;
        let mut guard = self.inner.lock().await;
        let count = guard.len() as u64;
        guard.clear();
        Ok(count)
    }

    async fn len(&self) -> ChronicleResult<usize> {
        self.ensure_open()?;
        Ok(self.inner.lock().await.len())
    }

    async fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.inner.lock().await.clear();
            tracing::debug!(store = %self.name, "LRU store shut down");
        }
    }
}

/// Provider of [`LruStore`]s, each bounded to the same capacity.
#[derive(Debug, Clone, Copy)]
pub struct LruStoreProvider {
    capacity: usize,
}

impl LruStoreProvider {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl StoreProvider for LruStoreProvider {
    fn create_store<K: CacheKey, V: CacheValue>(
        &self,
        name: &str,
    ) -> ChronicleResult<Arc<dyn CacheStore<K, V>>> {
        Ok(Arc::new(LruStore::<K, V>::new(name, self.capacity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let store = LruStore::<u32, &'static str>::new("bounded", 2);
        store.put(1, "one").await.expect("put");
        store.put(2, "two").await.expect("put");

        // touch 1 so 2 becomes the eviction candidate
        assert_eq!(store.get(&1).await.expect("get"), Some("one"));
        store.put(3, "three").await.expect("put");

        assert_eq!(store.get(&2).await.expect("get"), None);
        assert_eq!(store.get(&1).await.expect("get"), Some("one"));
        assert_eq!(store.get(&3).await.expect("get"), Some("three"));
        assert_eq!(store.len().await.expect("len"), 2);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let store = LruStore::<u32, u32>::new("bounded", 2);
        store.put(1, 1).await.expect("put");
        store.put(2, 2).await.expect("put");
        store.put(2, 20).await.expect("overwrite");
        assert_eq!(store.get(&1).await.expect("get"), Some(1));
        assert_eq!(store.get(&2).await.expect("get"), Some(20));
    }

    #[tokio::test]
    async fn test_zero_capacity_holds_one() {
        let store = LruStore::<u32, u32>::new("tiny", 0);
        store.put(1, 1).await.expect("put");
        store.put(2, 2).await.expect("put");
        assert_eq!(store.len().await.expect("len"), 1);
        assert_eq!(store.get(&2).await.expect("get"), Some(2));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_use() {
        let store = LruStore::<u32, u32>::new("closing", 4);
        store.shutdown().await;
        assert!(store.len().await.is_err());
        assert!(store.clear().await.is_err());
    }
}
