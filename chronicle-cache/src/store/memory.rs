//! Unbounded in-memory store over a sharded concurrent map.

use super::{CacheKey, CacheStore, CacheValue, StoreProvider};
use async_trait::async_trait;
use chronicle_core::{ChronicleResult, StoreError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Store backed by a [`DashMap`]. Never evicts.
pub struct InMemoryStore<K: CacheKey, V: CacheValue> {
    name: String,
    entries: DashMap<K, V>,
    shut_down: AtomicBool,
}

impl<K: CacheKey, V: CacheValue> InMemoryStore<K, V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
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
impl<K: CacheKey, V: CacheValue> CacheStore<K, V> for InMemoryStore<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> ChronicleResult<Option<V>> {
        self.ensure_open()?;
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: K, value: V) -> ChronicleResult<()> {
        self.ensure_open()?;
        self.entries.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> ChronicleResult<bool> {
        self.ensure_open()?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> ChronicleResult<u64> {
        self.ensure_open()?;
        let count = self.entries.len() as u64;
        self.entries.clear();
        Ok(count)
    }

    async fn len(&self) -> ChronicleResult<usize> {
        self.ensure_open()?;
        Ok(self.entries.len())
    }

    async fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.entries.clear();
            tracing::debug!(store = %self.name, "In-memory store shut down");
        }
    }
}

/// Provider of unbounded [`InMemoryStore`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryStoreProvider;

impl StoreProvider for InMemoryStoreProvider {
    fn create_store<K: CacheKey, V: CacheValue>(
        &self,
        name: &str,
    ) -> ChronicleResult<Arc<dyn CacheStore<K, V>>> {
        Ok(Arc::new(InMemoryStore::<K, V>::new(name)))
    }
}
