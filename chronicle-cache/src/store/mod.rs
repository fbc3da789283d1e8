//! Key-value store abstraction backing the hierarchical cache.
//!
//! A hierarchical cache is built over three stores created by one
//! [`StoreProvider`]. Stores are plain concurrent maps; any eviction they do
//! is invisible to the cache except as a later miss.

mod lru;
mod memory;

pub use self::lru::{LruStore, LruStoreProvider};
pub use self::memory::{InMemoryStore, InMemoryStoreProvider};

use crate::config::CacheConfig;
use async_trait::async_trait;
use chronicle_core::ChronicleResult;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Bounds required of a store key.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds required of a stored value.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// A named, thread-safe key-value store.
///
/// Every operation on a store that has been shut down fails with
/// [`chronicle_core::StoreError::ShutDown`].
#[async_trait]
pub trait CacheStore<K: CacheKey, V: CacheValue>: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &K) -> ChronicleResult<Option<V>>;

    /// Insert or overwrite.
    async fn put(&self, key: K, value: V) -> ChronicleResult<()>;

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &K) -> ChronicleResult<bool>;

    /// Drop every entry, returning how many there were.
    async fn clear(&self) -> ChronicleResult<u64>;

    async fn len(&self) -> ChronicleResult<usize>;

    /// Release the store. Idempotent.
    async fn shutdown(&self);
}

/// Creates stores for a cache.
pub trait StoreProvider: Send + Sync {
    fn create_store<K: CacheKey, V: CacheValue>(
        &self,
        name: &str,
    ) -> ChronicleResult<Arc<dyn CacheStore<K, V>>>;
}

/// The provider selected by a [`CacheConfig`].
#[derive(Debug, Clone)]
pub enum DefaultStoreProvider {
    InMemory(InMemoryStoreProvider),
    Lru(LruStoreProvider),
}

impl DefaultStoreProvider {
    /// Bounded LRU stores when `store_capacity` is set, unbounded otherwise.
    pub fn from_config(config: &CacheConfig) -> ChronicleResult<Self> {
        config.validate()?;
        Ok(match config.store_capacity {
            Some(capacity) => Self::Lru(LruStoreProvider::new(capacity)),
            None => Self::InMemory(InMemoryStoreProvider),
        })
    }
}

impl StoreProvider for DefaultStoreProvider {
    fn create_store<K: CacheKey, V: CacheValue>(
        &self,
        name: &str,
    ) -> ChronicleResult<Arc<dyn CacheStore<K, V>>> {
        match self {
            Self::InMemory(provider) => provider.create_store(name),
            Self::Lru(provider) => provider.create_store(name),
        }
    }
}
