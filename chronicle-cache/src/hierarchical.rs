//! Two-level read-through cache with identity-scoped invalidation.
//!
//! Query keys map to the identity of the entity they resolved to, and each
//! identity owns one bucket holding every value cached for it. Invalidating
//! an identity drops its bucket, which orphans every query key that pointed
//! at it in a single store operation. Orphaned primary entries are treated
//! as misses.
//!
//! ```text
//! primary:  K ──────────► I
//! values:   I ──────────► Bucket { K ► V, direct: Option<V> }
//! misses:   Key(K) | Identity(I) ──► recorded at
//! ```

use crate::config::CacheConfig;
use crate::lock::IdentityLocks;
use crate::stats::{CacheCounters, CacheStats};
use crate::store::{CacheKey, CacheStore, CacheValue, StoreProvider};
use chrono::Utc;
use chronicle_core::{ChronicleResult, Timestamp};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// SUPPORTING TYPES
// ============================================================================

/// Derives the identity a loaded value belongs to.
pub trait IdentityExtractor<K, V, I>: Send + Sync {
    fn identity_of(&self, key: &K, value: &V) -> I;
}

impl<K, V, I, F> IdentityExtractor<K, V, I> for F
where
    F: Fn(&K, &V) -> I + Send + Sync,
{
    fn identity_of(&self, key: &K, value: &V) -> I {
        self(key, value)
    }
}

/// Key of a miss tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MissKey<K, I> {
    Key(K),
    Identity(I),
}

/// Every value cached for one identity.
///
/// Buckets are never mutated in place; writers copy, modify and replace.
#[derive(Debug, Clone)]
pub struct Bucket<K, V> {
    entries: HashMap<K, V>,
    direct: Option<V>,
}

impl<K, V> Default for Bucket<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            direct: None,
        }
    }
}

impl<K: CacheKey, V> Bucket<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// The value stored by a shallow insert.
    pub fn direct(&self) -> Option<&V> {
        self.direct.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.direct.is_none()
    }
}

/// Outcome of a lookup that never loads.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    /// A tombstone says the loader has nothing for this key.
    Missed,
    Absent,
}

// ============================================================================
// HIERARCHICAL CACHE
// ============================================================================

/// Generic hierarchical cache over query keys `K`, identities `I` and
/// values `V`.
pub struct HierarchicalCache<K: CacheKey, I: CacheKey, V: CacheValue> {
    name: String,
    primary: Arc<dyn CacheStore<K, I>>,
    values: Arc<dyn CacheStore<I, Arc<Bucket<K, V>>>>,
    misses: Arc<dyn CacheStore<MissKey<K, I>, Timestamp>>,
    extractor: Arc<dyn IdentityExtractor<K, V, I>>,
    locks: IdentityLocks<I>,
    lock_timeout: Duration,
    counters: CacheCounters,
    shut_down: AtomicBool,
}

impl<K: CacheKey, I: CacheKey, V: CacheValue> HierarchicalCache<K, I, V> {
    /// Create the cache's three stores through `provider`.
    pub fn new<P, E>(
        name: impl Into<String>,
        provider: &P,
        extractor: E,
        config: &CacheConfig,
    ) -> ChronicleResult<Self>
    where
        P: StoreProvider,
        E: IdentityExtractor<K, V, I> + 'static,
    {
        config.validate()?;
        let name = name.into();
        Ok(Self {
            primary: provider.create_store(&format!("{name}-primary"))?,
            values: provider.create_store(&format!("{name}-values"))?,
            misses: provider.create_store(&format!("{name}-misses"))?,
            extractor: Arc::new(extractor),
            locks: IdentityLocks::new(),
            lock_timeout: config.lock_timeout,
            counters: CacheCounters::default(),
            shut_down: AtomicBool::new(false),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Return the cached value for `key`, loading it on a miss.
    ///
    /// A tombstoned key returns `None` without calling `loader`. A loader
    /// result of `None` tombstones the key. Loader errors are returned as is
    /// and leave no trace in the cache.
    pub async fn get<F, Fut>(&self, key: &K, loader: F) -> ChronicleResult<Option<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ChronicleResult<Option<V>>> + Send,
    {
        match self.lookup(key).await? {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Missed => return Ok(None),
            Lookup::Absent => {}
        }

        self.counters.load();
        tracing::debug!(cache = %self.name, key = ?key, "Cache miss, loading");
        match loader().await? {
            Some(value) => {
                self.insert(key.clone(), value.clone()).await?;
                Ok(Some(value))
            }
            None => {
                self.mark_missed(key).await?;
                Ok(None)
            }
        }
    }

    /// Look `key` up without loading or tombstoning.
    pub async fn lookup(&self, key: &K) -> ChronicleResult<Lookup<V>> {
        if self.misses.get(&MissKey::Key(key.clone())).await?.is_some() {
            self.counters.tombstone_hit();
            tracing::trace!(cache = %self.name, key = ?key, "Tombstone hit");
            return Ok(Lookup::Missed);
        }

        if let Some(identity) = self.primary.get(key).await? {
            if let Some(bucket) = self.values.get(&identity).await? {
                if let Some(value) = bucket.get(key) {
                    self.counters.hit();
                    tracing::trace!(cache = %self.name, key = ?key, "Cache hit");
                    return Ok(Lookup::Hit(value.clone()));
                }
            }
        }

        self.counters.miss();
        Ok(Lookup::Absent)
    }

    /// The cached value for `key`, if any.
    pub async fn peek(&self, key: &K) -> ChronicleResult<Option<V>> {
        match self.lookup(key).await? {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::Missed | Lookup::Absent => Ok(None),
        }
    }

    /// Shallow read path: one value per identity.
    pub async fn get_by_identity<F, Fut>(&self, identity: &I, loader: F) -> ChronicleResult<Option<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ChronicleResult<Option<V>>> + Send,
    {
        if self
            .misses
            .get(&MissKey::Identity(identity.clone()))
            .await?
            .is_some()
        {
            self.counters.tombstone_hit();
            return Ok(None);
        }

        if let Some(bucket) = self.values.get(identity).await? {
            if let Some(value) = bucket.direct() {
                self.counters.hit();
                return Ok(Some(value.clone()));
            }
        }

        self.counters.miss();
        self.counters.load();
        tracing::debug!(cache = %self.name, identity = ?identity, "Cache miss by identity, loading");
        match loader().await? {
            Some(value) => {
                self.shallow_insert(identity.clone(), value.clone()).await?;
                Ok(Some(value))
            }
            None => {
                self.mark_missed_identity(identity).await?;
                Ok(None)
            }
        }
    }

    /// Store `value` under `key` and the identity extracted from it.
    pub async fn insert(&self, key: K, value: V) -> ChronicleResult<bool> {
        let identity = self.extractor.identity_of(&key, &value);
        self.deep_insert(key, identity, value).await
    }

    /// Add `key -> value` to the identity's bucket and point `key` at it.
    ///
    /// Returns `false` when the identity lock could not be taken in time; the
    /// write is then dropped.
    pub async fn deep_insert(&self, key: K, identity: I, value: V) -> ChronicleResult<bool> {
        let Some(_guard) = self.locks.try_acquire(&identity, self.lock_timeout).await else {
            self.abandon_write(&identity);
            return Ok(false);
        };

        let mut bucket = self
            .values
            .get(&identity)
            .await?
            .map(Arc::unwrap_or_clone)
            .unwrap_or_default();
        bucket.entries.insert(key.clone(), value);
        self.values.put(identity.clone(), Arc::new(bucket)).await?;
        self.misses.remove(&MissKey::Key(key.clone())).await?;
        self.primary.put(key, identity).await?;

        self.counters.stored();
        Ok(true)
    }

    /// Set the identity's direct value.
    pub async fn shallow_insert(&self, identity: I, value: V) -> ChronicleResult<bool> {
        let Some(_guard) = self.locks.try_acquire(&identity, self.lock_timeout).await else {
            self.abandon_write(&identity);
            return Ok(false);
        };

        let mut bucket = self
            .values
            .get(&identity)
            .await?
            .map(Arc::unwrap_or_clone)
            .unwrap_or_default();
        bucket.direct = Some(value);
        self.misses.remove(&MissKey::Identity(identity.clone())).await?;
        self.values.put(identity, Arc::new(bucket)).await?;

        self.counters.stored();
        Ok(true)
    }

    fn abandon_write(&self, identity: &I) {
        self.counters.abandoned_write();
        tracing::warn!(
            cache = %self.name,
            identity = ?identity,
            timeout_ms = self.lock_timeout.as_millis() as u64,
            "Timed out waiting for identity lock, cache write abandoned"
        );
    }

    /// Record that the loader has nothing for `key`.
    pub async fn mark_missed(&self, key: &K) -> ChronicleResult<()> {
        tracing::debug!(cache = %self.name, key = ?key, "Recording miss tombstone");
        self.misses.put(MissKey::Key(key.clone()), Utc::now()).await
    }

    /// Record that the shallow loader has nothing for `identity`.
    pub async fn mark_missed_identity(&self, identity: &I) -> ChronicleResult<()> {
        tracing::debug!(cache = %self.name, identity = ?identity, "Recording identity miss tombstone");
        self.misses
            .put(MissKey::Identity(identity.clone()), Utc::now())
            .await
    }

    /// Forget everything cached for `identity`, and every tombstone.
    ///
    /// Tombstones cannot be traced back to an identity, so all of them go.
    pub async fn invalidate(&self, identity: &I) -> ChronicleResult<()> {
        let removed = self.values.remove(identity).await?;
        let tombstones = self.misses.clear().await?;
        self.counters.invalidation();
        tracing::debug!(
            cache = %self.name,
            identity = ?identity,
            removed,
            tombstones,
            "Invalidated identity"
        );
        Ok(())
    }

    /// Shut the underlying stores down. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.primary.shutdown().await;
        self.values.shutdown().await;
        self.misses.shutdown().await;
        tracing::debug!(cache = %self.name, "Hierarchical cache shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
