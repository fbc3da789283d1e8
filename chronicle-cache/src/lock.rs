//! Per-identity write locks.
//!
//! Writers to one identity's bucket serialise on that identity's mutex;
//! writers to different identities never touch the same mutex. Entries in
//! the lock table exist only while someone holds or waits on them.

use crate::store::CacheKey;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable<I> = Arc<DashMap<I, Arc<Mutex<()>>>>;

/// Table of async mutexes keyed by identity.
pub struct IdentityLocks<I: CacheKey> {
    table: LockTable<I>,
}

impl<I: CacheKey> Default for IdentityLocks<I> {
    fn default() -> Self {
        Self {
            table: Arc::new(DashMap::new()),
        }
    }
}

impl<I: CacheKey> IdentityLocks<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the lock on `identity`.
    ///
    /// Returns `None` on timeout. Never retries.
    pub async fn try_acquire(&self, identity: &I, timeout: Duration) -> Option<IdentityGuard<I>> {
        let entry = TableEntry {
            identity: identity.clone(),
            table: Arc::clone(&self.table),
        };
        // the shard guard from entry() must not live across the await below
        let mutex = Arc::clone(self.table.entry(identity.clone()).or_default().value());

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Some(IdentityGuard {
                _guard: guard,
                _entry: entry,
            }),
            Err(_) => None,
        }
    }

    /// Number of identities currently locked or waited on.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Removes the identity's table entry once the last user lets go.
struct TableEntry<I: CacheKey> {
    identity: I,
    table: LockTable<I>,
}

impl<I: CacheKey> Drop for TableEntry<I> {
    fn drop(&mut self) {
        self.table
            .remove_if(&self.identity, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Held write lock for one identity. Released on drop.
pub struct IdentityGuard<I: CacheKey> {
    // field order matters: the mutex is released before the table entry is
    // considered for removal
    _guard: OwnedMutexGuard<()>,
    _entry: TableEntry<I>,
}
