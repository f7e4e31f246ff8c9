//! Per-entity exclusive access
//!
//! A table of async mutexes keyed by entity id. Holding the guard for a key
//! serializes every read-check-write on that entity, including remote calls
//! made while deciding. Locks are FIFO-fair (tokio mutex) and acquisition is
//! bounded by a timeout.

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{Error, Result};

pub struct EntityLocks<K> {
    kind: &'static str,
    locks: DashMap<K, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl<K> EntityLocks<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    /// `kind` names the entity in lock timeout errors
    #[must_use]
    pub fn new(kind: &'static str, timeout: Duration) -> Self {
        Self {
            kind,
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &K) -> Result<OwnedMutexGuard<()>> {
        // Clone the mutex out so no map shard lock is held while waiting
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();

        tokio::time::timeout(self.timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(kind = self.kind, key = %key, timeout = ?self.timeout, "Lock acquisition timed out");
                Error::LockTimeout(format!("{} {key}", self.kind))
            })
    }

    /// Run `operation` while holding the lock for `key`
    pub async fn with_lock<F, Fut, T>(&self, key: &K, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire(key).await?;
        operation().await
    }

    /// Drop entries nobody holds or waits on; returns how many were removed
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
