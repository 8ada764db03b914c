use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cache_store::{CacheStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Semaphore;

use crate::error::{BoxError, CacheError, Result};
use crate::lock::DistributedLock;

/// Cache value wrapper for the logical-expiration policy.
///
/// The entry never physically expires; it is considered stale once
/// `expire_at` has passed, at which point readers keep serving the stale
/// payload while a single background task rebuilds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub expire_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.expire_at
    }
}

/// Sentinel recorded when a backing lookup yields no result.
///
/// Distinct from "absent": a hit on the marker short-circuits the backing
/// store entirely for the duration of the null TTL.
const NULL_MARKER: &str = "";

/// Lease on the per-key rebuild lock; bounds how long a crashed rebuild
/// task can suppress further rebuild attempts.
const REBUILD_LOCK_LEASE: Duration = Duration::from_secs(10);

/// Upper bound on concurrent background rebuild tasks per process.
const MAX_CONCURRENT_REBUILDS: usize = 10;

/// Generic read-through cache over a [`CacheStore`].
///
/// Two read policies: [`read_through`](CacheClient::read_through) caches
/// misses as null markers (penetration defense) and
/// [`read_logical`](CacheClient::read_logical) trades staleness for
/// availability on hot keys (breakdown defense).
pub struct CacheClient<S> {
    store: Arc<S>,
    lock: DistributedLock<S>,
    rebuild_permits: Arc<Semaphore>,
    null_ttl: Duration,
}

impl<S> Clone for CacheClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lock: self.lock.clone(),
            rebuild_permits: self.rebuild_permits.clone(),
            null_ttl: self.null_ttl,
        }
    }
}

impl<S: CacheStore + 'static> CacheClient<S> {
    /// Creates a cache client over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            lock: DistributedLock::new(store.clone()),
            store,
            rebuild_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_REBUILDS)),
            null_ttl: keys::CACHE_NULL_TTL,
        }
    }

    /// Overrides the TTL used for null markers.
    pub fn with_null_ttl(mut self, null_ttl: Duration) -> Self {
        self.null_ttl = null_ttl;
        self
    }

    /// Serializes `value` and stores it under `key` with a physical TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json, Some(ttl)).await?;
        Ok(())
    }

    /// Stores `value` under `key` wrapped in a [`CacheEntry`] that becomes
    /// stale after `refresh_after`. No physical TTL is set.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        refresh_after: Duration,
    ) -> Result<()> {
        let entry = CacheEntry {
            data: value,
            expire_at: Utc::now() + refresh_after,
        };
        let json = serde_json::to_string(&entry)?;
        self.store.set(key, &json, None).await?;
        Ok(())
    }

    /// Pass-through read with null caching.
    ///
    /// A real cached value is returned directly. A cached null marker
    /// returns `None` without touching the backing store. On a miss the
    /// backing `fetch` runs; an empty result is recorded as a null marker
    /// with a short TTL so repeated lookups for the same missing id stop
    /// hammering the backing store.
    ///
    /// No locking: a redundant concurrent fetch wastes work, not
    /// correctness.
    pub async fn read_through<T, K, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        fetch: F,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        K: Display,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, BoxError>>,
    {
        let key = format!("{prefix}{id}");

        if let Some(cached) = self.store.get(&key).await? {
            if cached == NULL_MARKER {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_str(&cached)?));
        }

        match fetch(id).await.map_err(CacheError::Backing)? {
            Some(value) => {
                self.set(&key, &value, ttl).await?;
                Ok(Some(value))
            }
            None => {
                self.store
                    .set(&key, NULL_MARKER, Some(self.null_ttl))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Logical-expiration read with background refresh.
    ///
    /// Assumes the key was pre-populated by a warming step; a miss returns
    /// `None` without a backing call. A fresh entry returns its payload.
    /// A stale entry still returns its payload immediately, and at most
    /// one caller (the one that wins the per-key rebuild lock) spawns a
    /// detached refresh task; everyone else just serves stale. Callers
    /// never block on a rebuild.
    pub async fn read_logical<T, K, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        fetch: F,
        refresh_after: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        K: Display + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Option<T>, BoxError>> + Send,
    {
        let key = format!("{prefix}{id}");

        let Some(cached) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let entry: CacheEntry<T> = serde_json::from_str(&cached)?;
        if entry.is_fresh() {
            return Ok(Some(entry.data));
        }

        let rebuild_resource = format!("rebuild:{key}");
        if let Some(handle) = self
            .lock
            .try_acquire(&rebuild_resource, REBUILD_LOCK_LEASE)
            .await?
        {
            // Won the rebuild lock; hand the refresh to a background task
            // so this request still returns the stale payload immediately.
            match self.rebuild_permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    let store = self.store.clone();
                    let lock = self.lock.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let outcome = rebuild(&*store, &key, id, fetch, refresh_after).await;
                        if let Err(error) = outcome {
                            tracing::warn!(%key, %error, "cache rebuild failed");
                        }
                        // Release must run whatever the fetch did.
                        if let Err(error) = lock.release(&handle).await {
                            tracing::warn!(%key, %error, "failed to release rebuild lock");
                        }
                    });
                }
                Err(_) => {
                    // Rebuild pool saturated; let the lease lapse later
                    // rather than queueing unbounded work.
                    tracing::warn!(%key, "rebuild pool saturated, skipping refresh");
                    let _ = self.lock.release(&handle).await;
                }
            }
        }

        Ok(Some(entry.data))
    }
}

async fn rebuild<S, T, K, F, Fut>(
    store: &S,
    key: &str,
    id: K,
    fetch: F,
    refresh_after: Duration,
) -> Result<()>
where
    S: CacheStore,
    T: Serialize,
    K: Display,
    F: FnOnce(K) -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, BoxError>>,
{
    match fetch(id).await.map_err(CacheError::Backing)? {
        Some(value) => {
            let entry = CacheEntry {
                data: value,
                expire_at: Utc::now() + refresh_after,
            };
            let json = serde_json::to_string(&entry)?;
            store.set(key, &json, None).await?;
            Ok(())
        }
        None => {
            // Keep serving the stale entry; flipping a hot key to a miss is
            // exactly what the logical policy exists to avoid.
            tracing::warn!(%key, "backing fetch returned nothing during rebuild, keeping stale entry");
            Ok(())
        }
    }
}
