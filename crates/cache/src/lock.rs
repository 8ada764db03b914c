use std::sync::Arc;
use std::time::Duration;

use cache_store::{CacheStore, keys};
use uuid::Uuid;

use crate::Result;

/// Proof of lock ownership.
///
/// The token is unique per acquisition attempt, so a handle can only ever
/// release the exact acquisition it came from. Holding a handle past its
/// lease does not keep the lock alive.
#[derive(Debug, Clone)]
pub struct LockHandle {
    resource: String,
    token: String,
    lease: Duration,
}

impl LockHandle {
    /// The resource name this handle was acquired for.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The owner token stored in the cache for this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The lease the lock was acquired with.
    pub fn lease(&self) -> Duration {
        self.lease
    }
}

/// Cooperative mutual exclusion across process instances, keyed by name.
///
/// Acquisition is a single set-if-absent-with-expiry against the shared
/// cache store; release is an atomic compare-and-delete on the owner token.
/// The lease is a safety net against crashed holders, not the primary
/// release mechanism: holders release explicitly on every exit path.
pub struct DistributedLock<S> {
    store: Arc<S>,
}

impl<S> Clone for DistributedLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: CacheStore> DistributedLock<S> {
    /// Creates a lock client over the given cache store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Attempts to acquire `resource` for `lease`.
    ///
    /// Never blocks: returns `None` when the lock is already held, and it
    /// is up to the caller to retry, back off or abandon.
    pub async fn try_acquire(&self, resource: &str, lease: Duration) -> Result<Option<LockHandle>> {
        let token = Uuid::new_v4().to_string();
        let key = format!("{}{}", keys::LOCK_KEY, resource);
        let acquired = self.store.set_if_absent(&key, &token, lease).await?;
        if acquired {
            tracing::debug!(resource, "lock acquired");
            Ok(Some(LockHandle {
                resource: resource.to_string(),
                token,
                lease,
            }))
        } else {
            Ok(None)
        }
    }

    /// Releases a previously acquired lock.
    ///
    /// Returns `false` when the stored token no longer matches the handle,
    /// i.e. the lease expired and the lock was re-acquired by another
    /// holder; in that case nothing is deleted.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let key = format!("{}{}", keys::LOCK_KEY, handle.resource);
        let released = self.store.compare_and_delete(&key, &handle.token).await?;
        if !released {
            tracing::debug!(resource = %handle.resource, "lock already expired and taken over, not released");
        }
        Ok(released)
    }
}
