//! RAII lock guard over a [`crate::StoreClient`] lease.

use std::sync::Arc;

use crate::StoreClient;

/// Holds a lease acquired via [`StoreClient::acquire_lock`] and releases it
/// on drop. Construct via [`LockGuard::acquire`].
pub struct LockGuard {
    store: Arc<dyn StoreClient>,
    key: String,
    lock_id: u64,
}

impl LockGuard {
    /// Attempt to acquire `key` for `ttl`. Returns `None` on contention
    /// (lock id `0`), mirroring `StateKeyValue::waitOnRemoteLock`'s
    /// single-attempt primitive — retry policy lives with the caller.
    pub fn acquire(store: Arc<dyn StoreClient>, key: &str, ttl: std::time::Duration) -> Option<Self> {
        let lock_id = store.acquire_lock(key, ttl);
        if lock_id == 0 {
            return None;
        }
        Some(Self {
            store,
            key: key.to_string(),
            lock_id,
        })
    }

    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.store.release_lock(&self.key, self.lock_id);
    }
}
