//! Shared key/value store client and distributed lock primitives (component A, §4.A).
//!
//! `spec.md` treats the remote store as "an opaque handle backed by a
//! shared in-memory data store" with Redis-shaped verbs. [`StoreClient`]
//! is that handle's trait; [`MemoryStore`] is the in-process implementation
//! used everywhere in this workspace (grounded on
//! `original_source/include/scheduler/scheduler.h`, which itself only ever
//! calls a `redis::Redis` handle through the same small verb set). A real
//! network client would be a second implementor of this trait — out of
//! scope per §1.

mod lock;
mod memory;

pub use lock::LockGuard;
pub use memory::MemoryStore;

use std::time::Duration;

use faas_types::error::StateError;

/// Result alias for store operations, erroring with [`StateError::RemoteTimeout`]
/// on dequeue/lock timeouts (the only store-level error kind named in §7).
pub type StoreResult<T> = Result<T, StateError>;

/// The remote store client contract, per §4.A.
///
/// Connections are conceptually per-thread; [`MemoryStore`] is cheap to
/// clone (an `Arc` handle) so each thread can hold its own handle without
/// sharing a single `&self` across a lock boundary, mirroring
/// `infra::Redis::getThreadConnection()` in the original.
pub trait StoreClient: Send + Sync {
    /// Read the full value of `key` into a freshly allocated buffer.
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Overwrite the full value of `key`.
    fn set(&self, key: &str, value: &[u8]);

    /// Overwrite `value.len()` bytes of `key` starting at `offset`,
    /// growing the stored value if necessary (bytes before `offset` in a
    /// newly-grown value are zero-filled).
    fn set_range(&self, key: &str, offset: usize, value: &[u8]);

    /// Attempt to acquire a TTL-bounded lease on `key`.
    /// Returns `0` on contention, a positive lock id on success.
    fn acquire_lock(&self, key: &str, ttl: Duration) -> u64;

    /// Release a lock previously returned by `acquire_lock`. A mismatched
    /// or already-expired `lock_id` is a silent no-op.
    fn release_lock(&self, key: &str, lock_id: u64);

    /// Push `msg` onto the tail of `queue`.
    fn enqueue(&self, queue: &str, msg: Vec<u8>);

    /// Pop the head of `queue`, blocking up to `timeout`.
    /// Returns `Err(StateError::RemoteTimeout)` if nothing arrives in time —
    /// callers treat this as a normal termination signal, per §4.A.
    fn dequeue(&self, queue: &str, timeout: Duration) -> StoreResult<Vec<u8>>;

    /// Add `member` to the string set `key`.
    fn sadd(&self, key: &str, member: &str);

    /// Remove `member` from the string set `key`.
    fn srem(&self, key: &str, member: &str);

    /// List all members of the string set `key`.
    fn smembers(&self, key: &str) -> Vec<String>;

    /// Count the members of the string set `key`.
    fn scard(&self, key: &str) -> usize;

    /// Drop every key, set and queue. Used by tests to isolate runs.
    fn flush_all(&self);
}

/// RAII convenience built on top of [`StoreClient::acquire_lock`]/`release_lock`.
pub fn with_lock<T>(
    store: &dyn StoreClient,
    key: &str,
    ttl: Duration,
    f: impl FnOnce() -> T,
) -> Option<T> {
    let lock_id = store.acquire_lock(key, ttl);
    if lock_id == 0 {
        return None;
    }
    let result = f();
    store.release_lock(key, lock_id);
    Some(result)
}
