//! In-process [`StoreClient`] implementation.
//!
//! Backs every "remote" call in this workspace's tests and demo binary with
//! a single shared `Mutex`-guarded structure, standing in for a real Redis
//! deployment the way `original_source` only ever depends on a `redis::Redis`
//! handle's verb set (never the wire protocol). Distinct `MemoryStore`
//! handles cloned from the same `Arc` model distinct hosts sharing one
//! backing store, exactly as multiple Redis clients share one server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use faas_types::error::StateError;

use crate::{StoreClient, StoreResult};

struct Lease {
    lock_id: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Vec<u8>>,
    sets: HashMap<String, HashSet<String>>,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    locks: HashMap<String, Lease>,
}

/// A shared, in-memory stand-in for a remote key/value + queue + lock store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    queue_cv: Condvar,
    next_lock_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            queue_cv: Condvar::new(),
            next_lock_id: AtomicU64::new(1),
        }
    }

    fn prune_expired_lock(inner: &mut Inner, key: &str) {
        let expired = inner
            .locks
            .get(key)
            .is_some_and(|l| Instant::now() >= l.expires_at);
        if expired {
            inner.locks.remove(key);
        }
    }
}

impl StoreClient for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().expect("store mutex poisoned").values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &[u8]) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .values
            .insert(key.to_string(), value.to_vec());
    }

    fn set_range(&self, key: &str, offset: usize, value: &[u8]) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let buf = inner.values.entry(key.to_string()).or_default();
        let end = offset + value.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(value);
    }

    fn acquire_lock(&self, key: &str, ttl: Duration) -> u64 {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        Self::prune_expired_lock(&mut inner, key);
        if inner.locks.contains_key(key) {
            tracing::debug!(key, "lock contended");
            return 0;
        }
        let lock_id = self.next_lock_id.fetch_add(1, Ordering::Relaxed);
        inner.locks.insert(
            key.to_string(),
            Lease {
                lock_id,
                expires_at: Instant::now() + ttl,
            },
        );
        lock_id
    }

    fn release_lock(&self, key: &str, lock_id: u64) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if let Some(lease) = inner.locks.get(key) {
            if lease.lock_id == lock_id {
                inner.locks.remove(key);
            }
        }
    }

    fn enqueue(&self, queue: &str, msg: Vec<u8>) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.queues.entry(queue.to_string()).or_default().push_back(msg);
        self.queue_cv.notify_all();
    }

    fn dequeue(&self, queue: &str, timeout: Duration) -> StoreResult<Vec<u8>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(q) = inner.queues.get_mut(queue) {
                if let Some(msg) = q.pop_front() {
                    return Ok(msg);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(queue, "dequeue timed out");
                return Err(StateError::RemoteTimeout { key: queue.to_string() });
            }
            let (guard, timeout_result) = self
                .queue_cv
                .wait_timeout(inner, remaining)
                .expect("store condvar poisoned");
            inner = guard;
            if timeout_result.timed_out() && inner.queues.get(queue).map(VecDeque::is_empty).unwrap_or(true) {
                tracing::debug!(queue, "dequeue timed out");
                return Err(StateError::RemoteTimeout { key: queue.to_string() });
            }
        }
    }

    fn sadd(&self, key: &str, member: &str) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    fn srem(&self, key: &str, member: &str) {
        if let Some(set) = self.inner.lock().expect("store mutex poisoned").sets.get_mut(key) {
            set.remove(member);
        }
    }

    fn smembers(&self, key: &str) -> Vec<String> {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn scard(&self, key: &str) -> usize {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .sets
            .get(key)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    fn flush_all(&self) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.values.clear();
        inner.sets.clear();
        inner.queues.clear();
        inner.locks.clear();
    }
}
