//! Per-function in-memory blocking queues and the shared bind queue (§4.E).
//!
//! Grounded on `LocalQueueMap` in
//! `original_source/include/scheduler/scheduler.h`: a process-wide map from
//! function id to its own queue, plus one bind queue shared by every
//! function, plus a bound-count snapshot the scheduler consults without
//! touching the queues themselves.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use faas_types::message::{FunctionId, Message};

/// A bounded, blocking FIFO queue of messages.
///
/// Built on `Mutex<VecDeque<_>>` + `Condvar`, the same shape
/// `llm-pyexec`'s interpreter pool uses for its slot dispatch queue.
pub struct BlockingQueue {
    inner: Mutex<VecDeque<Message>>,
    not_empty: Condvar,
}

impl BlockingQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    pub fn push(&self, msg: Message) {
        self.inner.lock().push_back(msg);
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the head, blocking up to `timeout`. `None` on timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Message> {
        let mut guard = self.inner.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(msg) = guard.pop_front() {
                return Some(msg);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if self.not_empty.wait_for(&mut guard, remaining).timed_out() {
                return None;
            }
        }
    }
}

impl Default for BlockingQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide singleton: one [`BlockingQueue`] per function, one shared
/// bind queue, and a bound-count snapshot for the scheduler's fast path.
pub struct LocalQueueMap {
    bind_queue: BlockingQueue,
    queues: RwLock<HashMap<FunctionId, BlockingQueue>>,
    bound_counts: RwLock<HashMap<FunctionId, AtomicI64>>,
}

impl LocalQueueMap {
    pub fn new() -> Self {
        Self {
            bind_queue: BlockingQueue::new(),
            queues: RwLock::new(HashMap::new()),
            bound_counts: RwLock::new(HashMap::new()),
        }
    }

    fn with_queue<R>(&self, fid: &FunctionId, f: impl FnOnce(&BlockingQueue) -> R) -> R {
        if let Some(q) = self.queues.read().get(fid) {
            return f(q);
        }
        let mut queues = self.queues.write();
        queues.entry(fid.clone()).or_insert_with(BlockingQueue::new);
        f(queues.get(fid).expect("just inserted"))
    }

    /// Dispatch `msg` to its function's queue, creating the queue on first use.
    pub fn enqueue_message(&self, msg: Message) {
        let fid = msg.function_id();
        self.with_queue(&fid, |q| q.push(msg));
    }

    /// Push a `BIND` control message onto the queue shared by every function.
    pub fn enqueue_bind(&self, msg: Message) {
        self.bind_queue.push(msg);
    }

    /// Pop a message for `fid`, creating its queue on first use.
    pub fn dequeue(&self, fid: &FunctionId, timeout: Duration) -> Option<Message> {
        self.with_queue(fid, |q| q.pop_timeout(timeout))
    }

    /// Pop a `BIND` control message from the shared bind queue.
    pub fn dequeue_bind(&self, timeout: Duration) -> Option<Message> {
        self.bind_queue.pop_timeout(timeout)
    }

    pub fn function_queue_length(&self, fid: &FunctionId) -> usize {
        self.with_queue(fid, |q| q.len())
    }

    /// Atomically increment the bound count for `fid` and ensure its queue
    /// exists. Mirrors `LocalQueueMap::listenToQueue` (the "register a new
    /// listener" half; the queue itself never needs a handle returned to
    /// the caller since every access goes back through this map).
    pub fn listen_to_queue(&self, fid: &FunctionId) {
        self.with_queue(fid, |_| {});
        self.ensure_counter(fid);
        self.bound_counts.read()[fid].fetch_add(1, Ordering::SeqCst);
    }

    pub fn stop_listening_to_queue(&self, fid: &FunctionId) {
        self.ensure_counter(fid);
        self.bound_counts.read()[fid].fetch_sub(1, Ordering::SeqCst);
    }

    pub fn function_thread_count(&self, fid: &FunctionId) -> i64 {
        if let Some(c) = self.bound_counts.read().get(fid) {
            return c.load(Ordering::SeqCst);
        }
        0
    }

    fn ensure_counter(&self, fid: &FunctionId) {
        if self.bound_counts.read().contains_key(fid) {
            return;
        }
        self.bound_counts
            .write()
            .entry(fid.clone())
            .or_insert_with(|| AtomicI64::new(0));
    }

    pub fn clear(&self) {
        self.queues.write().clear();
        self.bound_counts.write().clear();
    }
}

impl Default for LocalQueueMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid() -> FunctionId {
        FunctionId::new("demo", "echo")
    }

    #[test]
    fn enqueue_then_dequeue_round_trips() {
        let map = LocalQueueMap::new();
        let msg = Message::new_call("demo", "echo", b"1".to_vec());
        map.enqueue_message(msg.clone());
        let out = map.dequeue(&fid(), Duration::from_millis(100)).unwrap();
        assert_eq!(out, msg);
    }

    #[test]
    fn dequeue_on_empty_queue_times_out() {
        let map = LocalQueueMap::new();
        assert!(map.dequeue(&fid(), Duration::from_millis(20)).is_none());
    }

    #[test]
    fn bind_queue_is_shared_across_functions() {
        let map = LocalQueueMap::new();
        let other = FunctionId::new("demo", "other");
        map.enqueue_bind(Message::new_bind(&fid(), 2));
        map.enqueue_bind(Message::new_bind(&other, 3));
        assert!(map.dequeue_bind(Duration::from_millis(100)).is_some());
        assert!(map.dequeue_bind(Duration::from_millis(100)).is_some());
    }

    #[test]
    fn listen_and_stop_listening_track_bound_count() {
        let map = LocalQueueMap::new();
        assert_eq!(map.function_thread_count(&fid()), 0);
        map.listen_to_queue(&fid());
        map.listen_to_queue(&fid());
        assert_eq!(map.function_thread_count(&fid()), 2);
        map.stop_listening_to_queue(&fid());
        assert_eq!(map.function_thread_count(&fid()), 1);
    }

    #[test]
    fn clear_resets_queues_and_counts() {
        let map = LocalQueueMap::new();
        map.listen_to_queue(&fid());
        map.enqueue_message(Message::new_call("demo", "echo", b"1".to_vec()));
        map.clear();
        assert_eq!(map.function_thread_count(&fid()), 0);
        assert_eq!(map.function_queue_length(&fid()), 0);
    }
}
