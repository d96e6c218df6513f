//! Token-bounded worker pool and the `WorkerThread` lifecycle state machine
//! (§4.H). Grounded on `WorkerThread`/`startWorkerThreadPool` in
//! `original_source/src/worker/pool.cpp`, kept almost verbatim: network
//! namespace index `workerIdx + 1`, cgroup binding on prewarm, prewarm-target
//! check via `scard`, bind-is-a-no-op-if-target-met.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use faas_sandbox::Sandbox;
use faas_scheduler::{LocalQueueMap, MessageBus};
use faas_store::StoreClient;
use faas_types::config::RuntimeConfig;
use faas_types::error::WorkerError;
use faas_types::message::{FunctionId, Message, MessageType};

use crate::interpreter::Interpreter;
use crate::isolation::{CGroup, NetworkNamespace, NoopCGroup, NoopNetworkNamespace};

/// The set a prewarm-but-unbound worker sits in.
pub const PREWARM_SET: &str = "prewarm";
/// The set a worker with nothing left to do sits in.
pub const COLD_SET: &str = "cold";

/// A blocking counting pool of integer tokens, one per worker slot.
/// Grounded on `util::TokenPool`: `getToken` blocks until a slot is free,
/// `releaseToken` returns it.
pub struct TokenPool {
    slots: Mutex<VecDeque<usize>>,
    available: Condvar,
}

impl TokenPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: Mutex::new((0..size).collect()),
            available: Condvar::new(),
        }
    }

    pub fn get_token(&self) -> usize {
        let mut slots = self.slots.lock();
        loop {
            if let Some(token) = slots.pop_front() {
                return token;
            }
            self.available.wait(&mut slots);
        }
    }

    pub fn release_token(&self, token: usize) {
        self.slots.lock().push_back(token);
        self.available.notify_one();
    }
}

/// A worker thread's place in its lifecycle (§4.H's state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Cold,
    Prewarm,
    Bound,
    Executing,
}

/// One worker: one OS thread, one sandbox, a token held from a [`TokenPool`].
pub struct WorkerThread {
    pub id: String,
    pub worker_idx: usize,
    isolation_idx: usize,
    state: Mutex<WorkerState>,
    current_set: Mutex<Option<String>>,
    store: Arc<dyn StoreClient>,
    local_queues: Arc<LocalQueueMap>,
    bus: Arc<MessageBus>,
    netns: Box<dyn NetworkNamespace>,
    cgroup: Box<dyn CGroup>,
    sandbox: Mutex<Option<Sandbox>>,
    post_bind_snapshot: Mutex<Option<u64>>,
    bound_fid: Mutex<Option<FunctionId>>,
    interpreter: Arc<dyn Interpreter>,
    config: &'static RuntimeConfig,
}

impl WorkerThread {
    pub fn new(
        worker_idx: usize,
        hostname: &str,
        store: Arc<dyn StoreClient>,
        local_queues: Arc<LocalQueueMap>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(Arc::clone(&store)));
        Self::with_isolation(
            worker_idx,
            hostname,
            store,
            local_queues,
            bus,
            interpreter,
            RuntimeConfig::global(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_isolation(
        worker_idx: usize,
        hostname: &str,
        store: Arc<dyn StoreClient>,
        local_queues: Arc<LocalQueueMap>,
        bus: Arc<MessageBus>,
        interpreter: Arc<dyn Interpreter>,
        config: &'static RuntimeConfig,
    ) -> Self {
        let isolation_idx = worker_idx + 1;
        let worker = Self {
            id: format!("{hostname}_{worker_idx}"),
            worker_idx,
            isolation_idx,
            state: Mutex::new(WorkerState::Cold),
            current_set: Mutex::new(None),
            store: Arc::clone(&store),
            local_queues,
            bus,
            netns: Box::new(NoopNetworkNamespace::new(isolation_idx)),
            cgroup: Box::new(NoopCGroup),
            sandbox: Mutex::new(None),
            post_bind_snapshot: Mutex::new(None),
            bound_fid: Mutex::new(None),
            interpreter,
            config,
        };

        let prewarm_count = store.scard(PREWARM_SET);
        if prewarm_count < config.prewarm_target {
            worker.initialise();
        } else {
            worker.update_membership(COLD_SET);
        }
        worker
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// The network namespace index this worker joined (`workerIdx + 1`).
    pub fn isolation_idx(&self) -> usize {
        self.isolation_idx
    }

    pub fn is_bound(&self) -> bool {
        *self.state.lock() == WorkerState::Bound
    }

    /// Move this worker's remote-store set membership from whatever it
    /// currently holds to `new_set`: exactly one `srem` (if it held a
    /// membership) and one `sadd`, matching `updateQueue` in the original.
    fn update_membership(&self, new_set: &str) {
        let mut current = self.current_set.lock();
        if let Some(old) = current.as_deref() {
            if old != new_set {
                self.store.srem(old, &self.id);
                self.store.sadd(new_set, &self.id);
            }
        } else {
            self.store.sadd(new_set, &self.id);
        }
        *current = Some(new_set.to_string());
    }

    /// Allocate isolation resources and a fresh sandbox; become Prewarm.
    pub fn initialise(&self) -> WorkerState {
        self.netns.add_current_thread();
        self.cgroup.add_current_thread();
        *self.sandbox.lock() = Sandbox::new().ok();
        *self.state.lock() = WorkerState::Prewarm;
        self.update_membership(PREWARM_SET);
        tracing::debug!(worker = self.id, "prewarmed");
        WorkerState::Prewarm
    }

    /// Bind to `msg`'s function, unless the function's bound-worker target
    /// is already met, in which case this is a no-op (§4.H).
    pub fn bind_to_function(&self, msg: &Message) -> Result<(), WorkerError> {
        let fid = msg.function_id();
        let target_set = fid.worker_set_name();
        let current_count = self.store.scard(&target_set);
        if current_count >= msg.target as usize {
            tracing::debug!(worker = self.id, user = %fid.user, function = %fid.function, "bind target already met, skipping");
            return Ok(());
        }

        self.update_membership(&target_set);
        self.local_queues.listen_to_queue(&fid);
        *self.bound_fid.lock() = Some(fid.clone());
        *self.state.lock() = WorkerState::Bound;
        tracing::debug!(worker = self.id, user = %fid.user, function = %fid.function, "bound");

        if let Some(sandbox) = self.sandbox.lock().as_ref() {
            *self.post_bind_snapshot.lock() = Some(sandbox.snapshot());
        }
        Ok(())
    }

    /// Run `msg`'s module body through the injected [`Interpreter`],
    /// capture the outcome into the message, and restore the sandbox to its
    /// post-bind clean state afterwards.
    pub fn execute_call(&self, mut msg: Message) -> Message {
        *self.state.lock() = WorkerState::Executing;

        let code = String::from_utf8_lossy(&msg.inputdata).into_owned();
        match self.interpreter.execute(&code) {
            Ok(output) => {
                msg.outputdata = output;
                msg.success = true;
            }
            Err(err) => {
                msg.outputdata = err.into_bytes();
                msg.success = false;
            }
        }

        if let (Some(sandbox), Some(snapshot)) =
            (self.sandbox.lock().as_ref(), *self.post_bind_snapshot.lock())
        {
            let _ = sandbox.restore(snapshot);
        }

        *self.state.lock() = WorkerState::Bound;
        msg
    }

    /// Timeout for the next dequeue, which depends on whether this worker
    /// currently holds a function binding.
    fn dequeue_timeout(&self) -> Duration {
        if self.is_bound() {
            self.config.bound_timeout
        } else {
            self.config.unbound_timeout
        }
    }

    /// Pop and handle exactly one message, `true` to keep looping.
    pub fn process_next_message(&self) -> bool {
        let timeout = self.dequeue_timeout();
        let msg = if let Some(fid) = self.bound_fid.lock().clone() {
            self.local_queues.dequeue(&fid, timeout)
        } else {
            self.local_queues.dequeue_bind(timeout)
        };

        let Some(msg) = msg else {
            return false;
        };

        match msg.msg_type {
            MessageType::Bind => {
                let _ = self.bind_to_function(&msg);
            }
            MessageType::Prewarm => {
                self.initialise();
            }
            MessageType::Call => {
                let finished = self.execute_call(msg);
                self.bus.set_function_result(&finished, finished.success);
            }
        }
        true
    }

    /// Release this worker's set membership, queue subscription and network
    /// namespace. Called once the run loop exits on dequeue timeout.
    pub fn finish(&self) {
        tracing::debug!(worker = self.id, "finishing");
        self.netns.remove_current_thread();
        if let Some(set) = self.current_set.lock().take() {
            self.store.srem(&set, &self.id);
        }
        if let Some(fid) = self.bound_fid.lock().take() {
            self.local_queues.stop_listening_to_queue(&fid);
        }
    }

    /// Drain messages until a dequeue times out, then release this
    /// worker's resources. Mirrors the original's `run()`: loop
    /// `processNextMessage`, `finish()` once it stops finding work.
    pub fn run(&self) {
        while self.process_next_message() {}
        self.finish();
    }
}

/// Spawns [`WorkerThread`]s up to `capacity`, reclaiming the slot when a
/// worker's run loop exits. Mirrors `startWorkerThreadPool`.
pub struct WorkerPool {
    tokens: Arc<TokenPool>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self { tokens: Arc::new(TokenPool::new(capacity)) }
    }

    pub fn capacity(&self) -> usize {
        // VecDeque starts full; this is only meaningful before any token is claimed.
        self.tokens.slots.lock().len()
    }

    pub fn get_token(&self) -> usize {
        self.tokens.get_token()
    }

    pub fn release_token(&self, token: usize) {
        self.tokens.release_token(token);
    }

    /// Claim a slot, build a [`WorkerThread`] and run it to completion on a
    /// dedicated OS thread (§5: "each worker is one OS thread"), releasing
    /// the slot once the run loop exits. Blocks the caller until a slot is
    /// free, matching `getToken`'s blocking contract.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        self: &Arc<Self>,
        worker_idx: usize,
        hostname: impl Into<String>,
        store: Arc<dyn StoreClient>,
        local_queues: Arc<LocalQueueMap>,
        interpreter: Arc<dyn Interpreter>,
    ) -> thread::JoinHandle<()> {
        let pool = Arc::clone(self);
        let hostname = hostname.into();
        let token = pool.get_token();
        thread::Builder::new()
            .name(format!("worker-{hostname}-{worker_idx}"))
            .spawn(move || {
                let worker = WorkerThread::new(worker_idx, &hostname, store, local_queues, interpreter);
                worker.run();
                pool.release_token(token);
            })
            .expect("failed to spawn worker thread")
    }
}

static NEXT_HOSTNAME_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// A deterministic per-process hostname suffix, for tests that spin up
/// several [`WorkerThread`]s without colliding on worker-set membership.
pub fn unique_test_suffix() -> u64 {
    NEXT_HOSTNAME_SUFFIX.fetch_add(1, Ordering::SeqCst)
}
