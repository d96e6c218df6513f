//! Chained-call bookkeeping (§4.H "Chained calls").
//!
//! **Supplemented from `original_source`, silence in spec.md**: the spec's
//! `chainCall`/`awaitChainedCall` paragraph names the operations but not the
//! bookkeeping structure behind them; `src/wasm/syscalls_chaining.cpp`'s
//! `makeChainedCall`/`awaitChainedCall` intrinsics (one per executing call,
//! keyed by a small integer "message id") are the source this is grounded on.
//! A child message inherits its parent's `user`; `idx` threads through so a
//! function can tell which chained invocation it is.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use faas_scheduler::{MessageBus, Scheduler};
use faas_types::error::{SchedulerError, WorkerError};
use faas_types::message::Message;

/// Tracks chained calls issued by one executing invocation so their results
/// can later be awaited by the small integer id `chainCall` returns.
pub struct ChainedCallTracker {
    scheduler: Arc<Scheduler>,
    bus: Arc<MessageBus>,
    user: String,
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, Message>>,
}

impl ChainedCallTracker {
    pub fn new(scheduler: Arc<Scheduler>, bus: Arc<MessageBus>, user: impl Into<String>) -> Self {
        Self {
            scheduler,
            bus,
            user: user.into(),
            next_id: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Construct a child message inheriting `user`, schedule it, and return
    /// an id `awaitChainedCall` can later block on.
    pub fn chain_call(
        &self,
        function: &str,
        idx: u32,
        input: Vec<u8>,
    ) -> Result<u32, SchedulerError> {
        let mut child = Message::new_call(self.user.clone(), function.to_string(), input);
        child.idx = idx;
        self.scheduler.call_function(child.clone())?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().insert(id, child);
        Ok(id)
    }

    /// Block on the chained call's result key, returning its success flag.
    pub fn await_chained_call(&self, id: u32, timeout: Duration) -> Result<bool, WorkerError> {
        let msg = self
            .pending
            .lock()
            .remove(&id)
            .ok_or_else(|| WorkerError::Scheduler(SchedulerError::BadMessage {
                reason: format!("no chained call pending for id {id}"),
            }))?;
        let result = self.bus.get_function_result(&msg, timeout)?;
        Ok(result.success)
    }
}
