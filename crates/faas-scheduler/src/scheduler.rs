//! Core scheduling decision (§4.G). Grounded on `Scheduler` in
//! `original_source/include/scheduler/scheduler.h`, including its constants:
//! `scheduleWaitMillis = 100`, `scheduleRecursionLimit = 10`.

use std::sync::Arc;
use std::thread;

use faas_store::StoreClient;
use faas_types::config::RuntimeConfig;
use faas_types::error::SchedulerError;
use faas_types::message::{FunctionId, Message};

use crate::bus::MessageBus;
use crate::local_queue::LocalQueueMap;

/// Set of hosts currently accepting work, per §6's shared-store naming table.
pub const GLOBAL_WORKER_SET: &str = "available_workers";
/// Cross-host global dispatch queue.
pub const INCOMING_QUEUE: &str = "incoming";

pub struct Scheduler {
    hostname: String,
    store: Arc<dyn StoreClient>,
    bus: MessageBus,
    local_queues: Arc<LocalQueueMap>,
    config: &'static RuntimeConfig,
}

impl Scheduler {
    pub fn new(hostname: impl Into<String>, store: Arc<dyn StoreClient>, local_queues: Arc<LocalQueueMap>) -> Self {
        Self::with_config(hostname, store, local_queues, RuntimeConfig::global())
    }

    pub fn with_config(
        hostname: impl Into<String>,
        store: Arc<dyn StoreClient>,
        local_queues: Arc<LocalQueueMap>,
        config: &'static RuntimeConfig,
    ) -> Self {
        let bus = MessageBus::new(Arc::clone(&store));
        Self { hostname: hostname.into(), store, bus, local_queues, config }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Insert this host into the global available-workers set on startup.
    pub fn add_current_host_to_worker_pool(&self) {
        self.store.sadd(GLOBAL_WORKER_SET, &self.hostname);
    }

    /// Remove this host from the global available-workers set on shutdown.
    pub fn clear(&self) {
        self.store.srem(GLOBAL_WORKER_SET, &self.hostname);
    }

    fn bound_pool_saturated(&self, fid: &FunctionId) -> bool {
        self.local_queues.function_thread_count(fid) >= self.config.threads_per_worker as i64
    }

    /// §4.G steps 1-5.
    pub fn call_function(&self, msg: Message) -> Result<String, SchedulerError> {
        let fid = msg.function_id();
        let worker_set = fid.worker_set_name();
        let members = self.store.smembers(&worker_set);

        if members.iter().any(|h| h == &self.hostname)
            && self.local_queues.function_queue_length(&fid) < self.config.local_queue_threshold
        {
            self.local_queues.enqueue_message(msg);
            return Ok(self.hostname.clone());
        }

        let host = self.update_worker_allocs(&msg)?;
        self.dispatch_to_host(msg, &fid, &host);
        Ok(host)
    }

    fn dispatch_to_host(&self, msg: Message, fid: &FunctionId, host: &str) {
        if host != self.hostname {
            self.bus.enqueue_message(INCOMING_QUEUE, &msg);
            return;
        }
        self.local_queues.enqueue_message(msg);
        if !self.bound_pool_saturated(fid) {
            self.local_queues.enqueue_bind(Message::new_bind(fid, self.config.prewarm_target as u32));
        }
    }

    /// §4.G step 3.
    fn get_best_host_for_function(
        &self,
        msg: &Message,
        fid: &FunctionId,
        members: &[String],
    ) -> Result<String, SchedulerError> {
        if let Some(hint) = &msg.affinity_host {
            if members.iter().any(|h| h == hint) {
                return Ok(hint.clone());
            }
        }

        if !members.is_empty() {
            // Skip the local host if it can take no more bound workers for
            // this function; otherwise any member is a valid pick. The
            // lexicographically smallest candidate keeps the choice
            // deterministic for tests.
            let mut candidates: Vec<&String> = members
                .iter()
                .filter(|h| *h != &self.hostname || !self.bound_pool_saturated(fid))
                .collect();
            candidates.sort();
            if let Some(best) = candidates.first() {
                return Ok((*best).clone());
            }
        }

        // W is empty (or fully excluded): fall back to the global pool,
        // tie-broken by lexical order (headroom is not tracked cross-host
        // in this single-process store, so lexical order is the whole
        // tie-break here).
        let mut available = self.store.smembers(GLOBAL_WORKER_SET);
        available.sort();
        available
            .into_iter()
            .next()
            .ok_or(SchedulerError::NoCapacity { user: msg.user.clone(), function: msg.function.clone() })
    }

    /// §4.G: retries `getBestHostForFunction` up to `scheduleRecursionLimit`
    /// times, `scheduleWaitMillis` apart, failing with `NoCapacity` past the limit.
    pub fn update_worker_allocs(&self, msg: &Message) -> Result<String, SchedulerError> {
        let fid = msg.function_id();
        for attempt in 0..self.config.schedule_recursion_limit {
            let members = self.store.smembers(&fid.worker_set_name());
            if let Ok(host) = self.get_best_host_for_function(msg, &fid, &members) {
                return Ok(host);
            }
            if attempt + 1 < self.config.schedule_recursion_limit {
                tracing::debug!(user = %msg.user, function = %msg.function, attempt, "no host with capacity, retrying");
                thread::sleep(self.config.schedule_wait);
            }
        }
        tracing::warn!(user = %msg.user, function = %msg.function, "scheduler recursion exhausted");
        Err(SchedulerError::NoCapacity { user: msg.user.clone(), function: msg.function.clone() })
    }
}
