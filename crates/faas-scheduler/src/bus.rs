//! Message bus: cross-host work and result rendezvous over a [`StoreClient`] (§4.F).
//!
//! Grounded on `MessageQueue` in
//! `original_source/include/scheduler/scheduler.h`. A result key is a
//! single-producer, single-consumer rendezvous: `setFunctionResult` writes
//! the finished message and `getFunctionResult` blocks on the same key, so
//! it is modelled here as a one-shot queue over the same store primitive
//! used for real multi-item queues.

use std::sync::Arc;
use std::time::Duration;

use faas_store::StoreClient;
use faas_types::error::SchedulerError;
use faas_types::message::Message;

pub struct MessageBus {
    store: Arc<dyn StoreClient>,
}

impl MessageBus {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }

    pub fn enqueue_message(&self, queue: &str, msg: &Message) {
        let bytes = serde_json::to_vec(msg).expect("Message always serialises");
        self.store.enqueue(queue, bytes);
    }

    pub fn next_message(&self, queue: &str, timeout: Duration) -> Result<Message, SchedulerError> {
        let bytes = self.store.dequeue(queue, timeout).map_err(|_| SchedulerError::RemoteTimeout)?;
        serde_json::from_slice(&bytes).map_err(|e| SchedulerError::BadMessage { reason: e.to_string() })
    }

    /// Write `msg`'s result (with `success` set) to its result key.
    pub fn set_function_result(&self, msg: &Message, success: bool) {
        let mut finished = msg.clone();
        finished.success = success;
        let bytes = serde_json::to_vec(&finished).expect("Message always serialises");
        self.store.enqueue(&msg.resultkey, bytes);
    }

    /// Block on `msg`'s result key until its result arrives or `timeout` elapses.
    pub fn get_function_result(&self, msg: &Message, timeout: Duration) -> Result<Message, SchedulerError> {
        self.next_message(&msg.resultkey, timeout)
    }
}
