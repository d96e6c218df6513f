//! One runnable host: a [`Scheduler`], its [`LocalQueueMap`], a
//! [`MessageBus`] over the shared store, and the state registry, all
//! sharing one [`StoreClient`] handle.

use std::sync::Arc;

use faas_scheduler::{LocalQueueMap, MessageBus, Scheduler};
use faas_state::registry::GlobalState;
use faas_store::StoreClient;
use faas_worker::{Interpreter, WorkerThread};

pub struct Runtime {
    pub hostname: String,
    pub store: Arc<dyn StoreClient>,
    pub scheduler: Arc<Scheduler>,
    pub local_queues: Arc<LocalQueueMap>,
    pub bus: Arc<MessageBus>,
    pub state: Arc<GlobalState>,
}

impl Runtime {
    /// Build a host against `store`, registering it in the global
    /// available-workers set the way `addCurrentHostToWorkerPool` does on
    /// startup.
    pub fn new(hostname: impl Into<String>, store: Arc<dyn StoreClient>) -> Self {
        let hostname = hostname.into();
        let local_queues = Arc::new(LocalQueueMap::new());
        let scheduler = Arc::new(Scheduler::new(hostname.clone(), Arc::clone(&store), Arc::clone(&local_queues)));
        let bus = Arc::new(MessageBus::new(Arc::clone(&store)));
        let state = Arc::new(GlobalState::new(Arc::clone(&store)));
        scheduler.add_current_host_to_worker_pool();
        Self { hostname, store, scheduler, local_queues, bus, state }
    }

    /// Construct one worker thread against this host's shared queues and
    /// store, backed by `interpreter`.
    pub fn spawn_worker(&self, worker_idx: usize, interpreter: Arc<dyn Interpreter>) -> WorkerThread {
        WorkerThread::new(worker_idx, &self.hostname, Arc::clone(&self.store), Arc::clone(&self.local_queues), interpreter)
    }
}
