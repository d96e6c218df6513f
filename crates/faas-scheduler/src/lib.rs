//! Local queue map, message bus, and the scheduling decision
//! (components E/F/G, §4.E/F/G).

pub mod bus;
pub mod local_queue;
pub mod scheduler;

pub use bus::MessageBus;
pub use local_queue::{BlockingQueue, LocalQueueMap};
pub use scheduler::{Scheduler, GLOBAL_WORKER_SET, INCOMING_QUEUE};
