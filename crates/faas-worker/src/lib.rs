//! Token-bounded worker pool and lifecycle state machine (component H, §4.H).

pub mod chain;
pub mod interpreter;
pub mod isolation;
pub mod worker;

pub use chain::ChainedCallTracker;
pub use interpreter::{EchoInterpreter, Interpreter};
pub use isolation::{CGroup, NetworkNamespace, NoopCGroup, NoopNetworkNamespace};
pub use worker::{TokenPool, WorkerPool, WorkerState, WorkerThread, COLD_SET, PREWARM_SET};
