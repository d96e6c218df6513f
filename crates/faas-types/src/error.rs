//! Error kinds, per §7.
//!
//! Each enum below maps 1:1 onto an abstract kind named in §7; the local
//! handling policy (fatal vs. silently absorbed vs. torn-down) lives with
//! the call site that produces it, not here.

use thiserror::Error;

/// Errors from the state key-value layer (§4.B).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("out of bounds access on {key}: offset {offset} + length {length} > value size {value_size}")]
    OutOfBounds {
        key: String,
        offset: usize,
        length: usize,
        value_size: usize,
    },

    #[error("attempted to map misaligned address {addr:#x} for {key}")]
    Misaligned { key: String, addr: usize },

    #[error("failed to map shared memory for {key}: {reason}")]
    MapFailed { key: String, reason: String },

    #[error("timed out waiting on remote store for {key}")]
    RemoteTimeout { key: String },
}

/// Errors from the sandbox memory manager (§4.D).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("attempted to map misaligned address {addr:#x}")]
    Misaligned { addr: usize },

    #[error("failed to grow/map sandbox memory: {reason}")]
    MapFailed { reason: String },

    #[error("out of bounds sandbox access: offset {offset} + length {length} > brk {brk}")]
    OutOfBounds { offset: usize, length: usize, brk: usize },

    #[error("no snapshot found for key {key}")]
    UnknownSnapshot { key: u64 },

    #[error("sandbox memory exceeds the configured maximum of {max_bytes} bytes")]
    MemoryLimitExceeded { max_bytes: usize },
}

/// Errors from the scheduler (§4.G).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no capacity available for {user}/{function} after exhausting recursion limit")]
    NoCapacity { user: String, function: String },

    #[error("malformed invocation message: {reason}")]
    BadMessage { reason: String },

    #[error("timed out waiting on remote store")]
    RemoteTimeout,
}

/// Errors from the worker pool (§4.H).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("execute called on a worker not bound to any function")]
    Unbound,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    State(#[from] StateError),
}
