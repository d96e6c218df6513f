//! Shared data model, configuration and error types for the faas runtime core.
//!
//! This crate has no behaviour of its own beyond small derived helpers; it
//! exists so that `faas-store`, `faas-state`, `faas-sandbox`,
//! `faas-scheduler` and `faas-worker` can all agree on the wire format of an
//! invocation [`Message`], the naming scheme for shared-store keys
//! ([`FunctionId`]), the runtime-tunable [`RuntimeConfig`], and the error
//! kinds every layer above it propagates.

pub mod config;
pub mod error;
pub mod message;

pub use config::RuntimeConfig;
pub use error::{SandboxError, SchedulerError, StateError, WorkerError};
pub use message::{FunctionId, Message, MessageType};
