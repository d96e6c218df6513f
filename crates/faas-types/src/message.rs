//! The invocation [`Message`] and its [`FunctionId`] key, per §3/§6.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Global, process-unique counter backing `Message::new`'s `resultkey` id.
///
/// Matches §6: "`gid` is a process-unique 64-bit id".
static NEXT_GID: AtomicU64 = AtomicU64::new(1);

/// The kind of an invocation record, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Execute the bound function against `inputdata`.
    Call,
    /// A control message asking a worker to bind to a function queue.
    Bind,
    /// A control message asking a cold worker to initialise into prewarm.
    Prewarm,
}

/// The pair `(user, function)` that identifies a function, per §3.
///
/// Derives the shared-store key names used throughout §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId {
    pub user: String,
    pub function: String,
}

impl FunctionId {
    pub fn new(user: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            function: function.into(),
        }
    }

    /// `"queue:{user}/{function}"` — the per-function invocation queue.
    pub fn queue_name(&self) -> String {
        format!("queue:{}/{}", self.user, self.function)
    }

    /// `"workers:{user}/{function}"` — the worker-set membership key.
    pub fn worker_set_name(&self) -> String {
        format!("workers:{}/{}", self.user, self.function)
    }

    /// `"result:{user}/{function}/{gid}"` — a fresh, server-assigned result key.
    pub fn fresh_result_key(&self) -> String {
        let gid = NEXT_GID.fetch_add(1, Ordering::Relaxed);
        format!("result:{}/{}/{gid}", self.user, self.function)
    }
}

/// An invocation record, per §3.
///
/// Immutable along the scheduler path except for the result fields
/// (`outputdata`, `success`), which are written exactly once, by the
/// executing worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub user: String,
    pub function: String,
    /// Ordinal within a chained batch.
    pub idx: u32,
    pub inputdata: Vec<u8>,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub isasync: bool,
    /// Server-chosen identifier for result rendezvous.
    pub resultkey: String,
    pub outputdata: Vec<u8>,
    pub success: bool,
    /// Declared warm-pool size for BIND messages; unused for CALL.
    pub target: u32,
    /// Optional sticky-host affinity hint (§4.G step 3).
    pub affinity_host: Option<String>,
}

impl Message {
    /// Build a fresh CALL message with a server-assigned result key.
    pub fn new_call(user: impl Into<String>, function: impl Into<String>, inputdata: Vec<u8>) -> Self {
        let user = user.into();
        let function = function.into();
        let fid = FunctionId::new(user.clone(), function.clone());
        let resultkey = fid.fresh_result_key();
        Self {
            user,
            function,
            idx: 0,
            inputdata,
            msg_type: MessageType::Call,
            isasync: false,
            resultkey,
            outputdata: Vec::new(),
            success: false,
            target: 0,
            affinity_host: None,
        }
    }

    /// Build a BIND control message asking a worker to join `fid`'s queue.
    pub fn new_bind(fid: &FunctionId, target: u32) -> Self {
        Self {
            user: fid.user.clone(),
            function: fid.function.clone(),
            idx: 0,
            inputdata: Vec::new(),
            msg_type: MessageType::Bind,
            isasync: true,
            resultkey: String::new(),
            outputdata: Vec::new(),
            success: false,
            target,
            affinity_host: None,
        }
    }

    /// Build a PREWARM control message.
    pub fn new_prewarm() -> Self {
        Self {
            user: String::new(),
            function: String::new(),
            idx: 0,
            inputdata: Vec::new(),
            msg_type: MessageType::Prewarm,
            isasync: true,
            resultkey: String::new(),
            outputdata: Vec::new(),
            success: false,
            target: 0,
            affinity_host: None,
        }
    }

    pub fn function_id(&self) -> FunctionId {
        FunctionId::new(self.user.clone(), self.function.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_and_worker_set_names_follow_the_naming_scheme() {
        let fid = FunctionId::new("demo", "echo");
        assert_eq!(fid.queue_name(), "queue:demo/echo");
        assert_eq!(fid.worker_set_name(), "workers:demo/echo");
    }

    #[test]
    fn fresh_result_keys_are_unique_and_namespaced() {
        let fid = FunctionId::new("demo", "echo");
        let a = fid.fresh_result_key();
        let b = fid.fresh_result_key();
        assert_ne!(a, b);
        assert!(a.starts_with("result:demo/echo/"));
        assert!(b.starts_with("result:demo/echo/"));
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = Message::new_call("demo", "echo", b"123".to_vec());
        let json = serde_json::to_string(&msg).expect("serialize");
        let back: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(msg, back);
    }

    #[test]
    fn echo_call_round_trips_byte_for_byte() {
        // Literal scenario from §8: submitting user="demo" function="echo"
        // input="123" async=true must dequeue byte-for-byte identical.
        let mut msg = Message::new_call("demo", "echo", b"123".to_vec());
        msg.isasync = true;
        let encoded = serde_json::to_vec(&msg).expect("serialize");
        let decoded: Message = serde_json::from_slice(&encoded).expect("deserialize");
        assert_eq!(msg, decoded);
    }
}
