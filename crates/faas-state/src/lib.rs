//! Distributed state key-value layer (components B and C, §4.B-§4.C).
//!
//! A [`key_value::StateKeyValue`] is a per-key, memory-mapped byte region
//! replicated through a [`faas_store::StoreClient`]; a [`registry::GlobalState`]
//! is the process-wide `user -> (name -> StateKeyValue)` map that owns them
//! and periodically flushes dirty ones.

pub mod clock;
pub mod dirty;
pub mod key_value;
mod mmap;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dirty::{merge_segments, DirtySet};
pub use key_value::{StateKeyValue, StateReadGuard, StateWriteGuard};
pub use mmap::{host_page_size, is_page_aligned, round_up_to_page};
pub use registry::{global_state, set_global, GlobalState, PushLoop, UserState};
