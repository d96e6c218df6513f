//! Two-level `user -> (name -> StateKeyValue)` registry and the periodic
//! flush loop (§4.C). Grounded on the `UserState`/`GlobalState` singleton
//! pair described in §3 and on `original_source/include/state/State.h`'s
//! double-checked map insertion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use faas_store::StoreClient;
use faas_types::RuntimeConfig;

use crate::clock::{Clock, SystemClock};
use crate::key_value::StateKeyValue;

/// Per-user map of state keys.
pub struct UserState {
    values: RwLock<HashMap<String, Arc<StateKeyValue>>>,
}

impl Default for UserState {
    fn default() -> Self {
        Self::new()
    }
}

impl UserState {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Return the existing entry for `name`, or construct one sized
    /// `size` if missing. `size == 0` on a missing entry is a caller bug.
    pub fn get_kv(
        &self,
        user: &str,
        name: &str,
        size: usize,
        store: &Arc<dyn StoreClient>,
        clock: &Arc<dyn Clock>,
        config: &RuntimeConfig,
    ) -> Arc<StateKeyValue> {
        if let Some(existing) = self.values.read().get(name) {
            return Arc::clone(existing);
        }
        let mut values = self.values.write();
        if let Some(existing) = values.get(name) {
            return Arc::clone(existing);
        }
        assert!(size > 0, "getKV on a missing key requires a non-zero size");
        let namespaced = format!("{user}_{name}");
        let kv = Arc::new(StateKeyValue::with_clock_and_config(
            namespaced,
            size,
            Arc::clone(store),
            Arc::clone(clock),
            config,
        ));
        values.insert(name.to_string(), Arc::clone(&kv));
        kv
    }

    /// `pushPartial`, then `pushFull`, then `clear`, for every key.
    pub fn push_all(&self) {
        let snapshot: Vec<Arc<StateKeyValue>> = self.values.read().values().cloned().collect();
        for kv in snapshot {
            if let Err(e) = kv.push_partial() {
                tracing::error!(key = kv.key(), error = %e, "push_partial failed");
            }
            if let Err(e) = kv.push_full() {
                tracing::error!(key = kv.key(), error = %e, "push_full failed");
            }
            kv.clear();
        }
    }
}

/// The process-wide `user -> UserState` map.
pub struct GlobalState {
    users: RwLock<HashMap<String, Arc<UserState>>>,
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
}

impl GlobalState {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn StoreClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            store,
            clock,
            config: RuntimeConfig::global().clone(),
        }
    }

    pub fn user(&self, user: &str) -> Arc<UserState> {
        if let Some(existing) = self.users.read().get(user) {
            return Arc::clone(existing);
        }
        let mut users = self.users.write();
        if let Some(existing) = users.get(user) {
            return Arc::clone(existing);
        }
        let state = Arc::new(UserState::new());
        users.insert(user.to_string(), Arc::clone(&state));
        state
    }

    pub fn get_kv(&self, user: &str, name: &str, size: usize) -> Arc<StateKeyValue> {
        self.user(user).get_kv(user, name, size, &self.store, &self.clock, &self.config)
    }

    pub fn push_all(&self) {
        let snapshot: Vec<Arc<UserState>> = self.users.read().values().cloned().collect();
        for user_state in snapshot {
            user_state.push_all();
        }
    }
}

static GLOBAL_STATE: OnceLock<Arc<GlobalState>> = OnceLock::new();

/// The process-wide singleton, lazily constructed on first use against a
/// fresh in-process store. Call [`set_global`] before first use to point it
/// at a specific store instead.
pub fn global_state() -> Arc<GlobalState> {
    Arc::clone(GLOBAL_STATE.get_or_init(|| Arc::new(GlobalState::new(Arc::new(faas_store::MemoryStore::new())))))
}

/// Install a specific `GlobalState` as the singleton. Only the first call
/// wins; later calls are no-ops, mirroring the registry's own
/// double-checked insertion discipline.
pub fn set_global(state: Arc<GlobalState>) {
    let _ = GLOBAL_STATE.set(state);
}

/// A background thread that repeats `push_all` every `push_interval`.
pub struct PushLoop {
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PushLoop {
    pub fn start(state: Arc<GlobalState>, push_interval: std::time::Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            while running_thread.load(Ordering::Relaxed) {
                std::thread::sleep(push_interval);
                if !running_thread.load(Ordering::Relaxed) {
                    break;
                }
                state.push_all();
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PushLoop {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faas_store::MemoryStore;
    use std::time::Duration;

    fn global(store: Arc<dyn StoreClient>) -> GlobalState {
        GlobalState::new(store)
    }

    #[test]
    fn get_kv_returns_the_same_instance_on_repeated_lookup() {
        let global = global(Arc::new(MemoryStore::new()));
        let a = global.get_kv("alice", "counter", 4);
        let b = global.get_kv("alice", "counter", 4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key(), "alice_counter");
    }

    #[test]
    fn separate_users_get_separate_entries() {
        let global = global(Arc::new(MemoryStore::new()));
        let a = global.get_kv("alice", "counter", 4);
        let b = global.get_kv("bob", "counter", 4);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn push_all_writes_every_dirty_key_exactly_once() {
        let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
        let global = global(Arc::clone(&store));
        let a = global.get_kv("alice", "a", 3);
        let b = global.get_kv("alice", "b", 3);
        a.set(&[1, 1, 1]).unwrap();
        b.set(&[2, 2, 2]).unwrap();
        let clean = global.get_kv("alice", "clean", 3);
        clean.pull().unwrap();

        global.push_all();

        assert_eq!(store.get("alice_a"), Some(vec![1, 1, 1]));
        assert_eq!(store.get("alice_b"), Some(vec![2, 2, 2]));
        assert_eq!(store.get("alice_clean"), None);
    }

    #[test]
    fn push_loop_runs_push_all_in_the_background() {
        let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
        let global = Arc::new(global(Arc::clone(&store)));
        let kv = global.get_kv("alice", "bg", 2);
        kv.set(&[9, 9]).unwrap();

        let loop_handle = PushLoop::start(Arc::clone(&global), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(60));
        loop_handle.stop();

        assert_eq!(store.get("alice_bg"), Some(vec![9, 9]));
    }
}
