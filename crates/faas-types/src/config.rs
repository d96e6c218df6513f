//! Runtime-tunable configuration, per §6.
//!
//! Every field is read once from its environment variable (if set) by
//! [`RuntimeConfig::from_env`], the same one-shot pattern
//! `llm_pyexec::cache::BytecodeCache::global` uses for
//! `PYEXEC_BYTECODE_CACHE_SIZE`. Call sites that want the process-wide
//! instance should go through [`RuntimeConfig::global`].

use std::sync::OnceLock;
use std::time::Duration;

/// All runtime-tunable values named in §6.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub threads_per_worker: usize,
    pub bound_timeout: Duration,
    pub unbound_timeout: Duration,
    pub global_message_timeout: Duration,
    pub chained_call_timeout: Duration,
    pub push_interval: Duration,
    pub state_stale_threshold: Duration,
    pub state_clear_threshold: Duration,
    pub remote_lock_timeout: Duration,
    pub remote_lock_wait_time: Duration,
    pub remote_lock_max_retries: u32,
    pub module_thread_pool_size: usize,
    pub prewarm_target: usize,
    /// §4.G: `scheduleWaitMillis`.
    pub schedule_wait: Duration,
    /// §4.G: `scheduleRecursionLimit`.
    pub schedule_recursion_limit: u32,
    /// §4.G step 2: local queue length under which a host is "under-saturated".
    pub local_queue_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads_per_worker: 8,
            bound_timeout: Duration::from_secs(5),
            unbound_timeout: Duration::from_secs(2),
            global_message_timeout: Duration::from_secs(10),
            chained_call_timeout: Duration::from_secs(20),
            push_interval: Duration::from_millis(200),
            state_stale_threshold: Duration::from_secs(5),
            state_clear_threshold: Duration::from_secs(120),
            remote_lock_timeout: Duration::from_secs(2),
            remote_lock_wait_time: Duration::from_millis(100),
            remote_lock_max_retries: 5,
            module_thread_pool_size: 4,
            prewarm_target: 2,
            schedule_wait: Duration::from_millis(100),
            schedule_recursion_limit: 10,
            local_queue_threshold: 10,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl RuntimeConfig {
    /// Build a config starting from [`Default`] and overriding any field
    /// whose environment variable is present and parseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("FAAS_THREADS_PER_WORKER") {
            cfg.threads_per_worker = v;
        }
        if let Some(v) = env_u64("FAAS_BOUND_TIMEOUT_MS") {
            cfg.bound_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FAAS_UNBOUND_TIMEOUT_MS") {
            cfg.unbound_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FAAS_PUSH_INTERVAL_MS") {
            cfg.push_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FAAS_STATE_STALE_THRESHOLD_MS") {
            cfg.state_stale_threshold = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FAAS_STATE_CLEAR_THRESHOLD_MS") {
            cfg.state_clear_threshold = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FAAS_REMOTE_LOCK_TIMEOUT_MS") {
            cfg.remote_lock_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FAAS_REMOTE_LOCK_WAIT_MS") {
            cfg.remote_lock_wait_time = Duration::from_millis(v);
        }
        if let Some(v) = env_usize("FAAS_REMOTE_LOCK_MAX_RETRIES") {
            cfg.remote_lock_max_retries = v as u32;
        }
        if let Some(v) = env_usize("FAAS_MODULE_THREAD_POOL_SIZE") {
            cfg.module_thread_pool_size = v;
        }
        if let Some(v) = env_usize("FAAS_PREWARM_TARGET") {
            cfg.prewarm_target = v;
        }
        if let Some(v) = env_usize("FAAS_LOCAL_QUEUE_THRESHOLD") {
            cfg.local_queue_threshold = v;
        }
        cfg
    }

    /// Process-wide singleton, read from the environment exactly once.
    pub fn global() -> &'static RuntimeConfig {
        static INSTANCE: OnceLock<RuntimeConfig> = OnceLock::new();
        INSTANCE.get_or_init(Self::from_env)
    }
}
