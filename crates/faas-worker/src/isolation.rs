//! Isolation primitives, modelled as traits with no-op test doubles.
//!
//! Real Linux network-namespace/cgroup manipulation is out of scope (it
//! needs root/container privileges this test suite does not assume), but
//! `original_source/src/worker/pool.cpp`'s `WorkerThread::initialise`/`finish`
//! calls them at specific points in the lifecycle, so the shape is kept: a
//! namespace indexed by `workerIdx + 1`, added on prewarm and removed on
//! teardown; a cgroup binding added once on prewarm.

/// A network namespace a worker thread joins while prewarm/bound/executing.
pub trait NetworkNamespace: Send + Sync {
    fn add_current_thread(&self);
    fn remove_current_thread(&self);
}

/// No-op network namespace, indexed the same way the original names its
/// `faasm-ns-{n}` namespaces (`workerIdx + 1`).
pub struct NoopNetworkNamespace {
    pub isolation_idx: usize,
    joined: std::sync::atomic::AtomicBool,
}

impl NoopNetworkNamespace {
    pub fn new(isolation_idx: usize) -> Self {
        Self { isolation_idx, joined: std::sync::atomic::AtomicBool::new(false) }
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl NetworkNamespace for NoopNetworkNamespace {
    fn add_current_thread(&self) {
        self.joined.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn remove_current_thread(&self) {
        self.joined.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

/// A cgroup a worker thread binds into on prewarm.
pub trait CGroup: Send + Sync {
    fn add_current_thread(&self);
}

pub struct NoopCGroup;

impl CGroup for NoopCGroup {
    fn add_current_thread(&self) {}
}
