//! `StateKeyValue`: a per-key memory-mapped region replicated through a
//! shared remote store, with byte-granular dirty tracking. Grounded on
//! `original_source/src/state/StateKeyValue.cpp` and
//! `original_source/include/state/StateKeyValue.h`; translated idiom by
//! idiom rather than line by line (see module docs on [`crate::mmap`] and
//! [`crate::dirty`] for the two biggest departures).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use faas_store::StoreClient;
use faas_types::error::StateError;
use faas_types::RuntimeConfig;

use crate::clock::{Clock, SystemClock};
use crate::dirty::DirtySet;
use crate::mmap::{self, MappedRegion};

struct Inner {
    shared_memory: Option<MappedRegion>,
    dirty: DirtySet,
    is_whole_value_dirty: bool,
    is_partially_dirty: bool,
    empty: bool,
}

/// The central entity of the state layer (§3, §4.B).
///
/// `key` is already namespaced (`"{user}_{name}"`); the registry in
/// [`crate::registry`] is responsible for that prefixing.
pub struct StateKeyValue {
    key: String,
    value_size: usize,
    shared_mem_size: usize,
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn Clock>,
    remote_lock_timeout: Duration,
    remote_lock_wait_time: Duration,
    remote_lock_max_retries: u32,
    idle_threshold: Duration,
    inner: RwLock<Inner>,
    last_interaction: Mutex<Instant>,
}

impl StateKeyValue {
    pub fn new(key: impl Into<String>, value_size: usize, store: Arc<dyn StoreClient>) -> Self {
        Self::with_clock(key, value_size, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        key: impl Into<String>,
        value_size: usize,
        store: Arc<dyn StoreClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = RuntimeConfig::global();
        Self::with_clock_and_config(key, value_size, store, clock, config)
    }

    pub fn with_clock_and_config(
        key: impl Into<String>,
        value_size: usize,
        store: Arc<dyn StoreClient>,
        clock: Arc<dyn Clock>,
        config: &RuntimeConfig,
    ) -> Self {
        let shared_mem_size = mmap::round_up_to_page(value_size.max(1));
        let now = clock.now();
        Self {
            key: key.into(),
            value_size,
            shared_mem_size,
            store,
            clock,
            remote_lock_timeout: config.remote_lock_timeout,
            remote_lock_wait_time: config.remote_lock_wait_time,
            remote_lock_max_retries: config.remote_lock_max_retries,
            idle_threshold: config.state_clear_threshold,
            inner: RwLock::new(Inner {
                shared_memory: None,
                dirty: DirtySet::new(),
                is_whole_value_dirty: false,
                is_partially_dirty: false,
                empty: true,
            }),
            last_interaction: Mutex::new(now),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> usize {
        self.value_size
    }

    pub fn empty(&self) -> bool {
        self.inner.read().empty
    }

    fn lock_key(&self) -> String {
        format!("lock:{}", self.key)
    }

    fn touch(&self) {
        *self.last_interaction.lock() = self.clock.now();
    }

    fn initialise_storage(&self, inner: &mut Inner) -> Result<(), StateError> {
        inner.shared_memory = Some(MappedRegion::new(self.shared_mem_size).map_err(|e| match e {
            StateError::MapFailed { reason, .. } => StateError::MapFailed { key: self.key.clone(), reason },
            other => other,
        })?);
        Ok(())
    }

    /// Force a synchronous read from the remote store.
    pub fn pull(&self) -> Result<(), StateError> {
        self.pull_impl(false)
    }

    fn pull_impl(&self, only_if_empty: bool) -> Result<(), StateError> {
        {
            let guard = self.inner.read();
            if only_if_empty && !guard.empty {
                return Ok(());
            }
        }
        let mut guard = self.inner.write();
        if only_if_empty && !guard.empty {
            return Ok(());
        }
        if guard.shared_memory.is_none() {
            self.initialise_storage(&mut guard)?;
        }
        let remote = self.store.get(&self.key);
        let mem = guard.shared_memory.as_mut().expect("just initialised");
        if let Some(remote) = remote {
            let n = remote.len().min(self.value_size);
            mem.as_mut_slice()[..n].copy_from_slice(&remote[..n]);
        }
        guard.empty = false;
        Ok(())
    }

    /// Lazily pull, then copy the full value into `buffer` (must be
    /// `value_size` bytes).
    pub fn get(&self, buffer: &mut [u8]) -> Result<(), StateError> {
        debug_assert_eq!(buffer.len(), self.value_size);
        self.pull_impl(true)?;
        self.touch();
        let guard = self.inner.read();
        let mem = guard.shared_memory.as_ref().expect("pulled above");
        buffer.copy_from_slice(&mem.as_slice()[..self.value_size]);
        Ok(())
    }

    /// Lazily pull, then copy `length` bytes starting at `offset`.
    pub fn get_segment(&self, offset: usize, buffer: &mut [u8]) -> Result<(), StateError> {
        let end = offset + buffer.len();
        if end > self.value_size {
            return Err(StateError::OutOfBounds {
                key: self.key.clone(),
                offset,
                length: buffer.len(),
                value_size: self.value_size,
            });
        }
        self.pull_impl(true)?;
        self.touch();
        let guard = self.inner.read();
        let mem = guard.shared_memory.as_ref().expect("pulled above");
        buffer.copy_from_slice(&mem.as_slice()[offset..end]);
        Ok(())
    }

    /// Overwrite the full value and flag it wholly dirty.
    pub fn set(&self, buffer: &[u8]) -> Result<(), StateError> {
        debug_assert_eq!(buffer.len(), self.value_size);
        let mut guard = self.inner.write();
        if guard.shared_memory.is_none() {
            self.initialise_storage(&mut guard)?;
        }
        guard.shared_memory.as_mut().expect("just initialised").as_mut_slice()[..self.value_size]
            .copy_from_slice(buffer);
        guard.is_whole_value_dirty = true;
        guard.empty = false;
        self.touch();
        Ok(())
    }

    /// Overwrite `[offset, offset + buffer.len())` and flag it dirty.
    pub fn set_segment(&self, offset: usize, buffer: &[u8]) -> Result<(), StateError> {
        let end = offset + buffer.len();
        if end > self.value_size {
            return Err(StateError::OutOfBounds {
                key: self.key.clone(),
                offset,
                length: buffer.len(),
                value_size: self.value_size,
            });
        }
        let mut guard = self.inner.write();
        if guard.shared_memory.is_none() {
            self.initialise_storage(&mut guard)?;
            guard.empty = false;
        }
        guard.shared_memory.as_mut().expect("just initialised").as_mut_slice()[offset..end]
            .copy_from_slice(buffer);
        guard.is_partially_dirty = true;
        guard.dirty.insert(offset, end);
        drop(guard);
        self.touch();
        Ok(())
    }

    pub fn flag_full_value_dirty(&self) {
        self.inner.write().is_whole_value_dirty = true;
    }

    pub fn flag_segment_dirty(&self, offset: usize, len: usize) {
        let mut guard = self.inner.write();
        guard.is_partially_dirty = true;
        guard.dirty.insert(offset, offset + len);
    }

    /// Clear the cached value unless it was touched within the idle
    /// threshold. Returns whether it actually cleared.
    pub fn clear(&self) -> bool {
        let idle_for = self.clock.now().duration_since(*self.last_interaction.lock());
        if idle_for < self.idle_threshold {
            return false;
        }
        let mut guard = self.inner.write();
        guard.empty = true;
        guard.is_whole_value_dirty = false;
        guard.is_partially_dirty = false;
        guard.dirty.clear();
        true
    }

    /// Remap the owned shared region onto `new_addr` (must be page-aligned).
    pub fn map_shared_memory(&self, new_addr: *mut u8) -> Result<(), StateError> {
        let mut guard = self.inner.write();
        if guard.shared_memory.is_none() {
            self.initialise_storage(&mut guard)?;
        }
        let region = guard.shared_memory.as_mut().expect("just initialised");
        region.remap_onto(new_addr).map_err(|e| match e {
            StateError::Misaligned { addr, .. } => StateError::Misaligned { key: self.key.clone(), addr },
            StateError::MapFailed { reason, .. } => StateError::MapFailed { key: self.key.clone(), reason },
            other => other,
        })
    }

    /// Unmap a previously mapped view at `addr`. If `addr` is this value's
    /// own current mapping, stop tracking it (it no longer needs unmapping
    /// on drop).
    pub fn unmap_shared_memory(&self, addr: *mut u8) -> Result<(), StateError> {
        let mut guard = self.inner.write();
        mmap::unmap_at(addr, self.shared_mem_size).map_err(|e| match e {
            StateError::Misaligned { addr, .. } => StateError::Misaligned { key: self.key.clone(), addr },
            StateError::MapFailed { reason, .. } => StateError::MapFailed { key: self.key.clone(), reason },
            other => other,
        })?;
        if let Some(region) = guard.shared_memory.take() {
            if region.as_ptr() != addr {
                guard.shared_memory = Some(region);
            } else {
                std::mem::forget(region);
            }
        }
        Ok(())
    }

    /// Write the whole region to the remote store if either dirty flag is set.
    pub fn push_full(&self) -> Result<(), StateError> {
        {
            let guard = self.inner.read();
            if !guard.is_whole_value_dirty && !guard.is_partially_dirty {
                return Ok(());
            }
        }
        let mut guard = self.inner.write();
        if !guard.is_whole_value_dirty && !guard.is_partially_dirty {
            return Ok(());
        }
        let mem = guard.shared_memory.as_ref().expect("dirty implies initialised");
        self.store.set(&self.key, &mem.as_slice()[..self.value_size]);
        guard.is_whole_value_dirty = false;
        guard.is_partially_dirty = false;
        guard.dirty.clear();
        Ok(())
    }

    fn wait_on_remote_lock(&self) -> u64 {
        let key = self.lock_key();
        let mut lock_id = self.store.acquire_lock(&key, self.remote_lock_timeout);
        let mut retries = 0;
        while lock_id == 0 {
            if retries >= self.remote_lock_max_retries {
                tracing::error!(key = %self.key, "timed out waiting for remote lock");
                break;
            }
            std::thread::sleep(self.remote_lock_wait_time);
            lock_id = self.store.acquire_lock(&key, self.remote_lock_timeout);
            retries += 1;
        }
        lock_id
    }

    /// Push only the dirty byte ranges, coordinated by a remote lock.
    /// Skipped when the whole value is dirty (push_full supersedes it) or
    /// nothing is partially dirty; a lost lock is a silent skip.
    pub fn push_partial(&self) -> Result<(), StateError> {
        {
            let guard = self.inner.read();
            if guard.is_whole_value_dirty || !guard.is_partially_dirty {
                return Ok(());
            }
        }
        let lock_id = self.wait_on_remote_lock();
        if lock_id == 0 {
            tracing::debug!(key = %self.key, "failed to acquire remote lock, skipping partial push");
            return Ok(());
        }

        let segments = {
            let mut guard = self.inner.write();
            if guard.is_whole_value_dirty || !guard.is_partially_dirty {
                self.store.release_lock(&self.lock_key(), lock_id);
                return Ok(());
            }
            guard.is_partially_dirty = false;
            guard.dirty.take()
        };

        // Pull the current remote value and overlay our dirty runs on top
        // of it, rather than on top of a stale local copy, so a concurrent
        // host's disjoint write survives. Mirrors the original's tempBuff
        // overlay, plus syncing the merged result back into our own view.
        let mut merged = self.store.get(&self.key).unwrap_or_default();
        merged.resize(self.value_size, 0);
        {
            let mut guard = self.inner.write();
            let mem = guard.shared_memory.as_mut().expect("dirty implies initialised");
            for (start, end) in &segments {
                merged[*start..*end].copy_from_slice(&mem.as_slice()[*start..*end]);
            }
            mem.as_mut_slice()[..self.value_size].copy_from_slice(&merged);
        }
        self.store.set(&self.key, &merged);

        self.store.release_lock(&self.lock_key(), lock_id);
        Ok(())
    }

    /// Pin the region for reading across multiple calls. The idiomatic
    /// Rust form of `lockRead`/`unlockRead`: unlocking is the guard's drop.
    pub fn lock_read(&self) -> StateReadGuard<'_> {
        let _ = self.pull_impl(true);
        StateReadGuard {
            guard: self.inner.read(),
            len: self.value_size,
        }
    }

    /// Pin the region for writing across multiple calls.
    pub fn lock_write(&self) -> StateWriteGuard<'_> {
        {
            let mut guard = self.inner.write();
            if guard.shared_memory.is_none() {
                let _ = self.initialise_storage(&mut guard);
                guard.empty = false;
            }
        }
        StateWriteGuard {
            guard: self.inner.write(),
            len: self.value_size,
        }
    }
}

pub struct StateReadGuard<'a> {
    guard: RwLockReadGuard<'a, Inner>,
    len: usize,
}

impl std::ops::Deref for StateReadGuard<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match &self.guard.shared_memory {
            Some(mem) => &mem.as_slice()[..self.len],
            None => &[],
        }
    }
}

pub struct StateWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, Inner>,
    len: usize,
}

impl std::ops::Deref for StateWriteGuard<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match &self.guard.shared_memory {
            Some(mem) => &mem.as_slice()[..self.len],
            None => &[],
        }
    }
}

impl std::ops::DerefMut for StateWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.guard.shared_memory.as_mut().expect("initialised by lock_write")
            .as_mut_slice()[..len]
    }
}
