//! The sandbox memory manager proper (§4.D): `growMemory`/`shrinkMemory`,
//! guard regions, the thread-stack pool, shared-state mapping, and
//! snapshot/restore. One [`Sandbox`] per executing function instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use faas_state::StateKeyValue;
use faas_types::error::SandboxError;

use crate::page::{
    self, DEFAULT_THREAD_STACK_SIZE, GUARD_REGION_SIZE, MAX_MEMORY_BYTES,
};
use crate::region::SandboxRegion;
use crate::stdout::CapturedStdout;

struct Snapshot {
    bytes: Vec<u8>,
}

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-function linear memory, thread-stack pool, shared-state mapping
/// cache, and snapshot registry.
pub struct Sandbox {
    region: SandboxRegion,
    brk: Mutex<usize>,
    thread_stack_size: usize,
    stack_pool: Mutex<Vec<usize>>,
    state_mappings: RwLock<HashMap<String, usize>>,
    snapshots: RwLock<HashMap<u64, Snapshot>>,
    stdout: CapturedStdout,
}

impl Sandbox {
    pub fn new() -> Result<Self, SandboxError> {
        Self::with_stack_size(DEFAULT_THREAD_STACK_SIZE)
    }

    pub fn with_stack_size(thread_stack_size: usize) -> Result<Self, SandboxError> {
        Ok(Self {
            region: SandboxRegion::reserve(MAX_MEMORY_BYTES)?,
            brk: Mutex::new(0),
            thread_stack_size,
            stack_pool: Mutex::new(Vec::new()),
            state_mappings: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            stdout: CapturedStdout::new(),
        })
    }

    pub fn current_brk(&self) -> usize {
        *self.brk.lock()
    }

    /// Grow by enough whole pages to cover `n_bytes`; return the old brk
    /// as the base offset of the newly grown region.
    pub fn grow_memory(&self, n_bytes: usize) -> Result<usize, SandboxError> {
        let grow_by = page::round_up_to_page(n_bytes);
        let mut brk = self.brk.lock();
        let old_brk = *brk;
        let new_brk = old_brk + grow_by;
        if new_brk > self.region.reserved() {
            return Err(SandboxError::MemoryLimitExceeded {
                max_bytes: self.region.reserved(),
            });
        }
        if grow_by > 0 {
            self.region.grow(old_brk, grow_by)?;
        }
        *brk = new_brk;
        Ok(old_brk)
    }

    /// Lower brk by enough whole pages to cover `n_bytes`. The vacated
    /// pages are returned to `PROT_NONE`; re-growing re-faults them in.
    pub fn shrink_memory(&self, n_bytes: usize) -> Result<(), SandboxError> {
        let shrink_by = page::round_up_to_page(n_bytes);
        let mut brk = self.brk.lock();
        let new_brk = brk.saturating_sub(shrink_by);
        let freed = *brk - new_brk;
        if freed > 0 {
            self.region.shrink(new_brk, freed)?;
        }
        *brk = new_brk;
        Ok(())
    }

    /// Grow by [`GUARD_REGION_SIZE`] and mark it read-only. Reads (needed
    /// by snapshotting) still succeed; writes fault.
    pub fn create_memory_guard_region(&self) -> Result<usize, SandboxError> {
        let offset = self.grow_memory(GUARD_REGION_SIZE)?;
        self.region.protect_read_only(offset, GUARD_REGION_SIZE)?;
        Ok(offset)
    }

    fn add_thread_stack_to_pool(&self) -> Result<(), SandboxError> {
        self.create_memory_guard_region()?;
        let stack_offset = self.grow_memory(self.thread_stack_size)?;
        self.create_memory_guard_region()?;
        self.stack_pool.lock().push(stack_offset);
        Ok(())
    }

    /// Pre-populate `cores + 5` thread stacks, each flanked by two guard
    /// regions.
    pub fn create_thread_stack_pool(&self, cores: usize) -> Result<(), SandboxError> {
        let pool_size = cores + 5;
        for _ in 0..pool_size {
            self.add_thread_stack_to_pool()?;
        }
        Ok(())
    }

    pub fn claim_thread_stack(&self) -> Result<usize, SandboxError> {
        {
            let mut pool = self.stack_pool.lock();
            if let Some(stack) = pool.pop() {
                return Ok(stack);
            }
        }
        tracing::warn!("thread stack pool empty, allocating from heap");
        self.add_thread_stack_to_pool()?;
        Ok(self.stack_pool.lock().pop().expect("just pushed"))
    }

    pub fn return_thread_stack(&self, offset: usize) {
        self.stack_pool.lock().push(offset);
    }

    pub fn stack_pool_size(&self) -> usize {
        self.stack_pool.lock().len()
    }

    /// Map a chunk of a state value directly into this sandbox's address
    /// space, memoised on `"{key}__{offset}__{length}"`. A cache hit
    /// returns the cached pointer without remapping anything.
    pub fn map_shared_state_memory(
        &self,
        kv: &Arc<StateKeyValue>,
        offset: usize,
        length: usize,
    ) -> Result<usize, SandboxError> {
        let segment_key = format!("{}__{offset}__{length}", kv.key());
        if let Some(&ptr) = self.state_mappings.read().get(&segment_key) {
            return Ok(ptr);
        }
        let mut mappings = self.state_mappings.write();
        if let Some(&ptr) = mappings.get(&segment_key) {
            return Ok(ptr);
        }

        let (chunk_start, chunk_len, remainder) = page::aligned_chunk(offset, length);
        let _ = chunk_start;
        let base = self.grow_memory(chunk_len)?;
        let native_ptr = self.region.ptr_at(base);
        kv.map_shared_memory(native_ptr)
            .map_err(|_| SandboxError::MapFailed { reason: format!("remap of {segment_key} failed") })?;

        let wasm_ptr = base + remainder;
        mappings.insert(segment_key, wasm_ptr);
        Ok(wasm_ptr)
    }

    /// Snapshot `[0, currentBrk)`. Returns a freshly generated id.
    pub fn snapshot(&self) -> u64 {
        let brk = self.current_brk();
        let bytes = self.region.as_slice(0, brk).to_vec();
        let id = NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed);
        self.snapshots.write().insert(id, Snapshot { bytes });
        id
    }

    /// Grow or shrink to match the snapshot's size, then overwrite
    /// `[0, size)` with the snapshot bytes.
    pub fn restore(&self, id: u64) -> Result<(), SandboxError> {
        let size = {
            let snapshots = self.snapshots.read();
            let snap = snapshots.get(&id).ok_or(SandboxError::UnknownSnapshot { key: id })?;
            snap.bytes.len()
        };
        let current = self.current_brk();
        if size > current {
            self.grow_memory(size - current)?;
        } else if size < current {
            self.shrink_memory(current - size)?;
        }
        let snapshots = self.snapshots.read();
        let snap = snapshots.get(&id).expect("checked above");
        self.region.as_mut_slice(0, size).copy_from_slice(&snap.bytes);
        Ok(())
    }

    pub fn capture_stdout(&self, bytes: &[u8]) {
        self.stdout.write(bytes);
    }

    pub fn captured_stdout(&self) -> Vec<u8> {
        self.stdout.read_all()
    }

    pub fn clear_captured_stdout(&self) {
        self.stdout.clear();
    }
}
