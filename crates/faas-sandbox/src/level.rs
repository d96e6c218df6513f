//! `Level`: a parallel region of sub-tasks spawned by an executing
//! function (§3 "Level"). Grounded on `threads::Level` in
//! `original_source/include/threads/ThreadState.h` and
//! `original_source/src/threads/ThreadState.cpp` — `masterWait` translates
//! directly, a `std::mutex` + `std::condition_variable` + counter guarding
//! "master waits for all non-master threads to finish".

use std::sync::{Condvar, Mutex};

/// A parallel region: `numThreads` threads share one `Level`, coordinate
/// through [`Level::master_wait`] (thread 0 blocks until every other
/// thread has called in) and [`Level::wait_on_barrier`] (a full barrier).
pub struct Level {
    pub depth: i32,
    pub active_levels: i32,
    pub max_active_levels: i32,
    pub num_threads: i32,
    pub shared_var_ptrs: Vec<u32>,
    master_wait: Mutex<i32>,
    master_wait_cv: Condvar,
    barrier: Barrier,
}

impl Level {
    pub fn new(num_threads: i32) -> Self {
        Self {
            depth: 0,
            active_levels: 0,
            max_active_levels: 1,
            num_threads,
            shared_var_ptrs: Vec::new(),
            master_wait: Mutex::new(0),
            master_wait_cv: Condvar::new(),
            barrier: Barrier::new(num_threads.max(1) as usize),
        }
    }

    pub fn from_parent(parent: &Level, num_threads: i32) -> Self {
        let mut level = Level::new(num_threads);
        level.depth = parent.depth + 1;
        level.active_levels = if level.num_threads > 1 {
            parent.active_levels + 1
        } else {
            parent.active_levels
        };
        level.max_active_levels = parent.max_active_levels;
        level
    }

    pub fn max_threads_at_next_level(&self, usable_cores: i32) -> i32 {
        if self.active_levels >= self.max_active_levels {
            return 1;
        }
        usable_cores
    }

    /// Thread 0 blocks until every other thread has called this once;
    /// every other thread increments the counter and returns immediately.
    pub fn master_wait(&self, thread_num: i32) {
        let mut count = self.master_wait.lock().expect("master_wait mutex poisoned");
        if thread_num == 0 {
            while *count < self.num_threads - 1 {
                count = self
                    .master_wait_cv
                    .wait(count)
                    .expect("master_wait condvar poisoned");
            }
            *count = 0;
        } else {
            *count += 1;
            self.master_wait_cv.notify_one();
        }
    }

    /// A full barrier: every thread blocks until `num_threads` have arrived.
    pub fn wait_on_barrier(&self) {
        self.barrier.wait();
    }
}

/// A reusable, cyclic barrier for `n` parties — `std::sync::Barrier`
/// equivalent built on `Mutex`+`Condvar` since a `Level` is constructed
/// once per parallel region and `wait_on_barrier` may be called repeatedly
/// across its lifetime.
struct Barrier {
    n: usize,
    state: Mutex<BarrierState>,
    cv: Condvar,
}

struct BarrierState {
    count: usize,
    generation: u64,
}

impl Barrier {
    fn new(n: usize) -> Self {
        Self {
            n,
            state: Mutex::new(BarrierState { count: 0, generation: 0 }),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut state = self.state.lock().expect("barrier mutex poisoned");
        let generation = state.generation;
        state.count += 1;
        if state.count == self.n {
            state.count = 0;
            state.generation += 1;
            self.cv.notify_all();
        } else {
            while state.generation == generation {
                state = self.cv.wait(state).expect("barrier condvar poisoned");
            }
        }
    }
}
