//! Captured stdout for a sandbox instance.
//!
//! The original redirects a function's stdout into an anonymous
//! memory-backed file descriptor and reads it back from offset zero
//! (`WasmModule::captureStdout`/`getCapturedStdout`). A plain
//! mutex-guarded buffer gets the same externally-visible behaviour
//! without the `memfd_create` round trip, in the spirit of
//! `llm-pyexec`'s own `OutputBuffer`.

use parking_lot::Mutex;

pub struct CapturedStdout {
    buf: Mutex<Vec<u8>>,
}

impl CapturedStdout {
    pub fn new() -> Self {
        Self { buf: Mutex::new(Vec::new()) }
    }

    pub fn write(&self, bytes: &[u8]) {
        self.buf.lock().extend_from_slice(bytes);
    }

    pub fn read_all(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn clear(&self) {
        self.buf.lock().clear();
    }
}

impl Default for CapturedStdout {
    fn default() -> Self {
        Self::new()
    }
}
