//! The seam through which the out-of-scope bytecode/Wasm interpreter plugs
//! in (§1 "explicitly out of scope ... via their interfaces only", §4.H).
//!
//! `executeCall` in the original hands the invocation to `WasmModule::execute`;
//! here that's an injected [`Interpreter`] trait object. The concrete
//! implementation wired up by `faas-runtime-cli` treats a `Message`'s
//! `inputdata` as opaque Python source text and runs it through
//! `llm_pyexec::execute`.

/// Runs one invocation's module body and returns its output bytes, or an
/// error message on failure (mapped to `success = false` per §7).
pub trait Interpreter: Send + Sync {
    fn execute(&self, module_body: &str) -> Result<Vec<u8>, String>;
}

/// An [`Interpreter`] that always echoes its input back as output,
/// success. Used by tests in this crate that don't need a real interpreter.
pub struct EchoInterpreter;

impl Interpreter for EchoInterpreter {
    fn execute(&self, module_body: &str) -> Result<Vec<u8>, String> {
        Ok(module_body.as_bytes().to_vec())
    }
}

/// An [`Interpreter`] that always fails, for exercising the error path.
pub struct FailingInterpreter;

impl Interpreter for FailingInterpreter {
    fn execute(&self, _module_body: &str) -> Result<Vec<u8>, String> {
        Err("boom".to_string())
    }
}
