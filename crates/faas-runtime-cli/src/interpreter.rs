//! The concrete [`faas_worker::Interpreter`] this binary plugs in: treats a
//! call's module body as Python source text and runs it through
//! `llm_pyexec::execute`, per §4.H's interpreter-seam note.

use faas_worker::Interpreter;
use llm_pyexec::{execute, ExecutionSettings};

pub struct PyExecInterpreter {
    settings: ExecutionSettings,
}

impl PyExecInterpreter {
    pub fn new() -> Self {
        Self { settings: ExecutionSettings::default() }
    }
}

impl Default for PyExecInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for PyExecInterpreter {
    fn execute(&self, module_body: &str) -> Result<Vec<u8>, String> {
        let result = execute(module_body, self.settings.clone());
        if let Some(err) = result.error {
            return Err(format!("{err:?}"));
        }
        if !result.stdout.is_empty() {
            return Ok(result.stdout.into_bytes());
        }
        Ok(result.return_value.unwrap_or_default().into_bytes())
    }
}
