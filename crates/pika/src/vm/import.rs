//! The `IMPORT` opcode: path resolution, module compilation, and the
//! execute-at-most-once guarantee.
//!
//! A module is registered (and its `initialized` flag set) before its body
//! runs, so cyclic imports observe the partially populated module instead of
//! re-entering it. The body executes on a dedicated fiber through the
//! re-entrant interpreter.

use std::path::Path;

use crate::{
    compiler::{compile, CompileOptions},
    error::{RunResult, RuntimeError},
    heap::{HeapData, HeapId},
    types::{Fiber, Module},
    value::Value,
};

use super::Vm;

impl Vm {
    pub(super) fn import_module(&mut self, spec: &str, importer: HeapId) -> RunResult<Value> {
        let importer_dir = self
            .heap
            .get_module(importer)
            .path
            .as_ref()
            .and_then(|p| Path::new(p).parent())
            .map(|p| p.to_string_lossy().into_owned());

        let search_paths = self.search_paths.clone();
        let source = self
            .loader
            .load(spec, importer_dir.as_deref(), &search_paths)
            .map_err(RuntimeError::import)?;

        let key = source.path.clone().unwrap_or_else(|| source.name.clone());
        if let Some(&module) = self.modules.get(&key) {
            return Ok(Value::Ref(module));
        }

        let module = self.alloc(HeapData::Module(Module::new(
            source.name.clone(),
            source.path.clone(),
        )));
        self.modules.insert(key.clone(), module);

        let options = CompileOptions {
            repl_mode: false,
            debug: self.config.debug,
            path: source.path.clone().unwrap_or_else(|| source.name.clone()),
        };
        let closure = match compile(self, module, &source.text, options) {
            Ok(closure) => closure,
            Err(err) => {
                self.modules.remove(&key);
                for diagnostic in &err.diagnostics {
                    self.sink.report(diagnostic);
                }
                return Err(RuntimeError::import(format!(
                    "failed to compile module '{spec}'"
                )));
            }
        };

        self.heap.get_module_mut(module).initialized = true;
        let fiber = self.alloc(HeapData::Fiber(Fiber::new(closure)));
        match self.run_fiber(fiber, &[]) {
            Ok(_) => Ok(Value::Ref(module)),
            Err(err) => {
                self.modules.remove(&key);
                Err(RuntimeError::import(format!(
                    "error while importing module '{spec}': {}",
                    err.message
                )))
            }
        }
    }
}
