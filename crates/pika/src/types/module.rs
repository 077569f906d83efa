//! Module payload: constant pool, globals, and the body closure.

use crate::{
    error::{ErrorKind, RunResult, RuntimeError},
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// Hard cap on globals per module; global indices travel as single bytes.
pub(crate) const MAX_GLOBALS: usize = 256;
/// Hard cap on constants per module; constant indices travel as 16 bits.
pub(crate) const MAX_CONSTANTS: usize = 65536;

#[derive(Debug)]
pub(crate) struct Module {
    pub name: String,
    /// Resolved filesystem path, absent for the REPL and source-string runs.
    pub path: Option<String>,
    /// Deduplicated literal pool referenced by 16-bit indices in bytecode.
    pub constants: Vec<Value>,
    pub globals: Vec<Value>,
    /// Per-global index into `constants` of the global's name string.
    pub global_names: Vec<u16>,
    /// Body closure, set once compilation of the module completes.
    pub body: Option<HeapId>,
    /// Set immediately before the body runs, so a cyclic import sees the
    /// partially populated module instead of re-running it.
    pub initialized: bool,
}

impl Module {
    pub fn new(name: String, path: Option<String>) -> Self {
        Self {
            name,
            path,
            constants: Vec::new(),
            globals: Vec::new(),
            global_names: Vec::new(),
            body: None,
            initialized: false,
        }
    }

    /// Looks up a global slot by name, resolving name constants via the heap.
    pub fn global_index(&self, name: &str, heap: &Heap) -> Option<usize> {
        self.global_names.iter().position(|&name_idx| {
            match self.constants.get(name_idx as usize) {
                Some(Value::Ref(id)) => match heap.get(*id) {
                    HeapData::Str(s) => s.as_str() == name,
                    _ => false,
                },
                _ => false,
            }
        })
    }
}

/// Adds `value` to the module's constant pool, deduplicating against the
/// existing entries. Errors when the pool is full.
pub(crate) fn add_constant(heap: &mut Heap, module: HeapId, value: Value) -> RunResult<u16> {
    let existing = {
        let m = heap.get_module(module);
        m.constants.iter().position(|c| c.equals(&value, heap))
    };
    if let Some(index) = existing {
        return Ok(index as u16);
    }
    let m = heap.get_module_mut(module);
    if m.constants.len() >= MAX_CONSTANTS {
        return Err(RuntimeError::new(
            ErrorKind::Semantic,
            "too many constants in one module",
        ));
    }
    let index = m.constants.len() as u16;
    m.constants.push(value);
    Ok(index)
}

/// Adds a new global named by the constant at `name_idx`, returning its slot.
pub(crate) fn add_global(heap: &mut Heap, module: HeapId, name_idx: u16) -> RunResult<u8> {
    let m = heap.get_module_mut(module);
    if m.globals.len() >= MAX_GLOBALS {
        return Err(RuntimeError::new(
            ErrorKind::Semantic,
            "too many globals in one module",
        ));
    }
    let index = m.globals.len() as u8;
    m.globals.push(Value::Null);
    m.global_names.push(name_idx);
    Ok(index)
}
