//! Callable payloads: functions, closures, method binds, and upvalues.

use std::rc::Rc;

use crate::{error::RunResult, heap::HeapId, value::Value, vm::Vm};

/// What a native function hands back to the dispatch loop.
pub(crate) enum NativeReturn {
    /// An ordinary result to place in the call's return slot.
    Value(Value),
    /// The native switched the VM's current fiber; the return slot of the
    /// suspended fiber was already arranged by the switch.
    Switched,
}

/// Native function signature.
///
/// `this` is the bound receiver (`Undefined` for plain functions), `args` the
/// call arguments, and `ret` the return-slot index in the calling fiber's
/// stack. `ret` only matters to the fiber-switching natives.
pub(crate) type NativeFn = fn(&mut Vm, Value, &[Value], usize) -> RunResult<NativeReturn>;

/// Compiled bytecode of a script function.
#[derive(Debug)]
pub(crate) struct CodeBlob {
    pub code: Vec<u8>,
    /// Source line per bytecode byte, for tracebacks.
    pub lines: Vec<u32>,
    /// High-water stack usage, computed by the compiler's delta tracking.
    pub stack_size: u16,
}

#[derive(Debug)]
pub(crate) enum FnKind {
    Script(Rc<CodeBlob>),
    Native(NativeFn),
}

#[derive(Debug)]
pub(crate) struct Function {
    pub name: String,
    /// Module the function belongs to; absent for builtins.
    pub owner: Option<HeapId>,
    /// Parameter count, `-1` for variadic natives.
    pub arity: i8,
    pub is_method: bool,
    /// Class a method was bound to, set when the class binds it. Super calls
    /// resolve starting above this class.
    pub owner_class: Option<HeapId>,
    pub upvalue_count: u16,
    pub docs: Option<String>,
    pub kind: FnKind,
}

impl Function {
    pub fn new_script(name: String, owner: HeapId, arity: i8, is_method: bool) -> Self {
        Self {
            name,
            owner: Some(owner),
            arity,
            is_method,
            owner_class: None,
            upvalue_count: 0,
            docs: None,
            kind: FnKind::Script(Rc::new(CodeBlob {
                code: Vec::new(),
                lines: Vec::new(),
                stack_size: 0,
            })),
        }
    }

    pub fn new_native(name: &str, arity: i8, docs: &str, native: NativeFn) -> Self {
        Self {
            name: name.to_owned(),
            owner: None,
            arity,
            is_method: false,
            owner_class: None,
            upvalue_count: 0,
            docs: Some(docs.to_owned()),
            kind: FnKind::Native(native),
        }
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FnKind::Native(_))
    }

    /// Shared handle to the compiled code; panics on natives.
    pub fn code(&self) -> &Rc<CodeBlob> {
        match &self.kind {
            FnKind::Script(code) => code,
            FnKind::Native(_) => panic!("native function has no bytecode"),
        }
    }

    pub fn code_size(&self) -> usize {
        match &self.kind {
            FnKind::Script(code) => code.code.len() + code.lines.len() * 4,
            FnKind::Native(_) => 0,
        }
    }
}

/// A function plus its captured upvalues.
#[derive(Debug)]
pub(crate) struct Closure {
    pub function: HeapId,
    pub upvalues: Vec<HeapId>,
}

/// A method closure paired with a receiver; `Undefined` means unbound.
#[derive(Debug)]
pub(crate) struct MethodBind {
    pub closure: HeapId,
    pub receiver: Value,
}

/// A captured variable: open while the variable still lives on a fiber
/// stack, closed (owning a copy) once that slot dies.
#[derive(Debug)]
pub(crate) struct Upvalue {
    state: UpvalueState,
}

#[derive(Debug)]
enum UpvalueState {
    /// Index of the captured slot in its fiber's value stack.
    Open(usize),
    Closed(Value),
}

impl Upvalue {
    pub fn open(slot: usize) -> Self {
        Self {
            state: UpvalueState::Open(slot),
        }
    }

    /// Stack slot while open, `None` once closed.
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn closed_value(&self) -> Option<Value> {
        match self.state {
            UpvalueState::Open(_) => None,
            UpvalueState::Closed(v) => Some(v),
        }
    }

    pub fn close(&mut self, value: Value) {
        debug_assert!(
            matches!(self.state, UpvalueState::Open(_)),
            "closing an already closed upvalue"
        );
        self.state = UpvalueState::Closed(value);
    }

    /// Rewrites the stored value of a closed upvalue.
    pub fn set_closed(&mut self, value: Value) {
        self.state = UpvalueState::Closed(value);
    }
}
