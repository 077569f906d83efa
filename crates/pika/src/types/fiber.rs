//! Fiber payload: value stack, call frames, open upvalues, and the
//! cooperative state machine.

use strum::Display;

use crate::{heap::HeapId, value::Value};

/// One function invocation on a fiber.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallFrame {
    pub ip: usize,
    pub closure: HeapId,
    /// Return-base index into the fiber stack: `stack[rbp]` is the call's
    /// return slot, `stack[rbp + 1..]` the parameters and locals.
    pub rbp: usize,
    /// Captured receiver; `Undefined` outside methods.
    pub self_value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum FiberState {
    New,
    Running,
    Yielded,
    Done,
}

#[derive(Debug)]
pub(crate) struct Fiber {
    pub state: FiberState,
    /// Root closure the fiber was created from.
    pub closure: HeapId,
    /// Value stack; the stack pointer is its length.
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues into this fiber's stack, sorted by descending slot
    /// (newest, topmost first).
    pub open_upvalues: Vec<HeapId>,
    /// Fiber to switch back to on yield or completion. Severed by yield.
    pub caller: Option<HeapId>,
    /// Stack index where a value delivered by yield/resume/completion lands
    /// while this fiber is suspended mid-switch.
    pub ret_slot: usize,
    /// Error string once the fiber has failed.
    pub error: Option<String>,
}

impl Fiber {
    pub fn new(closure: HeapId) -> Self {
        Self {
            state: FiberState::New,
            closure,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            caller: None,
            ret_slot: 0,
            error: None,
        }
    }

    /// Stand-in left in the heap slot while the fiber's real state is held
    /// by the VM as the active fiber. Reports `Running`, which is the only
    /// observable truth about an active fiber.
    pub fn placeholder(closure: HeapId) -> Self {
        Self {
            state: FiberState::Running,
            closure,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            caller: None,
            ret_slot: 0,
            error: None,
        }
    }

    /// GC child enumeration; mirrors what the VM marks for the active fiber.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        out.push(self.closure);
        for v in &self.stack {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
        for frame in &self.frames {
            out.push(frame.closure);
            if let Value::Ref(id) = frame.self_value {
                out.push(id);
            }
        }
        out.extend_from_slice(&self.open_upvalues);
        if let Some(caller) = self.caller {
            out.push(caller);
        }
    }
}
