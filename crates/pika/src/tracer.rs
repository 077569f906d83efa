//! Execution tracing hooks.
//!
//! A [`VmTracer`] is owned by one interpreter instance; there is no global
//! logger. The VM calls the hooks at instruction dispatch, call/return
//! boundaries, fiber switches, and after each garbage collection cycle.

use std::{cell::RefCell, rc::Rc};

/// One recorded trace event, as captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Instruction { op: &'static str, line: u32 },
    Call { name: String, depth: usize },
    Return { depth: usize },
    FiberSwitch { from: usize, to: usize },
    Gc { freed: usize, live_bytes: usize },
}

/// Hooks into the interpreter's hot paths. All methods default to no-ops.
pub trait VmTracer {
    /// Called before each instruction is executed.
    fn on_instruction(&mut self, _op: &'static str, _line: u32) {}

    /// Called when a new call frame is pushed (or reused by a tail call).
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// Called when a frame returns.
    fn on_return(&mut self, _depth: usize) {}

    /// Called when the VM's current fiber changes; arguments are heap slot
    /// indices of the two fibers.
    fn on_fiber_switch(&mut self, _from: usize, _to: usize) {}

    /// Called after a collection cycle with the number of freed objects and
    /// the surviving byte count.
    fn on_gc(&mut self, _freed: usize, _live_bytes: usize) {}
}

/// Tracer that does nothing; the default.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints call, fiber, and GC events to stderr.
///
/// Instruction events are deliberately not printed; per-opcode output makes
/// even small scripts unreadable. Use [`RecordingTracer`] to inspect those.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_call(&mut self, name: &str, depth: usize) {
        eprintln!("trace: {}call {name}", "  ".repeat(depth));
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("trace: {}return", "  ".repeat(depth));
    }

    fn on_fiber_switch(&mut self, from: usize, to: usize) {
        eprintln!("trace: fiber switch {from} -> {to}");
    }

    fn on_gc(&mut self, freed: usize, live_bytes: usize) {
        eprintln!("trace: gc freed {freed} objects, {live_bytes} bytes live");
    }
}

/// Tracer that records every event into a shared buffer.
///
/// Clones share the buffer, mirroring how the collecting print writer and
/// error sink work.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, op: &'static str, line: u32) {
        self.events
            .borrow_mut()
            .push(TraceEvent::Instruction { op, line });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.events.borrow_mut().push(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.borrow_mut().push(TraceEvent::Return { depth });
    }

    fn on_fiber_switch(&mut self, from: usize, to: usize) {
        self.events
            .borrow_mut()
            .push(TraceEvent::FiberSwitch { from, to });
    }

    fn on_gc(&mut self, freed: usize, live_bytes: usize) {
        self.events
            .borrow_mut()
            .push(TraceEvent::Gc { freed, live_bytes });
    }
}
