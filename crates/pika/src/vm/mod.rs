//! The virtual machine: interpreter state, the dispatch loop, fiber
//! switching, and garbage-collection orchestration.
//!
//! The dispatch loop works against a cached copy of the current frame's hot
//! state (code handle, instruction pointer, return base). Anything that
//! mutates the frame stack — calls, returns, fiber switches, caught
//! allocations — syncs the instruction pointer back and reloads the cache.
//!
//! The fiber currently executing is *taken out* of its heap slot for the
//! duration (a placeholder reporting `running` stays behind) so the loop can
//! borrow its stacks mutably while the rest of the heap stays reachable. The
//! collector treats the taken-out fiber as a root alongside the module
//! registry, the builtin arrays, the temp-root stack, and the in-flight
//! compiler objects.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod import;

use ahash::AHashMap;
use call::CallAction;
use smallvec::SmallVec;
use std::rc::Rc;

use crate::{
    error::{ErrorSink, RunResult, RuntimeError, StderrSink},
    heap::{GcTuning, Heap, HeapData, HeapId},
    io::{PrintWriter, StdPrint},
    opcode::Opcode,
    resolve::{FsLoader, ModuleLoader},
    run::Config,
    tracer::{NoopTracer, VmTracer},
    types::{CallFrame, Closure, CodeBlob, Fiber, FiberState, NativeReturn, Upvalue},
    value::Value,
};

/// The running fiber, temporarily owned by the VM instead of its heap slot.
pub(crate) struct ActiveFiber {
    pub id: HeapId,
    pub fiber: Fiber,
}

/// Cached hot state of the current frame.
pub(crate) struct CachedFrame {
    pub code: Rc<CodeBlob>,
    pub ip: usize,
    pub rbp: usize,
    pub closure: HeapId,
    pub module: HeapId,
    pub self_value: Value,
}

macro_rules! fetch_u8 {
    ($cf:expr) => {{
        let byte = $cf.code.code[$cf.ip];
        $cf.ip += 1;
        byte
    }};
}

macro_rules! fetch_u16 {
    ($cf:expr) => {{
        let hi = $cf.code.code[$cf.ip];
        let lo = $cf.code.code[$cf.ip + 1];
        $cf.ip += 2;
        u16::from_be_bytes([hi, lo])
    }};
}

/// Reloads the cached frame after any frame-stack mutation.
macro_rules! reload {
    ($self:expr, $cf:ident) => {
        $cf = $self.cached_frame();
    };
}

/// Syncs the cached instruction pointer back to the live frame.
macro_rules! sync_ip {
    ($self:expr, $cf:expr) => {
        $self
            .fiber_mut()
            .frames
            .last_mut()
            .expect("sync without a frame")
            .ip = $cf.ip;
    };
}

/// Evaluates a fallible operation; on error, syncs the instruction pointer,
/// reports the failure with a frame walk, and returns out of the dispatch.
macro_rules! vm_try {
    ($self:expr, $cf:expr, $expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => {
                sync_ip!($self, $cf);
                return Err($self.throw(err));
            }
        }
    };
}

pub(crate) struct Vm {
    pub heap: Heap,
    /// Module registry keyed by resolved path (or logical name).
    pub modules: AHashMap<String, HeapId>,
    pub search_paths: Vec<String>,
    /// Builtin functions as closure objects, indexed by `PUSH_BUILTIN_FN`.
    pub builtin_fns: Vec<HeapId>,
    /// Builtin classes, indexed by `PUSH_BUILTIN_TY`.
    pub builtin_classes: Vec<HeapId>,
    /// Roots for values native helpers hold across allocation points.
    pub temp_roots: SmallVec<[Value; 8]>,
    /// Roots for the in-flight compiler: the module under compilation is in
    /// the registry; this holds the functions still being built.
    pub compiler_roots: Vec<HeapId>,
    pub active: Option<ActiveFiber>,
    /// Entry fibers of nested `run_fiber` calls (imports re-enter the
    /// interpreter); roots while suspended.
    fiber_stack: Vec<HeapId>,
    pub config: Config,
    pub writer: Box<dyn PrintWriter>,
    pub sink: Box<dyn ErrorSink>,
    pub tracer: Box<dyn VmTracer>,
    pub loader: Box<dyn ModuleLoader>,
    /// Frame walk of the most recent runtime failure.
    pub last_trace: String,
    gray: Vec<HeapId>,
    scratch: Vec<HeapId>,
}

impl Vm {
    pub fn new(config: Config) -> Self {
        let tuning = GcTuning {
            min_heap_size: config.min_heap_size,
            heap_fill_percent: config.heap_fill_percent,
        };
        let mut vm = Self {
            heap: Heap::new(tuning),
            modules: AHashMap::new(),
            search_paths: config.search_paths.clone(),
            builtin_fns: Vec::new(),
            builtin_classes: Vec::new(),
            temp_roots: SmallVec::new(),
            compiler_roots: Vec::new(),
            active: None,
            fiber_stack: Vec::new(),
            config,
            writer: Box::new(StdPrint),
            sink: Box::new(StderrSink),
            tracer: Box::new(NoopTracer),
            loader: Box::new(FsLoader),
            last_trace: String::new(),
            gray: Vec::new(),
            scratch: Vec::new(),
        };
        crate::builtins::install(&mut vm);
        vm
    }

    // ------------------------------------------------------------------
    // Allocation and collection

    /// Allocates through the collection trigger: the heap's byte accounting
    /// may schedule a full collection before the new object is created.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.insert(data)
    }

    pub fn alloc_string(&mut self, text: String) -> Value {
        let id = self.alloc(HeapData::Str(crate::types::Str::new(text)));
        Value::Ref(id)
    }

    /// Full mark-and-sweep cycle. Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.heap.begin_collection();
        let mut gray = std::mem::take(&mut self.gray);
        let mut kids = std::mem::take(&mut self.scratch);
        gray.clear();

        // Roots: the running fiber (its guts live outside the heap while
        // active), suspended entry fibers, the module registry, builtins,
        // temp roots, and whatever the compiler has in flight.
        if let Some(active) = &self.active {
            self.heap.mark_object(active.id, &mut gray);
            kids.clear();
            active.fiber.collect_children(&mut kids);
            for id in kids.drain(..) {
                self.heap.mark_object(id, &mut gray);
            }
        }
        for id in &self.fiber_stack {
            self.heap.mark_object(*id, &mut gray);
        }
        for id in self.modules.values() {
            self.heap.mark_object(*id, &mut gray);
        }
        for id in &self.builtin_fns {
            self.heap.mark_object(*id, &mut gray);
        }
        for id in &self.builtin_classes {
            self.heap.mark_object(*id, &mut gray);
        }
        for value in &self.temp_roots {
            self.heap.mark_value(*value, &mut gray);
        }
        for id in &self.compiler_roots {
            self.heap.mark_object(*id, &mut gray);
        }

        // Drain the gray worklist, blackening as we go.
        while let Some(id) = gray.pop() {
            kids.clear();
            self.heap.children_of(id, &mut kids);
            for child in &kids {
                self.heap.mark_object(*child, &mut gray);
            }
        }

        self.gray = gray;
        self.scratch = kids;
        let freed = self.heap.sweep();
        self.tracer.on_gc(freed, self.heap.bytes_allocated());
        freed
    }

    // ------------------------------------------------------------------
    // Builtin lookups (used by the compiler)

    pub fn find_builtin_fn(&self, name: &str) -> Option<u8> {
        self.builtin_fns.iter().position(|&closure| {
            let function = self.heap.get_closure(closure).function;
            self.heap.get_function(function).name == name
        }).map(|i| i as u8)
    }

    pub fn find_builtin_class(&self, name: &str) -> Option<u8> {
        self.builtin_classes
            .iter()
            .position(|&class| self.heap.get_class(class).name == name)
            .map(|i| i as u8)
    }

    // ------------------------------------------------------------------
    // Fiber plumbing

    pub(crate) fn fiber(&self) -> &Fiber {
        &self.active.as_ref().expect("no active fiber").fiber
    }

    pub(crate) fn fiber_mut(&mut self) -> &mut Fiber {
        &mut self.active.as_mut().expect("no active fiber").fiber
    }

    pub(crate) fn active_id(&self) -> HeapId {
        self.active.as_ref().expect("no active fiber").id
    }

    fn push(&mut self, value: Value) {
        self.fiber_mut().stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.fiber_mut().stack.pop().expect("value stack underflow")
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        let stack = &self.fiber().stack;
        stack[stack.len() - 1 - distance]
    }

    /// Takes a fiber's payload out of its heap slot, leaving a placeholder.
    fn take_fiber(&mut self, id: HeapId) -> Fiber {
        let closure = self.heap.get_fiber(id).closure;
        let data = self
            .heap
            .replace(id, HeapData::Fiber(Fiber::placeholder(closure)));
        match data {
            HeapData::Fiber(fiber) => fiber,
            other => panic!("expected Fiber, found {}", other.kind_name()),
        }
    }

    /// Writes the active fiber back into its heap slot.
    fn park_active(&mut self) {
        if let Some(active) = self.active.take() {
            self.heap.replace(active.id, HeapData::Fiber(active.fiber));
        }
    }

    /// Runs a prepared fiber to completion and returns its result.
    ///
    /// Re-entrant: module imports call back into this while another fiber is
    /// mid-flight; the outer fiber is parked in the heap (and rooted through
    /// the entry-fiber stack) until the nested run finishes.
    pub(crate) fn run_fiber(&mut self, fiber_id: HeapId, args: &[Value]) -> Result<Value, RuntimeError> {
        // Validate against the root closure before touching any state.
        let closure = {
            let fiber = self.heap.get_fiber(fiber_id);
            if fiber.state != FiberState::New {
                return Err(RuntimeError::state(format!(
                    "cannot run a fiber that is {}",
                    fiber.state
                )));
            }
            fiber.closure
        };
        let function = self.heap.get_closure(closure).function;
        let (arity, stack_size, native) = {
            let f = self.heap.get_function(function);
            match &f.kind {
                crate::types::FnKind::Script(code) => (f.arity, code.stack_size as usize, false),
                crate::types::FnKind::Native(_) => (f.arity, 0, true),
            }
        };
        if native {
            return Err(RuntimeError::type_error(
                "a fiber needs a script function, not a builtin",
            ));
        }
        if arity >= 0 && args.len() != arity as usize {
            return Err(RuntimeError::arity(format!(
                "fiber function expects {} arguments, got {}",
                arity,
                args.len()
            )));
        }
        if 1 + args.len() + stack_size > self.config.max_stack {
            return Err(RuntimeError::overflow("stack overflow"));
        }

        // Park the in-flight fiber (if any) and root it alongside the new
        // entry fiber; nothing else may reference a fiber suspended
        // mid-import.
        let previous = self.active.as_ref().map(|a| a.id);
        self.park_active();
        if let Some(prev) = previous {
            self.fiber_stack.push(prev);
        }
        self.fiber_stack.push(fiber_id);

        let mut fiber = self.take_fiber(fiber_id);
        fiber.stack.push(Value::Null);
        fiber.stack.extend_from_slice(args);
        fiber.frames.push(CallFrame {
            ip: 0,
            closure,
            rbp: 0,
            self_value: Value::Undefined,
        });
        fiber.state = FiberState::Running;
        self.active = Some(ActiveFiber { id: fiber_id, fiber });

        let result = self.dispatch();

        self.park_active();
        self.fiber_stack.pop();
        if let Some(prev_id) = previous {
            self.fiber_stack.pop();
            let fiber = self.take_fiber(prev_id);
            self.active = Some(ActiveFiber { id: prev_id, fiber });
        }
        result
    }

    // ------------------------------------------------------------------
    // Fiber switching (run / resume / yield)

    /// Suspends the active fiber at the native call returning into `ret`,
    /// and makes `target` (whose payload must be ready to run) current.
    fn switch_to(&mut self, target: HeapId, ret: usize, suspend_state: FiberState) {
        let mut active = self.active.take().expect("switch without active fiber");
        let from = active.id.index();
        active.fiber.stack.truncate(ret);
        active.fiber.stack.push(Value::Null);
        active.fiber.ret_slot = ret;
        active.fiber.state = suspend_state;
        self.heap.replace(active.id, HeapData::Fiber(active.fiber));

        let fiber = self.take_fiber(target);
        self.active = Some(ActiveFiber { id: target, fiber });
        self.tracer.on_fiber_switch(from, target.index());
    }

    /// `fiber.run(...)`: NEW -> RUNNING with arguments bound.
    pub(crate) fn fiber_run(&mut self, target: HeapId, args: &[Value], ret: usize) -> RunResult<NativeReturn> {
        if target == self.active_id() {
            return Err(RuntimeError::state("the fiber is already running"));
        }
        let (state, closure) = {
            let f = self.heap.get_fiber(target);
            (f.state, f.closure)
        };
        if state != FiberState::New {
            return Err(RuntimeError::state(format!(
                "cannot run a fiber that is {state}; only new fibers can be run"
            )));
        }
        let function = self.heap.get_closure(closure).function;
        let (arity, stack_size) = {
            let f = self.heap.get_function(function);
            (f.arity, f.code().stack_size as usize)
        };
        if arity >= 0 && args.len() != arity as usize {
            return Err(RuntimeError::arity(format!(
                "fiber function expects {} arguments, got {}",
                arity,
                args.len()
            )));
        }
        if 1 + args.len() + stack_size > self.config.max_stack {
            return Err(RuntimeError::overflow("stack overflow"));
        }

        let current = self.active_id();
        {
            let fiber = self.heap.get_fiber_mut(target);
            fiber.stack.push(Value::Null);
            fiber.stack.extend_from_slice(args);
            fiber.frames.push(CallFrame {
                ip: 0,
                closure,
                rbp: 0,
                self_value: Value::Undefined,
            });
            fiber.state = FiberState::Running;
            fiber.caller = Some(current);
        }
        self.switch_to(target, ret, FiberState::Running);
        Ok(NativeReturn::Switched)
    }

    /// `fiber.resume(...)`: YIELDED -> RUNNING, delivering an optional value
    /// as the result of the pending `yield`.
    pub(crate) fn fiber_resume(&mut self, target: HeapId, args: &[Value], ret: usize) -> RunResult<NativeReturn> {
        if args.len() > 1 {
            return Err(RuntimeError::arity(format!(
                "resume expects at most 1 argument, got {}",
                args.len()
            )));
        }
        if target == self.active_id() {
            return Err(RuntimeError::state("the fiber is already running"));
        }
        let state = self.heap.get_fiber(target).state;
        if state != FiberState::Yielded {
            return Err(RuntimeError::state(format!(
                "cannot resume a fiber that is {state}; only yielded fibers can be resumed"
            )));
        }
        let value = args.first().copied().unwrap_or(Value::Null);
        let current = self.active_id();
        {
            let fiber = self.heap.get_fiber_mut(target);
            let slot = fiber.ret_slot;
            fiber.stack[slot] = value;
            fiber.state = FiberState::Running;
            fiber.caller = Some(current);
        }
        self.switch_to(target, ret, FiberState::Running);
        Ok(NativeReturn::Switched)
    }

    /// `yield(...)`: RUNNING -> YIELDED, delivering an optional value to the
    /// caller and severing the caller link.
    pub(crate) fn fiber_yield(&mut self, args: &[Value], ret: usize) -> RunResult<NativeReturn> {
        if args.len() > 1 {
            return Err(RuntimeError::arity(format!(
                "yield expects at most 1 argument, got {}",
                args.len()
            )));
        }
        let Some(caller) = self.fiber_mut().caller.take() else {
            return Err(RuntimeError::state("cannot yield: the fiber has no caller"));
        };
        let value = args.first().copied().unwrap_or(Value::Null);
        self.switch_to(caller, ret, FiberState::Yielded);
        // Deliver into the caller's pending native-call slot.
        let slot = self.fiber().ret_slot;
        self.fiber_mut().stack[slot] = value;
        Ok(NativeReturn::Switched)
    }

    /// Completion: the fiber finished with `result`; its caller continues.
    fn finish_into_caller(&mut self, caller: HeapId, result: Value) {
        let active = self.active.take().expect("finish without active fiber");
        let from = active.id.index();
        self.heap.replace(active.id, HeapData::Fiber(active.fiber));

        let mut fiber = self.take_fiber(caller);
        let slot = fiber.ret_slot;
        fiber.stack[slot] = result;
        self.active = Some(ActiveFiber { id: caller, fiber });
        self.tracer.on_fiber_switch(from, caller.index());
    }

    // ------------------------------------------------------------------
    // Failure

    /// Reports a runtime failure: formats the frame walk, hands it to the
    /// error sink, and marks the whole fiber chain done with the error
    /// string attached.
    fn throw(&mut self, err: RuntimeError) -> RuntimeError {
        let trace = self.build_trace(&err);
        self.sink.runtime(&trace);
        self.last_trace = trace;

        if let Some(mut active) = self.active.take() {
            active.fiber.state = FiberState::Done;
            active.fiber.error = Some(err.message.clone());
            let mut caller = active.fiber.caller.take();
            self.heap.replace(active.id, HeapData::Fiber(active.fiber));
            while let Some(id) = caller {
                let fiber = self.heap.get_fiber_mut(id);
                fiber.state = FiberState::Done;
                fiber.error = Some(err.message.clone());
                caller = fiber.caller.take();
            }
        }
        err
    }

    fn build_trace(&self, err: &RuntimeError) -> String {
        let mut out = format!("Error: {}", err.message);
        if let Some(active) = &self.active {
            self.append_frames(&active.fiber, &mut out);
            let mut caller = active.fiber.caller;
            while let Some(id) = caller {
                let fiber = self.heap.get_fiber(id);
                self.append_frames(fiber, &mut out);
                caller = fiber.caller;
            }
        }
        out
    }

    fn append_frames(&self, fiber: &Fiber, out: &mut String) {
        use std::fmt::Write;
        for frame in fiber.frames.iter().rev() {
            let function = self.heap.get_closure(frame.closure).function;
            let func = self.heap.get_function(function);
            let line = match &func.kind {
                crate::types::FnKind::Script(code) => {
                    code.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0)
                }
                crate::types::FnKind::Native(_) => 0,
            };
            let module = func
                .owner
                .map_or_else(|| "builtin".to_owned(), |m| self.heap.get_module(m).name.clone());
            let _ = write!(out, "\n  at {} ({module}:{line})", func.name);
        }
    }

    // ------------------------------------------------------------------
    // The dispatch loop

    fn cached_frame(&self) -> CachedFrame {
        let fiber = self.fiber();
        let frame = fiber.frames.last().expect("no frame to cache");
        let closure = self.heap.get_closure(frame.closure);
        let function = self.heap.get_function(closure.function);
        CachedFrame {
            code: Rc::clone(function.code()),
            ip: frame.ip,
            rbp: frame.rbp,
            closure: frame.closure,
            module: function.owner.expect("script function without a module"),
            self_value: frame.self_value,
        }
    }

    fn constant(&self, cf: &CachedFrame, index: u16) -> Value {
        self.heap.get_module(cf.module).constants[index as usize]
    }

    fn constant_str(&self, cf: &CachedFrame, index: u16) -> String {
        match self.constant(cf, index) {
            Value::Ref(id) => self.heap.get_str(id).as_str().to_owned(),
            other => panic!("expected a string constant, found {other:?}"),
        }
    }

    fn dispatch(&mut self) -> Result<Value, RuntimeError> {
        let mut cf = self.cached_frame();
        loop {
            let op_byte = cf.code.code[cf.ip];
            let line = cf.code.lines[cf.ip];
            cf.ip += 1;
            let op = Opcode::from_repr(op_byte).expect("corrupt bytecode");
            self.tracer.on_instruction(op.into(), line);

            match op {
                Opcode::PushConstant => {
                    let index = fetch_u16!(cf);
                    let value = self.constant(&cf, index);
                    self.push(value);
                }
                Opcode::PushNull => self.push(Value::Null),
                Opcode::PushZero => self.push(Value::Int(0)),
                Opcode::PushTrue => self.push(Value::Bool(true)),
                Opcode::PushFalse => self.push(Value::Bool(false)),
                Opcode::PushList => {
                    let capacity = fetch_u16!(cf);
                    let id = self.alloc(HeapData::List(crate::types::List::with_capacity(
                        capacity as usize,
                    )));
                    self.push(Value::Ref(id));
                }
                Opcode::PushMap => {
                    let id = self.alloc(HeapData::Map(crate::types::Map::new()));
                    self.push(Value::Ref(id));
                }
                Opcode::PushSelf => self.push(cf.self_value),
                Opcode::PushClosure => {
                    let fn_index = fetch_u16!(cf);
                    let Value::Ref(fn_id) = self.constant(&cf, fn_index) else {
                        unreachable!("closure operand must reference a function constant");
                    };
                    let count = self.heap.get_function(fn_id).upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(count);
                    for _ in 0..count {
                        let is_immediate = fetch_u8!(cf) != 0;
                        let index = fetch_u8!(cf) as usize;
                        let upvalue = if is_immediate {
                            self.capture_upvalue(cf.rbp + 1 + index)
                        } else {
                            self.heap.get_closure(cf.closure).upvalues[index]
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = self.alloc(HeapData::Closure(Closure {
                        function: fn_id,
                        upvalues,
                    }));
                    self.push(Value::Ref(closure));
                }

                Opcode::Swap => {
                    let len = self.fiber().stack.len();
                    self.fiber_mut().stack.swap(len - 1, len - 2);
                }
                Opcode::Dup => {
                    let top = self.peek(0);
                    self.push(top);
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::ListAppend => {
                    let value = self.peek(0);
                    let Value::Ref(list) = self.peek(1) else {
                        unreachable!("list literal under construction");
                    };
                    self.heap.get_list_mut(list).items.push(value);
                    self.heap.note_growth(std::mem::size_of::<Value>());
                    self.pop();
                }
                Opcode::MapInsert => {
                    let value = self.peek(0);
                    let key = self.peek(1);
                    let Value::Ref(map) = self.peek(2) else {
                        unreachable!("map literal under construction");
                    };
                    vm_try!(self, cf, self.map_set(map, key, value));
                    self.pop();
                    self.pop();
                }

                Opcode::PushLocal0
                | Opcode::PushLocal1
                | Opcode::PushLocal2
                | Opcode::PushLocal3
                | Opcode::PushLocal4
                | Opcode::PushLocal5
                | Opcode::PushLocal6
                | Opcode::PushLocal7
                | Opcode::PushLocal8 => {
                    let slot = (op_byte - Opcode::PushLocal0 as u8) as usize;
                    let value = self.fiber().stack[cf.rbp + 1 + slot];
                    self.push(value);
                }
                Opcode::PushLocalN => {
                    let slot = fetch_u8!(cf) as usize;
                    let value = self.fiber().stack[cf.rbp + 1 + slot];
                    self.push(value);
                }
                Opcode::StoreLocal0
                | Opcode::StoreLocal1
                | Opcode::StoreLocal2
                | Opcode::StoreLocal3
                | Opcode::StoreLocal4
                | Opcode::StoreLocal5
                | Opcode::StoreLocal6
                | Opcode::StoreLocal7
                | Opcode::StoreLocal8 => {
                    let slot = (op_byte - Opcode::StoreLocal0 as u8) as usize;
                    let value = self.peek(0);
                    self.fiber_mut().stack[cf.rbp + 1 + slot] = value;
                }
                Opcode::StoreLocalN => {
                    let slot = fetch_u8!(cf) as usize;
                    let value = self.peek(0);
                    self.fiber_mut().stack[cf.rbp + 1 + slot] = value;
                }
                Opcode::PushGlobal => {
                    let index = fetch_u8!(cf) as usize;
                    let value = self.heap.get_module(cf.module).globals[index];
                    self.push(value);
                }
                Opcode::StoreGlobal => {
                    let index = fetch_u8!(cf) as usize;
                    let value = self.peek(0);
                    self.heap.get_module_mut(cf.module).globals[index] = value;
                }
                Opcode::PushBuiltinFn => {
                    let index = fetch_u8!(cf) as usize;
                    let id = self.builtin_fns[index];
                    self.push(Value::Ref(id));
                }
                Opcode::PushBuiltinTy => {
                    let index = fetch_u8!(cf) as usize;
                    let id = self.builtin_classes[index];
                    self.push(Value::Ref(id));
                }
                Opcode::PushUpvalue => {
                    let index = fetch_u8!(cf) as usize;
                    let upvalue = self.heap.get_closure(cf.closure).upvalues[index];
                    let value = match self.heap.get_upvalue(upvalue).open_slot() {
                        Some(slot) => self.fiber().stack[slot],
                        None => self
                            .heap
                            .get_upvalue(upvalue)
                            .closed_value()
                            .expect("closed upvalue holds a value"),
                    };
                    self.push(value);
                }
                Opcode::StoreUpvalue => {
                    let index = fetch_u8!(cf) as usize;
                    let value = self.peek(0);
                    let upvalue = self.heap.get_closure(cf.closure).upvalues[index];
                    match self.heap.get_upvalue(upvalue).open_slot() {
                        Some(slot) => self.fiber_mut().stack[slot] = value,
                        None => self.heap.get_upvalue_mut(upvalue).set_closed(value),
                    }
                }
                Opcode::CloseUpvalue => {
                    let slot = self.fiber().stack.len() - 1;
                    self.close_upvalues_from(slot);
                    self.pop();
                }

                Opcode::Jump => {
                    let offset = fetch_u16!(cf) as usize;
                    cf.ip += offset;
                }
                Opcode::Loop => {
                    let offset = fetch_u16!(cf) as usize;
                    cf.ip -= offset;
                }
                Opcode::JumpIf => {
                    let offset = fetch_u16!(cf) as usize;
                    let value = self.pop();
                    if value.truthy(&self.heap) {
                        cf.ip += offset;
                    }
                }
                Opcode::JumpIfNot => {
                    let offset = fetch_u16!(cf) as usize;
                    let value = self.pop();
                    if !value.truthy(&self.heap) {
                        cf.ip += offset;
                    }
                }
                Opcode::Or => {
                    let offset = fetch_u16!(cf) as usize;
                    if self.peek(0).truthy(&self.heap) {
                        cf.ip += offset;
                    } else {
                        self.pop();
                    }
                }
                Opcode::And => {
                    let offset = fetch_u16!(cf) as usize;
                    if self.peek(0).truthy(&self.heap) {
                        self.pop();
                    } else {
                        cf.ip += offset;
                    }
                }
                Opcode::IterTest => {
                    vm_try!(self, cf, self.check_iterable());
                }
                Opcode::Iter => {
                    let offset = fetch_u16!(cf) as usize;
                    let advanced = vm_try!(self, cf, self.iterate());
                    if !advanced {
                        cf.ip += offset;
                    }
                }

                Opcode::Call => {
                    let argc = fetch_u8!(cf) as usize;
                    sync_ip!(self, cf);
                    let action = vm_try!(self, cf, self.call_from_stack(argc, false));
                    if matches!(action, CallAction::Reload) {
                        reload!(self, cf);
                    }
                }
                Opcode::TailCall => {
                    let argc = fetch_u8!(cf) as usize;
                    sync_ip!(self, cf);
                    let action = vm_try!(self, cf, self.call_from_stack(argc, true));
                    if matches!(action, CallAction::Reload) {
                        reload!(self, cf);
                    }
                }
                Opcode::MethodCall => {
                    let argc = fetch_u8!(cf) as usize;
                    let name_index = fetch_u16!(cf);
                    sync_ip!(self, cf);
                    let name = self.constant_str(&cf, name_index);
                    let action = vm_try!(self, cf, self.method_call(argc, &name));
                    if matches!(action, CallAction::Reload) {
                        reload!(self, cf);
                    }
                }
                Opcode::SuperCall => {
                    let argc = fetch_u8!(cf) as usize;
                    let name_index = fetch_u16!(cf);
                    sync_ip!(self, cf);
                    let name = self.constant_str(&cf, name_index);
                    let action = vm_try!(self, cf, self.super_call(argc, &name, &cf));
                    if matches!(action, CallAction::Reload) {
                        reload!(self, cf);
                    }
                }
                Opcode::Return => {
                    let result = self.pop();
                    self.close_upvalues_from(cf.rbp + 1);
                    let depth = {
                        let fiber = self.fiber_mut();
                        fiber.frames.pop();
                        fiber.frames.len()
                    };
                    self.tracer.on_return(depth);
                    if depth == 0 {
                        let caller = {
                            let fiber = self.fiber_mut();
                            fiber.state = FiberState::Done;
                            fiber.stack.clear();
                            fiber.caller.take()
                        };
                        match caller {
                            Some(caller_id) => {
                                self.finish_into_caller(caller_id, result);
                                reload!(self, cf);
                            }
                            None => return Ok(result),
                        }
                    } else {
                        let fiber = self.fiber_mut();
                        fiber.stack.truncate(cf.rbp);
                        fiber.stack.push(result);
                        reload!(self, cf);
                    }
                }
                Opcode::End => {
                    unreachable!("END sentinel executed");
                }

                Opcode::CreateClass => {
                    let name_index = fetch_u16!(cf);
                    sync_ip!(self, cf);
                    let name = self.constant_str(&cf, name_index);
                    vm_try!(self, cf, self.create_class(&name, cf.module));
                }
                Opcode::BindMethod => {
                    vm_try!(self, cf, self.bind_method());
                }
                Opcode::GetAttrib => {
                    let name_index = fetch_u16!(cf);
                    let name = self.constant_str(&cf, name_index);
                    let receiver = self.peek(0);
                    let value = vm_try!(self, cf, self.get_attrib(receiver, &name));
                    self.pop();
                    self.push(value);
                }
                Opcode::GetAttribKeep => {
                    let name_index = fetch_u16!(cf);
                    let name = self.constant_str(&cf, name_index);
                    let receiver = self.peek(0);
                    let value = vm_try!(self, cf, self.get_attrib(receiver, &name));
                    self.push(value);
                }
                Opcode::SetAttrib => {
                    let name_index = fetch_u16!(cf);
                    let name = self.constant_str(&cf, name_index);
                    let value = self.peek(0);
                    let receiver = self.peek(1);
                    vm_try!(self, cf, self.set_attrib(receiver, &name, value));
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                Opcode::GetSubscript => {
                    let index = self.peek(0);
                    let receiver = self.peek(1);
                    let value = vm_try!(self, cf, self.get_subscript(receiver, index));
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                Opcode::GetSubscriptKeep => {
                    let index = self.peek(0);
                    let receiver = self.peek(1);
                    let value = vm_try!(self, cf, self.get_subscript(receiver, index));
                    self.push(value);
                }
                Opcode::SetSubscript => {
                    let value = self.peek(0);
                    let index = self.peek(1);
                    let receiver = self.peek(2);
                    vm_try!(self, cf, self.set_subscript(receiver, index, value));
                    self.pop();
                    self.pop();
                    self.pop();
                    self.push(value);
                }

                Opcode::Positive | Opcode::Negative | Opcode::Not | Opcode::BitNot => {
                    let value = self.peek(0);
                    let result = vm_try!(self, cf, self.unary_op(op, value));
                    self.pop();
                    self.push(result);
                }

                Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Exponent
                | Opcode::Mod
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor
                | Opcode::BitLshift
                | Opcode::BitRshift => {
                    let inplace = fetch_u8!(cf) != 0;
                    let rhs = self.peek(0);
                    let lhs = self.peek(1);
                    let result = vm_try!(self, cf, self.binary_op(op, lhs, rhs, inplace));
                    self.pop();
                    self.pop();
                    self.push(result);
                }

                Opcode::EqEq
                | Opcode::NotEq
                | Opcode::Lt
                | Opcode::LtEq
                | Opcode::Gt
                | Opcode::GtEq
                | Opcode::In
                | Opcode::Is => {
                    let rhs = self.peek(0);
                    let lhs = self.peek(1);
                    let result = vm_try!(self, cf, self.compare_op(op, lhs, rhs));
                    self.pop();
                    self.pop();
                    self.push(result);
                }
                Opcode::Range => {
                    let to = self.peek(0);
                    let from = self.peek(1);
                    let result = vm_try!(self, cf, self.make_range(from, to));
                    self.pop();
                    self.pop();
                    self.push(result);
                }

                Opcode::Import => {
                    let name_index = fetch_u16!(cf);
                    sync_ip!(self, cf);
                    let spec = self.constant_str(&cf, name_index);
                    let module = vm_try!(self, cf, self.import_module(&spec, cf.module));
                    self.push(module);
                }

                Opcode::ReplPrint => {
                    let value = self.pop();
                    if !value.is_null() {
                        let mut out = String::new();
                        value.write_repr(&self.heap, &mut out);
                        self.writer.stdout_write(&out);
                        self.writer.stdout_push('\n');
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Upvalue management

    /// Finds or creates the open upvalue for a stack slot, keeping the open
    /// list sorted by descending slot.
    fn capture_upvalue(&mut self, slot: usize) -> HeapId {
        let mut insert_at = self.fiber().open_upvalues.len();
        for (i, &id) in self.fiber().open_upvalues.iter().enumerate() {
            let open_slot = self
                .heap
                .get_upvalue(id)
                .open_slot()
                .expect("open list holds only open upvalues");
            if open_slot == slot {
                return id;
            }
            if open_slot < slot {
                insert_at = i;
                break;
            }
        }
        let id = self.alloc(HeapData::Upvalue(Upvalue::open(slot)));
        self.fiber_mut().open_upvalues.insert(insert_at, id);
        id
    }

    /// Closes every open upvalue at or above `min_slot`, copying the stack
    /// values into the upvalues themselves.
    pub(crate) fn close_upvalues_from(&mut self, min_slot: usize) {
        loop {
            let Some(&top) = self.fiber().open_upvalues.first() else {
                break;
            };
            let slot = self
                .heap
                .get_upvalue(top)
                .open_slot()
                .expect("open list holds only open upvalues");
            if slot < min_slot {
                break;
            }
            let value = self.fiber().stack[slot];
            self.heap.get_upvalue_mut(top).close(value);
            self.fiber_mut().open_upvalues.remove(0);
        }
    }

    // ------------------------------------------------------------------
    // Class machinery shared with call handling

    fn create_class(&mut self, name: &str, module: HeapId) -> RunResult<()> {
        let super_value = self.peek(0);
        let super_class = match super_value {
            Value::Null => None,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Class(c) if c.kind == crate::types::ClassKind::Instance => Some(id),
                HeapData::Class(_) => {
                    return Err(RuntimeError::type_error(format!(
                        "cannot inherit from the builtin class '{name}'"
                    )));
                }
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "can only inherit from a class, not a {}",
                        other.kind_name()
                    )));
                }
            },
            _ => {
                return Err(RuntimeError::type_error(
                    "can only inherit from a class".to_owned(),
                ));
            }
        };
        let class = self.alloc(HeapData::Class(crate::types::Class::new(
            name.to_owned(),
            crate::types::ClassKind::Instance,
            super_class,
            Some(module),
        )));
        self.pop();
        self.push(Value::Ref(class));
        Ok(())
    }

    fn bind_method(&mut self) -> RunResult<()> {
        let Value::Ref(closure) = self.peek(0) else {
            unreachable!("method bind expects a closure on top");
        };
        let Value::Ref(class) = self.peek(1) else {
            unreachable!("method bind expects a class below the closure");
        };
        let function = self.heap.get_closure(closure).function;
        let name = self.heap.get_function(function).name.clone();
        self.heap.get_function_mut(function).owner_class = Some(class);
        if name == "_init" {
            self.heap.get_class_mut(class).constructor = Some(closure);
        } else {
            self.heap.get_class_mut(class).methods.insert(name, closure);
        }
        self.pop();
        Ok(())
    }
}
