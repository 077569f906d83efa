//! The call protocol: closures, natives, class instantiation, method and
//! super dispatch, and tail calls.
//!
//! Stack convention: at a call site the stack holds the callable followed by
//! `argc` arguments. The callable's own slot becomes the return slot
//! (`rbp`), so parameters sit at `rbp + 1..` for the callee without any
//! copying.

use smallvec::SmallVec;

use crate::{
    error::{RunResult, RuntimeError},
    heap::{HeapData, HeapId},
    types::{CallFrame, ClassKind, FnKind, Instance, NativeReturn},
    value::Value,
};

use super::Vm;

/// What the dispatch loop must do after a call operation.
pub(super) enum CallAction {
    /// A frame was pushed, reused, or the current fiber changed.
    Reload,
    /// The result is already in place; keep executing the same frame.
    Continue,
}

impl Vm {
    /// Dispatches a `CALL`/`TAIL_CALL`: the callable is on the stack below
    /// its arguments.
    pub(super) fn call_from_stack(&mut self, argc: usize, tail: bool) -> RunResult<CallAction> {
        let ret = self.fiber().stack.len() - argc - 1;
        let callee = self.fiber().stack[ret];
        let Value::Ref(id) = callee else {
            return Err(RuntimeError::type_error(format!(
                "a {} is not callable",
                callee.type_name(&self.heap)
            )));
        };
        match self.heap.get(id) {
            HeapData::Closure(_) => {
                self.fiber_mut().stack[ret] = Value::Null;
                self.call_closure(id, argc, ret, Value::Undefined, tail)
            }
            HeapData::Class(_) => self.instantiate(id, argc, ret),
            HeapData::MethodBind(bind) => {
                let closure = bind.closure;
                let receiver = bind.receiver;
                if receiver.is_undefined() {
                    return Err(RuntimeError::type_error(
                        "cannot call an unbound method; access it through an instance",
                    ));
                }
                self.fiber_mut().stack[ret] = Value::Null;
                self.call_closure(closure, argc, ret, receiver, tail)
            }
            other => Err(RuntimeError::type_error(format!(
                "a {} is not callable",
                other.kind_name()
            ))),
        }
    }

    /// Invokes a closure with `self` bound to `this`.
    ///
    /// Natives run directly against the fiber, with the stack recentered to
    /// the return slot afterwards. Script functions get a frame; a tail call
    /// reuses the current one after closing its upvalues.
    pub(super) fn call_closure(
        &mut self,
        closure: HeapId,
        argc: usize,
        ret: usize,
        this: Value,
        tail: bool,
    ) -> RunResult<CallAction> {
        let function = self.heap.get_closure(closure).function;
        let (arity, name) = {
            let f = self.heap.get_function(function);
            (f.arity, f.name.clone())
        };
        if arity >= 0 && argc != arity as usize {
            return Err(RuntimeError::arity(format!(
                "'{name}' expects {arity} arguments, got {argc}"
            )));
        }
        let depth = self.fiber().frames.len();
        self.tracer.on_call(&name, depth);

        let native = match &self.heap.get_function(function).kind {
            FnKind::Native(f) => Some(*f),
            FnKind::Script(_) => None,
        };

        if let Some(native) = native {
            let args: SmallVec<[Value; 8]> =
                SmallVec::from_slice(&self.fiber().stack[ret + 1..ret + 1 + argc]);
            return match native(self, this, &args, ret)? {
                NativeReturn::Value(value) => {
                    let fiber = self.fiber_mut();
                    fiber.stack.truncate(ret);
                    fiber.stack.push(value);
                    Ok(CallAction::Continue)
                }
                NativeReturn::Switched => Ok(CallAction::Reload),
            };
        }

        let stack_size = self.heap.get_function(function).code().stack_size as usize;
        if ret + 1 + stack_size > self.config.max_stack {
            return Err(RuntimeError::overflow("stack overflow"));
        }

        if tail {
            // Reuse the current frame: the caller's locals die here, so any
            // upvalues over them close first, then the callable slot and
            // arguments slide down onto the frame base.
            let rbp = self.fiber().frames.last().expect("tail call without a frame").rbp;
            self.close_upvalues_from(rbp + 1);
            let fiber = self.fiber_mut();
            for i in 0..=argc {
                fiber.stack[rbp + i] = fiber.stack[ret + i];
            }
            fiber.stack.truncate(rbp + 1 + argc);
            let frame = fiber.frames.last_mut().expect("tail call without a frame");
            frame.closure = closure;
            frame.ip = 0;
            frame.self_value = this;
        } else {
            self.fiber_mut().frames.push(CallFrame {
                ip: 0,
                closure,
                rbp: ret,
                self_value: this,
            });
        }
        Ok(CallAction::Reload)
    }

    /// Calls a class: primitives construct through their kind, script
    /// classes synthesize an instance and run the first constructor found on
    /// the inheritance chain.
    pub(super) fn instantiate(&mut self, class: HeapId, argc: usize, ret: usize) -> RunResult<CallAction> {
        let kind = self.heap.get_class(class).kind;
        match kind {
            ClassKind::Instance => {
                // The class stays in the return slot (still a GC root) until
                // the fresh instance replaces it.
                let instance = self.alloc(HeapData::Instance(Instance::new(class)));
                self.fiber_mut().stack[ret] = Value::Ref(instance);

                let mut cursor = Some(class);
                while let Some(current) = cursor {
                    let (ctor, super_class) = {
                        let c = self.heap.get_class(current);
                        (c.constructor, c.super_class)
                    };
                    if let Some(ctor) = ctor {
                        return self.call_closure(ctor, argc, ret, Value::Ref(instance), false);
                    }
                    cursor = super_class;
                }

                if argc != 0 {
                    let name = self.heap.get_class(class).name.clone();
                    return Err(RuntimeError::arity(format!(
                        "class '{name}' has no constructor and takes no arguments, got {argc}"
                    )));
                }
                self.fiber_mut().stack.truncate(ret + 1);
                Ok(CallAction::Continue)
            }
            ClassKind::String => {
                self.expect_argc(class, argc, 1)?;
                let arg = self.fiber().stack[ret + 1];
                let mut out = String::new();
                arg.write_display(&self.heap, &mut out);
                let value = self.alloc_string(out);
                self.place_construct(ret, value);
                Ok(CallAction::Continue)
            }
            ClassKind::Number => {
                self.expect_argc(class, argc, 1)?;
                let arg = self.fiber().stack[ret + 1];
                let value = crate::builtins::value_to_number(self, arg)?;
                self.place_construct(ret, value);
                Ok(CallAction::Continue)
            }
            ClassKind::List => {
                self.expect_argc(class, argc, 0)?;
                let id = self.alloc(HeapData::List(crate::types::List::new()));
                self.place_construct(ret, Value::Ref(id));
                Ok(CallAction::Continue)
            }
            ClassKind::Map => {
                self.expect_argc(class, argc, 0)?;
                let id = self.alloc(HeapData::Map(crate::types::Map::new()));
                self.place_construct(ret, Value::Ref(id));
                Ok(CallAction::Continue)
            }
            ClassKind::Fiber => {
                self.expect_argc(class, argc, 1)?;
                let arg = self.fiber().stack[ret + 1];
                let Value::Ref(closure) = arg else {
                    return Err(RuntimeError::type_error(
                        "a fiber needs a function to run",
                    ));
                };
                let HeapData::Closure(c) = self.heap.get(closure) else {
                    return Err(RuntimeError::type_error(
                        "a fiber needs a function to run",
                    ));
                };
                if self.heap.get_function(c.function).is_native() {
                    return Err(RuntimeError::type_error(
                        "a fiber needs a script function, not a builtin",
                    ));
                }
                let id = self.alloc(HeapData::Fiber(crate::types::Fiber::new(closure)));
                self.place_construct(ret, Value::Ref(id));
                Ok(CallAction::Continue)
            }
            _ => {
                let name = self.heap.get_class(class).name.clone();
                Err(RuntimeError::type_error(format!(
                    "class '{name}' cannot be instantiated"
                )))
            }
        }
    }

    fn expect_argc(&self, class: HeapId, argc: usize, expected: usize) -> RunResult<()> {
        if argc == expected {
            Ok(())
        } else {
            let name = self.heap.get_class(class).name.clone();
            Err(RuntimeError::arity(format!(
                "'{name}' expects {expected} arguments, got {argc}"
            )))
        }
    }

    fn place_construct(&mut self, ret: usize, value: Value) {
        let fiber = self.fiber_mut();
        fiber.stack[ret] = value;
        fiber.stack.truncate(ret + 1);
    }

    /// `METHOD_CALL`: resolves `name` on the receiver's class chain, falling
    /// back to callable instance attributes and module globals.
    pub(super) fn method_call(&mut self, argc: usize, name: &str) -> RunResult<CallAction> {
        let ret = self.fiber().stack.len() - argc - 1;
        let receiver = self.fiber().stack[ret];

        let class = self.class_of_value(receiver);
        if let Some(method) = self.resolve_method(class, name) {
            return self.call_closure(method, argc, ret, receiver, false);
        }

        // Fallbacks: a callable stored as an instance attribute, or a
        // module-level function addressed as `module.name(...)`.
        if let Value::Ref(id) = receiver {
            let fallback = match self.heap.get(id) {
                HeapData::Instance(instance) => instance.attrs.get(name).copied(),
                HeapData::Module(module) => module
                    .global_index(name, &self.heap)
                    .map(|g| module.globals[g]),
                _ => None,
            };
            if let Some(callee) = fallback {
                self.fiber_mut().stack[ret] = callee;
                return self.call_from_stack(argc, false);
            }
        }

        Err(RuntimeError::name(format!(
            "'{}' has no method '{name}'",
            receiver.type_name(&self.heap)
        )))
    }

    /// `SUPER_CALL`: resolves `name` starting at the superclass of the class
    /// the currently running method was bound to.
    pub(super) fn super_call(
        &mut self,
        argc: usize,
        name: &str,
        cf: &super::CachedFrame,
    ) -> RunResult<CallAction> {
        let ret = self.fiber().stack.len() - argc - 1;
        let this = cf.self_value;
        debug_assert!(!this.is_undefined(), "super call outside a method");

        let function = self.heap.get_closure(cf.closure).function;
        let owner = self
            .heap
            .get_function(function)
            .owner_class
            .ok_or_else(|| RuntimeError::name("'super' is only valid in a bound method"))?;
        let Some(start) = self.heap.get_class(owner).super_class else {
            let class_name = self.heap.get_class(owner).name.clone();
            return Err(RuntimeError::name(format!(
                "class '{class_name}' has no superclass"
            )));
        };
        let Some(method) = self.resolve_method(start, name) else {
            return Err(RuntimeError::name(format!(
                "no method '{name}' in the superclass chain"
            )));
        };
        self.call_closure(method, argc, ret, this, false)
    }

    /// The class governing attribute and method lookup for a value.
    pub(super) fn class_of_value(&self, value: Value) -> HeapId {
        use crate::builtins::BuiltinClassId as B;
        let builtin = match value {
            Value::Null | Value::Undefined | Value::Void => B::Null,
            Value::Bool(_) => B::Bool,
            Value::Int(_) | Value::Float(_) => B::Number,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(_) => B::String,
                HeapData::List(_) => B::List,
                HeapData::Map(_) => B::Map,
                HeapData::Range(_) => B::Range,
                HeapData::Module(_) => B::Module,
                HeapData::Function(_) | HeapData::Closure(_) | HeapData::MethodBind(_) | HeapData::Upvalue(_) => {
                    B::Function
                }
                HeapData::Fiber(_) => B::Fiber,
                HeapData::Class(_) => B::Class,
                HeapData::Instance(instance) => return instance.class,
            },
        };
        self.builtin_classes[builtin as usize]
    }

    /// Hash-map probe up the superclass chain; `_init` resolves to the
    /// constructor slot.
    pub(super) fn resolve_method(&self, mut class: HeapId, name: &str) -> Option<HeapId> {
        loop {
            let c = self.heap.get_class(class);
            if name == "_init" {
                if let Some(ctor) = c.constructor {
                    return Some(ctor);
                }
            } else if let Some(&method) = c.methods.get(name) {
                return Some(method);
            }
            class = c.super_class?;
        }
    }
}
