//! The fiber-facing builtins: `yield` and the `Fiber` class methods.
//!
//! All three delegate to the VM's switch protocol; they are the only
//! natives that return `Switched` instead of a value.

use crate::{
    error::RunResult,
    types::NativeReturn,
    value::Value,
    vm::Vm,
};

pub(super) fn yield_fn(vm: &mut Vm, _this: Value, args: &[Value], ret: usize) -> RunResult<NativeReturn> {
    vm.fiber_yield(args, ret)
}

pub(super) fn run(vm: &mut Vm, this: Value, args: &[Value], ret: usize) -> RunResult<NativeReturn> {
    let Value::Ref(id) = this else {
        unreachable!("Fiber.run dispatched on a non-fiber receiver");
    };
    vm.fiber_run(id, args, ret)
}

pub(super) fn resume(vm: &mut Vm, this: Value, args: &[Value], ret: usize) -> RunResult<NativeReturn> {
    let Value::Ref(id) = this else {
        unreachable!("Fiber.resume dispatched on a non-fiber receiver");
    };
    vm.fiber_resume(id, args, ret)
}
