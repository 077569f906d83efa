//! Small numeric helpers.

use crate::{
    error::{RunResult, RuntimeError},
    types::NativeReturn,
    value::Value,
    vm::Vm,
};

fn number_arg(vm: &Vm, name: &str, value: Value) -> RunResult<f64> {
    value.as_num().ok_or_else(|| {
        RuntimeError::arity(format!(
            "{name} expects a number, got a {}",
            value.type_name(&vm.heap)
        ))
    })
}

pub(super) fn min(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let a = number_arg(vm, "min", args[0])?;
    let b = number_arg(vm, "min", args[1])?;
    Ok(NativeReturn::Value(Value::num(a.min(b))))
}

pub(super) fn max(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let a = number_arg(vm, "max", args[0])?;
    let b = number_arg(vm, "max", args[1])?;
    Ok(NativeReturn::Value(Value::num(a.max(b))))
}

pub(super) fn abs(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let n = number_arg(vm, "abs", args[0])?;
    Ok(NativeReturn::Value(Value::num(n.abs())))
}
