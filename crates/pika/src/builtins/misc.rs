//! `hash` and `assert`.

use crate::{
    error::{RunResult, RuntimeError},
    types::NativeReturn,
    value::Value,
    vm::Vm,
};

pub(super) fn hash(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let h = args[0].hash_value(&vm.heap)?;
    Ok(NativeReturn::Value(Value::Int(h as u32 as i32)))
}

pub(super) fn assert_fn(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::arity(format!(
            "assert expects 1 or 2 arguments, got {}",
            args.len()
        )));
    }
    if args[0].truthy(&vm.heap) {
        return Ok(NativeReturn::Value(Value::Null));
    }
    let message = match args.get(1) {
        Some(msg) => {
            let mut out = String::new();
            msg.write_display(&vm.heap, &mut out);
            out
        }
        None => "assertion failed".to_owned(),
    };
    Err(RuntimeError::state(message))
}
