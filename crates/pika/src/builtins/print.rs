//! `print` and the string-building helper the compiler's interpolation
//! desugar calls.

use crate::{
    error::{RunResult, RuntimeError},
    heap::HeapData,
    types::NativeReturn,
    value::Value,
    vm::Vm,
};

pub(super) fn print(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            vm.writer.stdout_push(' ');
        }
        out.clear();
        arg.write_display(&vm.heap, &mut out);
        vm.writer.stdout_write(&out);
    }
    vm.writer.stdout_push('\n');
    Ok(NativeReturn::Value(Value::Null))
}

pub(super) fn list_join(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let Value::Ref(id) = args[0] else {
        return Err(list_join_error(vm, args[0]));
    };
    if !matches!(vm.heap.get(id), HeapData::List(_)) {
        return Err(list_join_error(vm, args[0]));
    }
    let mut out = String::new();
    for item in &vm.heap.get_list(id).items {
        item.write_display(&vm.heap, &mut out);
    }
    let joined = vm.alloc_string(out);
    Ok(NativeReturn::Value(joined))
}

fn list_join_error(vm: &Vm, value: Value) -> RuntimeError {
    RuntimeError::arity(format!(
        "list_join expects a list, got a {}",
        value.type_name(&vm.heap)
    ))
}
