//! Conversions between strings, numbers, and code points.

use crate::{
    error::{RunResult, RuntimeError},
    heap::HeapData,
    types::NativeReturn,
    value::Value,
    vm::Vm,
};

pub(super) fn to_string(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let mut out = String::new();
    args[0].write_display(&vm.heap, &mut out);
    Ok(NativeReturn::Value(vm.alloc_string(out)))
}

pub(super) fn to_number(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    value_to_number(vm, args[0]).map(NativeReturn::Value)
}

/// Shared by the `to_number` builtin and the callable `Number` class.
pub(crate) fn value_to_number(vm: &Vm, value: Value) -> RunResult<Value> {
    if let Some(n) = value.as_num() {
        return Ok(Value::num(n));
    }
    if let Value::Ref(id) = value {
        if let HeapData::Str(s) = vm.heap.get(id) {
            let text = s.as_str().trim();
            return text.parse::<f64>().map(Value::num).map_err(|_| {
                RuntimeError::type_error(format!("cannot convert '{text}' to a number"))
            });
        }
    }
    Err(RuntimeError::type_error(format!(
        "cannot convert a {} to a number",
        value.type_name(&vm.heap)
    )))
}

pub(super) fn chr(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let code = args[0].as_integer("chr argument")?;
    let ch = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| RuntimeError::bound(format!("{code} is not a valid code point")))?;
    Ok(NativeReturn::Value(vm.alloc_string(ch.to_string())))
}

pub(super) fn ord(vm: &mut Vm, _this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let err = || RuntimeError::arity("ord expects a one-character string".to_owned());
    let Value::Ref(id) = args[0] else {
        return Err(err());
    };
    let HeapData::Str(s) = vm.heap.get(id) else {
        return Err(err());
    };
    let mut chars = s.as_str().chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(NativeReturn::Value(Value::Int(ch as i32))),
        _ => Err(err()),
    }
}
