//! Native methods of the builtin `String` class.

use crate::{
    error::{RunResult, RuntimeError},
    heap::{HeapData, HeapId},
    types::{List, NativeReturn},
    value::Value,
    vm::Vm,
};

fn receiver(this: Value) -> HeapId {
    let Value::Ref(id) = this else {
        unreachable!("string method dispatched on a non-string receiver");
    };
    id
}

fn string_arg(vm: &Vm, name: &str, value: Value) -> RunResult<String> {
    if let Value::Ref(id) = value {
        if let HeapData::Str(s) = vm.heap.get(id) {
            return Ok(s.as_str().to_owned());
        }
    }
    Err(RuntimeError::arity(format!(
        "{name} expects a string, got a {}",
        value.type_name(&vm.heap)
    )))
}

pub(super) fn upper(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let text = vm.heap.get_str(receiver(this)).as_str().to_uppercase();
    Ok(NativeReturn::Value(vm.alloc_string(text)))
}

pub(super) fn lower(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let text = vm.heap.get_str(receiver(this)).as_str().to_lowercase();
    Ok(NativeReturn::Value(vm.alloc_string(text)))
}

pub(super) fn strip(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let text = vm.heap.get_str(receiver(this)).as_str().trim().to_owned();
    Ok(NativeReturn::Value(vm.alloc_string(text)))
}

pub(super) fn find(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let needle = string_arg(vm, "find", args[0])?;
    let haystack = vm.heap.get_str(receiver(this)).as_str();
    let index = haystack
        .find(&needle)
        .map_or(-1, |byte| haystack[..byte].chars().count() as i32);
    Ok(NativeReturn::Value(Value::Int(index)))
}

pub(super) fn replace(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let from = string_arg(vm, "replace", args[0])?;
    let to = string_arg(vm, "replace", args[1])?;
    if from.is_empty() {
        return Err(RuntimeError::arity("replace pattern must not be empty"));
    }
    let text = vm
        .heap
        .get_str(receiver(this))
        .as_str()
        .replace(&from, &to);
    Ok(NativeReturn::Value(vm.alloc_string(text)))
}

pub(super) fn startswith(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let prefix = string_arg(vm, "startswith", args[0])?;
    let result = vm.heap.get_str(receiver(this)).as_str().starts_with(&prefix);
    Ok(NativeReturn::Value(Value::Bool(result)))
}

pub(super) fn endswith(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let suffix = string_arg(vm, "endswith", args[0])?;
    let result = vm.heap.get_str(receiver(this)).as_str().ends_with(&suffix);
    Ok(NativeReturn::Value(Value::Bool(result)))
}

pub(super) fn split(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let separator = string_arg(vm, "split", args[0])?;
    if separator.is_empty() {
        return Err(RuntimeError::arity("split separator must not be empty"));
    }
    let parts: Vec<String> = vm
        .heap
        .get_str(receiver(this))
        .as_str()
        .split(&separator)
        .map(str::to_owned)
        .collect();

    // Root the result list while the part strings are allocated into it.
    let list = vm.alloc(HeapData::List(List::with_capacity(parts.len())));
    vm.temp_roots.push(Value::Ref(list));
    for part in parts {
        let s = vm.alloc_string(part);
        vm.heap.get_list_mut(list).items.push(s);
    }
    vm.temp_roots.pop();
    Ok(NativeReturn::Value(Value::Ref(list)))
}
