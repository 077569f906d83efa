//! Native methods of the builtin `Map` class.

use crate::{
    error::{RunResult, RuntimeError},
    heap::{HeapData, HeapId},
    types::{List, NativeReturn},
    value::Value,
    vm::Vm,
};

fn receiver(this: Value) -> HeapId {
    let Value::Ref(id) = this else {
        unreachable!("map method dispatched on a non-map receiver");
    };
    id
}

pub(super) fn has(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let map = receiver(this);
    let present = vm.map_get(map, args[0])?.is_some();
    Ok(NativeReturn::Value(Value::Bool(present)))
}

pub(super) fn get(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::arity(format!(
            "get expects 1 or 2 arguments, got {}",
            args.len()
        )));
    }
    let map = receiver(this);
    let found = vm.map_get(map, args[0])?;
    let fallback = args.get(1).copied().unwrap_or(Value::Null);
    Ok(NativeReturn::Value(found.unwrap_or(fallback)))
}

pub(super) fn pop(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let map = receiver(this);
    match vm.map_remove(map, args[0])? {
        Some(value) => Ok(NativeReturn::Value(value)),
        None => {
            let mut repr = String::new();
            args[0].write_repr(&vm.heap, &mut repr);
            Err(RuntimeError::bound(format!("the map has no key {repr}")))
        }
    }
}

pub(super) fn clear(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let map = receiver(this);
    vm.heap.get_map_mut(map).clear();
    Ok(NativeReturn::Value(Value::Null))
}

pub(super) fn keys(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let map = receiver(this);
    let items: Vec<Value> = vm.heap.get_map(map).iter().map(|(k, _)| *k).collect();
    let list = vm.alloc(HeapData::List(List::from_vec(items)));
    Ok(NativeReturn::Value(Value::Ref(list)))
}

pub(super) fn values(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let map = receiver(this);
    let items: Vec<Value> = vm.heap.get_map(map).iter().map(|(_, v)| *v).collect();
    let list = vm.alloc(HeapData::List(List::from_vec(items)));
    Ok(NativeReturn::Value(Value::Ref(list)))
}
