//! Native methods of the builtin `List` class.

use crate::{
    error::{RunResult, RuntimeError},
    heap::HeapId,
    types::NativeReturn,
    value::Value,
    vm::Vm,
};

fn receiver(this: Value) -> HeapId {
    let Value::Ref(id) = this else {
        unreachable!("list method dispatched on a non-list receiver");
    };
    id
}

pub(super) fn append(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    vm.heap.get_list_mut(list).items.push(args[0]);
    vm.heap.note_growth(std::mem::size_of::<Value>());
    Ok(NativeReturn::Value(this))
}

pub(super) fn insert(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    let index = args[0].as_integer("insert index")?;
    let len = vm.heap.get_list(list).len();
    if index < 0 || index > len as i64 {
        return Err(RuntimeError::bound("insert index out of range"));
    }
    vm.heap.get_list_mut(list).items.insert(index as usize, args[1]);
    vm.heap.note_growth(std::mem::size_of::<Value>());
    Ok(NativeReturn::Value(this))
}

pub(super) fn pop(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    if args.len() > 1 {
        return Err(RuntimeError::arity(format!(
            "pop expects at most 1 argument, got {}",
            args.len()
        )));
    }
    let len = vm.heap.get_list(list).len();
    if len == 0 {
        return Err(RuntimeError::bound("cannot pop from an empty list"));
    }
    let at = match args.first() {
        Some(index) => {
            let i = index.as_integer("pop index")?;
            let resolved = if i < 0 { i + len as i64 } else { i };
            if resolved < 0 || resolved >= len as i64 {
                return Err(RuntimeError::bound("pop index out of range"));
            }
            resolved as usize
        }
        None => len - 1,
    };
    let value = vm.heap.get_list_mut(list).items.remove(at);
    Ok(NativeReturn::Value(value))
}

pub(super) fn extend(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    let Value::Ref(other) = args[0] else {
        return Err(RuntimeError::arity(format!(
            "extend expects a list, got a {}",
            args[0].type_name(&vm.heap)
        )));
    };
    if !matches!(vm.heap.get(other), crate::heap::HeapData::List(_)) {
        return Err(RuntimeError::arity(format!(
            "extend expects a list, got a {}",
            args[0].type_name(&vm.heap)
        )));
    }
    let extra = vm.heap.get_list(other).items.clone();
    let grown = extra.len() * std::mem::size_of::<Value>();
    vm.heap.get_list_mut(list).items.extend(extra);
    vm.heap.note_growth(grown);
    Ok(NativeReturn::Value(this))
}

pub(super) fn reverse(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    vm.heap.get_list_mut(list).items.reverse();
    Ok(NativeReturn::Value(this))
}

pub(super) fn clear(vm: &mut Vm, this: Value, _args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    vm.heap.get_list_mut(list).items.clear();
    Ok(NativeReturn::Value(Value::Null))
}

pub(super) fn find(vm: &mut Vm, this: Value, args: &[Value], _ret: usize) -> RunResult<NativeReturn> {
    let list = receiver(this);
    let found = vm
        .heap
        .get_list(list)
        .items
        .iter()
        .position(|item| item.equals(&args[0], &vm.heap));
    Ok(NativeReturn::Value(Value::Int(
        found.map_or(-1, |i| i as i32),
    )))
}
