//! Builtin functions and classes.
//!
//! Both arrays live on the VM and are GC roots. `PUSH_BUILTIN_FN` and
//! `PUSH_BUILTIN_TY` index into them directly; the compiler resolves names
//! to indices at compile time. Every primitive kind has a builtin class so
//! `_class` and method dispatch work uniformly.

mod convert;
mod fiber;
mod list;
mod map;
mod math;
mod misc;
mod print;
mod string;

pub(crate) use convert::value_to_number;

use crate::{
    heap::{HeapData, HeapId},
    types::{Class, ClassKind, Closure, Function, NativeFn},
    value::Value,
    vm::Vm,
};

/// Indices of the builtin class array. The install order below must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BuiltinClassId {
    Null = 0,
    Bool,
    Number,
    String,
    List,
    Map,
    Range,
    Function,
    Fiber,
    Module,
    Class,
}

/// Registers every builtin function and class on a fresh VM.
pub(crate) fn install(vm: &mut Vm) {
    // Core functions, in `PUSH_BUILTIN_FN` index order.
    add_fn(vm, "print", -1, "Prints values separated by spaces, then a newline.", print::print);
    add_fn(vm, "to_string", 1, "Returns the display form of a value.", convert::to_string);
    add_fn(vm, "to_number", 1, "Converts a string or number to a number.", convert::to_number);
    add_fn(vm, "yield", -1, "Suspends the current fiber, delivering an optional value to its caller.", fiber::yield_fn);
    add_fn(vm, "list_join", 1, "Concatenates the display forms of a list's elements.", print::list_join);
    add_fn(vm, "hash", 1, "Returns the hash of a hashable value.", misc::hash);
    add_fn(vm, "assert", -1, "Raises when the first argument is falsy.", misc::assert_fn);
    add_fn(vm, "chr", 1, "Returns the one-character string for a code point.", convert::chr);
    add_fn(vm, "ord", 1, "Returns the code point of a one-character string.", convert::ord);
    add_fn(vm, "min", 2, "Returns the smaller of two numbers.", math::min);
    add_fn(vm, "max", 2, "Returns the larger of two numbers.", math::max);
    add_fn(vm, "abs", 1, "Returns the absolute value of a number.", math::abs);

    // Builtin classes, in `BuiltinClassId` order.
    add_class(vm, "Null", ClassKind::Null);
    add_class(vm, "Bool", ClassKind::Bool);
    add_class(vm, "Number", ClassKind::Number);
    let string = add_class(vm, "String", ClassKind::String);
    let list = add_class(vm, "List", ClassKind::List);
    let map = add_class(vm, "Map", ClassKind::Map);
    add_class(vm, "Range", ClassKind::Range);
    add_class(vm, "Function", ClassKind::Function);
    let fiber = add_class(vm, "Fiber", ClassKind::Fiber);
    add_class(vm, "Module", ClassKind::Module);
    add_class(vm, "Class", ClassKind::Class);

    add_method(vm, list, "append", 1, "Appends a value and returns the list.", list::append);
    add_method(vm, list, "insert", 2, "Inserts a value before the given index.", list::insert);
    add_method(vm, list, "pop", -1, "Removes and returns the element at an index (last by default).", list::pop);
    add_method(vm, list, "clear", 0, "Removes every element.", list::clear);
    add_method(vm, list, "find", 1, "Returns the index of a value, or -1.", list::find);
    add_method(vm, list, "extend", 1, "Appends every element of another list.", list::extend);
    add_method(vm, list, "reverse", 0, "Reverses the list in place and returns it.", list::reverse);

    add_method(vm, map, "has", 1, "Returns whether a key is present.", map::has);
    add_method(vm, map, "get", -1, "Returns the value for a key, or a default.", map::get);
    add_method(vm, map, "pop", 1, "Removes a key and returns its value.", map::pop);
    add_method(vm, map, "clear", 0, "Removes every entry.", map::clear);
    add_method(vm, map, "keys", 0, "Returns the keys as a list.", map::keys);
    add_method(vm, map, "values", 0, "Returns the values as a list.", map::values);

    add_method(vm, string, "upper", 0, "Returns an uppercased copy.", string::upper);
    add_method(vm, string, "lower", 0, "Returns a lowercased copy.", string::lower);
    add_method(vm, string, "strip", 0, "Returns a copy without surrounding whitespace.", string::strip);
    add_method(vm, string, "find", 1, "Returns the character index of a substring, or -1.", string::find);
    add_method(vm, string, "split", 1, "Splits around a separator into a list.", string::split);
    add_method(vm, string, "replace", 2, "Returns a copy with every occurrence replaced.", string::replace);
    add_method(vm, string, "startswith", 1, "Returns whether the string starts with a prefix.", string::startswith);
    add_method(vm, string, "endswith", 1, "Returns whether the string ends with a suffix.", string::endswith);

    add_method(vm, fiber, "run", -1, "Starts a new fiber with the given arguments.", fiber::run);
    add_method(vm, fiber, "resume", -1, "Resumes a yielded fiber with an optional value.", fiber::resume);
}

fn add_fn(vm: &mut Vm, name: &str, arity: i8, docs: &str, native: NativeFn) {
    let closure = native_closure(vm, name, arity, docs, native, None);
    vm.builtin_fns.push(closure);
}

fn add_class(vm: &mut Vm, name: &str, kind: ClassKind) -> HeapId {
    let class = vm.alloc(HeapData::Class(Class::new(name.to_owned(), kind, None, None)));
    vm.builtin_classes.push(class);
    class
}

fn add_method(vm: &mut Vm, class: HeapId, name: &str, arity: i8, docs: &str, native: NativeFn) {
    let closure = native_closure(vm, name, arity, docs, native, Some(class));
    vm.heap
        .get_class_mut(class)
        .methods
        .insert(name.to_owned(), closure);
}

fn native_closure(
    vm: &mut Vm,
    name: &str,
    arity: i8,
    docs: &str,
    native: NativeFn,
    owner_class: Option<HeapId>,
) -> HeapId {
    let function = vm.alloc(HeapData::Function(Function::new_native(name, arity, docs, native)));
    if let Some(class) = owner_class {
        let f = vm.heap.get_function_mut(function);
        f.is_method = true;
        f.owner_class = Some(class);
    }
    // Root the bare function across the closure allocation.
    vm.temp_roots.push(Value::Ref(function));
    let closure = vm.alloc(HeapData::Closure(Closure {
        function,
        upvalues: Vec::new(),
    }));
    vm.temp_roots.pop();
    closure
}
