//! Heap object payloads, one file per kind.

mod class;
mod fiber;
mod func;
mod list;
mod map;
mod module;
mod range;
mod str;

pub(crate) use class::{Class, ClassKind, Instance};
pub(crate) use fiber::{CallFrame, Fiber, FiberState};
pub(crate) use func::{Closure, CodeBlob, FnKind, Function, MethodBind, NativeFn, NativeReturn, Upvalue};
pub(crate) use list::List;
pub(crate) use map::Map;
pub(crate) use module::{add_constant, add_global, Module};
pub(crate) use range::Range;
pub(crate) use str::Str;
