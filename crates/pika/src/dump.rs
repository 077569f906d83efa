//! Bytecode disassembly, for debugging the compiler and for emission tests.
//!
//! The dump lists one instruction per line with its byte offset and decoded
//! operands, and recurses into every function found in the module's constant
//! pool, so a single call shows the whole compilation unit.

use std::fmt::Write;

use crate::{
    heap::{Heap, HeapData, HeapId},
    opcode::{Opcode, Operands},
    types::FnKind,
    value::Value,
};

/// Renders every function of a compiled module.
pub(crate) fn dump_module(heap: &Heap, module: HeapId) -> String {
    let mut out = String::new();
    let m = heap.get_module(module);
    if let Some(body) = m.body {
        let function = heap.get_closure(body).function;
        dump_function(heap, function, &mut out);
    }
    for constant in &m.constants {
        if let Value::Ref(id) = constant {
            if matches!(heap.get(*id), HeapData::Function(_)) {
                dump_function(heap, *id, &mut out);
            }
        }
    }
    out
}

fn dump_function(heap: &Heap, function: HeapId, out: &mut String) {
    let f = heap.get_function(function);
    let FnKind::Script(code) = &f.kind else {
        return;
    };
    let _ = writeln!(
        out,
        "fn {} (arity {}, upvalues {}, stack {}):",
        f.name, f.arity, f.upvalue_count, code.stack_size
    );

    let bytes = &code.code;
    let mut ip = 0;
    while ip < bytes.len() {
        let offset = ip;
        let Some(op) = Opcode::from_repr(bytes[ip]) else {
            let _ = writeln!(out, "  {offset:04}  ?? 0x{:02x}", bytes[ip]);
            ip += 1;
            continue;
        };
        ip += 1;
        let name: &'static str = op.into();
        match op.operands() {
            Operands::None => {
                let _ = writeln!(out, "  {offset:04}  {name}");
            }
            Operands::Byte => {
                let operand = bytes[ip];
                ip += 1;
                let _ = writeln!(out, "  {offset:04}  {name} {operand}");
            }
            Operands::Short => {
                let operand = u16::from_be_bytes([bytes[ip], bytes[ip + 1]]);
                ip += 2;
                let _ = writeln!(out, "  {offset:04}  {name} {operand}");
            }
            Operands::ByteShort => {
                let byte = bytes[ip];
                let short = u16::from_be_bytes([bytes[ip + 1], bytes[ip + 2]]);
                ip += 3;
                let _ = writeln!(out, "  {offset:04}  {name} {byte} {short}");
            }
            Operands::ClosureDesc => {
                let fn_index = u16::from_be_bytes([bytes[ip], bytes[ip + 1]]);
                ip += 2;
                let count = match heap.get_module(f.owner.expect("script function has a module"))
                    .constants
                    .get(fn_index as usize)
                {
                    Some(Value::Ref(id)) => heap.get_function(*id).upvalue_count as usize,
                    _ => 0,
                };
                let _ = write!(out, "  {offset:04}  {name} {fn_index}");
                for _ in 0..count {
                    let is_immediate = bytes[ip];
                    let index = bytes[ip + 1];
                    ip += 2;
                    let _ = write!(out, " ({is_immediate} {index})");
                }
                let _ = writeln!(out);
            }
        }
    }
}
