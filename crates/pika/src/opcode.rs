//! The bytecode instruction set.
//!
//! Instructions are a one-byte opcode optionally followed by operand bytes:
//! one byte for small indices and flags, two big-endian bytes for constant,
//! name, and jump offsets. `PushClosure` is additionally followed by one
//! `(is_immediate, index)` byte pair per upvalue of the target function.

use strum::{FromRepr, IntoStaticStr};

/// Operand layout of an opcode, used by the disassembler and the line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operands {
    None,
    /// One raw byte (small index, argument count, or inplace flag).
    Byte,
    /// One big-endian u16 (constant / name / jump offset).
    Short,
    /// u8 then u16: argument count plus method-name constant.
    ByteShort,
    /// u16 function constant followed by upvalue descriptor pairs.
    ClosureDesc,
}

/// The complete opcode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub(crate) enum Opcode {
    // Push constants and literals.
    PushConstant,
    PushNull,
    PushZero,
    PushTrue,
    PushFalse,
    PushList,
    PushMap,
    PushSelf,
    PushClosure,

    // Stack manipulation.
    Swap,
    Dup,
    Pop,
    ListAppend,
    MapInsert,

    // Variables.
    PushLocal0,
    PushLocal1,
    PushLocal2,
    PushLocal3,
    PushLocal4,
    PushLocal5,
    PushLocal6,
    PushLocal7,
    PushLocal8,
    PushLocalN,
    StoreLocal0,
    StoreLocal1,
    StoreLocal2,
    StoreLocal3,
    StoreLocal4,
    StoreLocal5,
    StoreLocal6,
    StoreLocal7,
    StoreLocal8,
    StoreLocalN,
    PushGlobal,
    StoreGlobal,
    PushBuiltinFn,
    PushBuiltinTy,
    PushUpvalue,
    StoreUpvalue,
    CloseUpvalue,

    // Control flow. Jump offsets are relative to the position just past the
    // operand; `Loop` subtracts instead of adding.
    Jump,
    Loop,
    JumpIf,
    JumpIfNot,
    Or,
    And,
    IterTest,
    Iter,

    // Calls.
    Call,
    TailCall,
    MethodCall,
    SuperCall,
    Return,
    End,

    // Classes and objects.
    CreateClass,
    BindMethod,
    GetAttrib,
    GetAttribKeep,
    SetAttrib,
    GetSubscript,
    GetSubscriptKeep,
    SetSubscript,

    // Unary operators.
    Positive,
    Negative,
    Not,
    BitNot,

    // Binary operators; each is followed by a one-byte inplace flag.
    Add,
    Subtract,
    Multiply,
    Divide,
    Exponent,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    BitLshift,
    BitRshift,

    // Comparisons and tests.
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Range,
    In,
    Is,

    // Modules.
    Import,

    // REPL-only: pop TOS and print its repr when non-null.
    ReplPrint,
}

impl Opcode {
    /// Operand layout for this opcode.
    pub fn operands(self) -> Operands {
        use Opcode::*;
        match self {
            PushConstant | PushList | Jump | Loop | JumpIf | JumpIfNot | Or | And | Iter
            | CreateClass | GetAttrib | GetAttribKeep | SetAttrib | Import => Operands::Short,
            PushClosure => Operands::ClosureDesc,
            PushLocalN | StoreLocalN | PushGlobal | StoreGlobal | PushBuiltinFn | PushBuiltinTy
            | PushUpvalue | StoreUpvalue | Call | TailCall | Add | Subtract | Multiply | Divide
            | Exponent | Mod | BitAnd | BitOr | BitXor | BitLshift | BitRshift => Operands::Byte,
            MethodCall | SuperCall => Operands::ByteShort,
            _ => Operands::None,
        }
    }

    /// Static stack delta, `None` for opcodes whose effect depends on an
    /// operand (calls) or on control flow already accounted elsewhere.
    pub fn stack_effect(self) -> Option<i16> {
        use Opcode::*;
        Some(match self {
            PushConstant | PushNull | PushZero | PushTrue | PushFalse | PushList | PushMap
            | PushSelf | PushClosure | Dup | PushLocal0 | PushLocal1 | PushLocal2 | PushLocal3
            | PushLocal4 | PushLocal5 | PushLocal6 | PushLocal7 | PushLocal8 | PushLocalN
            | PushGlobal | PushBuiltinFn | PushBuiltinTy | PushUpvalue | GetAttribKeep
            | GetSubscriptKeep | Import => 1,
            Swap | Jump | Loop | IterTest | Iter | End | CreateClass | GetAttrib | Positive
            | Negative | Not | BitNot | StoreLocal0 | StoreLocal1 | StoreLocal2 | StoreLocal3
            | StoreLocal4 | StoreLocal5 | StoreLocal6 | StoreLocal7 | StoreLocal8 | StoreLocalN
            | StoreGlobal | StoreUpvalue => 0,
            Pop | ListAppend | CloseUpvalue | JumpIf | JumpIfNot | Or | And | Return
            | BindMethod | SetAttrib | GetSubscript | Add | Subtract | Multiply | Divide
            | Exponent | Mod | BitAnd | BitOr | BitXor | BitLshift | BitRshift | EqEq | NotEq
            | Lt | LtEq | Gt | GtEq | Range | In | Is | ReplPrint => -1,
            MapInsert | SetSubscript => -2,
            Call | TailCall | MethodCall | SuperCall => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_repr() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_repr(Opcode::ReplPrint as u8), Some(Opcode::ReplPrint));
    }

    #[test]
    fn binary_operators_carry_an_inplace_byte() {
        for op in [Opcode::Add, Opcode::Subtract, Opcode::BitLshift] {
            assert_eq!(op.operands(), Operands::Byte);
        }
    }
}
