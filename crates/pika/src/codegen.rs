//! Bytecode emission buffer used by the compiler.
//!
//! `CodeBuffer` encodes opcodes and operands, manages forward-jump patching,
//! records the source line of every emitted byte, and tracks the running
//! stack depth so each function's `stack_size` high-water mark is known
//! statically.

use crate::{
    opcode::Opcode,
    types::CodeBlob,
};

/// Sentinel operand emitted for jumps that are patched later.
const PLACEHOLDER: u16 = 0xffff;

#[derive(Debug, Default)]
pub(crate) struct CodeBuffer {
    code: Vec<u8>,
    lines: Vec<u32>,
    /// Offset of the most recently emitted opcode byte, for the tail-call
    /// rewrite.
    last_op: usize,
    depth: i32,
    max_depth: i32,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Current statically tracked stack depth.
    #[inline]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Restores the tracked depth after a diverging path (break/continue)
    /// emitted pops the fall-through path still owes.
    pub fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    /// Adjusts the tracked stack depth; called by the compiler for opcodes
    /// whose effect depends on an operand.
    pub fn adjust(&mut self, delta: i32) {
        self.depth += delta;
        // Error recovery can leave the tracker short; the buffer is thrown
        // away in that case, so clamp rather than assert.
        if self.depth < 0 {
            self.depth = 0;
        }
        if self.depth > self.max_depth {
            self.max_depth = self.depth;
        }
    }

    fn push_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    fn push_short(&mut self, value: u16, line: u32) {
        let [hi, lo] = value.to_be_bytes();
        self.push_byte(hi, line);
        self.push_byte(lo, line);
    }

    fn push_op(&mut self, op: Opcode, line: u32) {
        self.last_op = self.code.len();
        self.push_byte(op as u8, line);
        if let Some(effect) = op.stack_effect() {
            self.adjust(i32::from(effect));
        }
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode, line: u32) {
        self.push_op(op, line);
    }

    /// Emits an instruction with a single byte operand.
    pub fn emit_byte(&mut self, op: Opcode, operand: u8, line: u32) {
        self.push_op(op, line);
        self.push_byte(operand, line);
    }

    /// Emits an instruction with a big-endian u16 operand.
    pub fn emit_short(&mut self, op: Opcode, operand: u16, line: u32) {
        self.push_op(op, line);
        self.push_short(operand, line);
    }

    /// Emits an instruction with a byte operand followed by a u16 operand
    /// (`MethodCall` / `SuperCall`: argc then name index).
    pub fn emit_byte_short(&mut self, op: Opcode, byte: u8, short: u16, line: u32) {
        self.push_op(op, line);
        self.push_byte(byte, line);
        self.push_short(short, line);
    }

    /// Emits a raw operand byte belonging to the previous instruction
    /// (upvalue descriptor pairs after `PushClosure`).
    pub fn emit_raw(&mut self, byte: u8, line: u32) {
        self.push_byte(byte, line);
    }

    /// Emits a jump with a placeholder offset; returns the operand position
    /// to hand to [`CodeBuffer::patch_jump`].
    pub fn emit_jump(&mut self, op: Opcode, line: u32) -> usize {
        self.push_op(op, line);
        let at = self.code.len();
        self.push_short(PLACEHOLDER, line);
        at
    }

    /// Emits an instruction whose u16 operand is filled in later (list
    /// literals whose length is unknown until parsed); returns the operand
    /// position for [`CodeBuffer::patch_short`].
    pub fn emit_jump_operand(&mut self, op: Opcode, line: u32) -> usize {
        self.push_op(op, line);
        let at = self.code.len();
        self.push_short(PLACEHOLDER, line);
        at
    }

    /// Overwrites the u16 operand at `at` with `value`.
    pub fn patch_short(&mut self, at: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.code[at] = hi;
        self.code[at + 1] = lo;
    }

    /// Points the jump whose operand lives at `at` to the current position.
    ///
    /// Fails when the distance exceeds the 16-bit operand range.
    pub fn patch_jump(&mut self, at: usize) -> Result<(), ()> {
        let target = self.code.len();
        let distance = target - (at + 2);
        let Ok(offset) = u16::try_from(distance) else {
            return Err(());
        };
        let [hi, lo] = offset.to_be_bytes();
        self.code[at] = hi;
        self.code[at + 1] = lo;
        Ok(())
    }

    /// Emits a backwards jump to `target` (a position at or before the
    /// current one).
    pub fn emit_loop(&mut self, target: usize, line: u32) -> Result<(), ()> {
        self.push_op(Opcode::Loop, line);
        // The offset is measured from just past the operand.
        let distance = self.code.len() + 2 - target;
        let Ok(offset) = u16::try_from(distance) else {
            return Err(());
        };
        self.push_short(offset, line);
        Ok(())
    }

    /// Rewrites the most recent instruction from `Call` to `TailCall`.
    ///
    /// Only valid when the caller has checked the last instruction really is
    /// a call; used for `return f(...)` when tail calls are enabled.
    pub fn make_tail_call(&mut self) {
        debug_assert_eq!(self.code[self.last_op], Opcode::Call as u8);
        self.code[self.last_op] = Opcode::TailCall as u8;
    }

    /// Whether the last emitted instruction is a plain `Call`.
    pub fn last_is_call(&self) -> bool {
        self.code.get(self.last_op) == Some(&(Opcode::Call as u8))
    }

    /// Finalizes the buffer into a function's code blob.
    pub fn finish(self) -> CodeBlob {
        debug_assert_eq!(self.code.len(), self.lines.len());
        CodeBlob {
            code: self.code,
            lines: self.lines,
            stack_size: u16::try_from(self.max_depth).unwrap_or(u16::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_patching_points_past_the_operand() {
        let mut buf = CodeBuffer::new();
        buf.emit(Opcode::PushTrue, 1);
        let jump = buf.emit_jump(Opcode::JumpIfNot, 1);
        buf.emit(Opcode::PushNull, 2);
        buf.emit(Opcode::Pop, 2);
        buf.patch_jump(jump).unwrap();

        let blob = buf.finish();
        // Offset covers PushNull + Pop (two bytes).
        assert_eq!(&blob.code[jump..jump + 2], &[0, 2]);
    }

    #[test]
    fn loop_offset_reaches_back_to_target() {
        let mut buf = CodeBuffer::new();
        let start = buf.position();
        buf.emit(Opcode::PushTrue, 1);
        buf.emit(Opcode::Pop, 1);
        buf.emit_loop(start, 1).unwrap();
        let blob = buf.finish();
        // ip after reading the operand is 5; 5 - 5 = 0 = start.
        assert_eq!(&blob.code[3..5], &[0, 5]);
    }

    #[test]
    fn stack_high_water_is_tracked() {
        let mut buf = CodeBuffer::new();
        buf.emit(Opcode::PushNull, 1);
        buf.emit(Opcode::PushNull, 1);
        buf.emit(Opcode::Pop, 1);
        buf.emit(Opcode::Pop, 1);
        assert_eq!(buf.finish().stack_size, 2);
    }
}
