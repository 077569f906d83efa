//! Unary and binary operators.
//!
//! Arithmetic follows IEEE-754 doubles with results normalized back to
//! integers when they fit. Bitwise operators and shifts coerce through
//! signed 64-bit integers and reject non-integral operands; shift counts are
//! restricted to `0..64`. The `inplace` flag (set by compound assignment)
//! lets list concatenation mutate the left operand instead of allocating.

use crate::{
    error::{RunResult, RuntimeError},
    heap::HeapData,
    opcode::Opcode,
    value::Value,
};

use super::Vm;

impl Vm {
    pub(super) fn unary_op(&mut self, op: Opcode, value: Value) -> RunResult<Value> {
        match op {
            Opcode::Positive => match value.as_num() {
                Some(n) => Ok(Value::num(n)),
                None => Err(self.operand_error("+", value)),
            },
            Opcode::Negative => match value.as_num() {
                Some(n) => Ok(Value::num(-n)),
                None => Err(self.operand_error("-", value)),
            },
            Opcode::Not => Ok(Value::Bool(!value.truthy(&self.heap))),
            Opcode::BitNot => {
                let n = value.as_integer("operand of '~'")?;
                Ok(Value::num(!n as f64))
            }
            _ => unreachable!("not a unary opcode"),
        }
    }

    pub(super) fn binary_op(
        &mut self,
        op: Opcode,
        lhs: Value,
        rhs: Value,
        inplace: bool,
    ) -> RunResult<Value> {
        match op {
            Opcode::Add => self.op_add(lhs, rhs, inplace),
            Opcode::Subtract => self.numeric(lhs, rhs, "-", |a, b| a - b),
            Opcode::Multiply => self.numeric(lhs, rhs, "*", |a, b| a * b),
            Opcode::Divide => self.numeric(lhs, rhs, "/", |a, b| a / b),
            Opcode::Exponent => self.numeric(lhs, rhs, "**", f64::powf),
            Opcode::Mod => self.numeric(lhs, rhs, "%", |a, b| a % b),
            Opcode::BitAnd => self.integral(lhs, rhs, "&", |a, b| a & b),
            Opcode::BitOr => self.integral(lhs, rhs, "|", |a, b| a | b),
            Opcode::BitXor => self.integral(lhs, rhs, "^", |a, b| a ^ b),
            Opcode::BitLshift => self.shift(lhs, rhs, "<<", |a, count| a << count),
            Opcode::BitRshift => self.shift(lhs, rhs, ">>", |a, count| a >> count),
            _ => unreachable!("not a binary opcode"),
        }
    }

    fn op_add(&mut self, lhs: Value, rhs: Value, inplace: bool) -> RunResult<Value> {
        if let (Some(a), Some(b)) = (lhs.as_num(), rhs.as_num()) {
            return Ok(Value::num(a + b));
        }
        if let (Value::Ref(left), Value::Ref(right)) = (lhs, rhs) {
            match (self.heap.get(left), self.heap.get(right)) {
                (HeapData::Str(a), HeapData::Str(b)) => {
                    let mut out = String::with_capacity(a.as_str().len() + b.as_str().len());
                    out.push_str(a.as_str());
                    out.push_str(b.as_str());
                    return Ok(self.alloc_string(out));
                }
                (HeapData::List(_), HeapData::List(_)) => {
                    if inplace {
                        let extra = self.heap.get_list(right).items.clone();
                        let grown = extra.len() * std::mem::size_of::<Value>();
                        self.heap.get_list_mut(left).items.extend(extra);
                        self.heap.note_growth(grown);
                        return Ok(lhs);
                    }
                    let mut items = self.heap.get_list(left).items.clone();
                    items.extend_from_slice(&self.heap.get_list(right).items);
                    let id = self.alloc(HeapData::List(crate::types::List::from_vec(items)));
                    return Ok(Value::Ref(id));
                }
                _ => {}
            }
        }
        Err(self.operands_error("+", lhs, rhs))
    }

    fn numeric(
        &self,
        lhs: Value,
        rhs: Value,
        op: &str,
        apply: impl Fn(f64, f64) -> f64,
    ) -> RunResult<Value> {
        match (lhs.as_num(), rhs.as_num()) {
            (Some(a), Some(b)) => Ok(Value::num(apply(a, b))),
            _ => Err(self.operands_error(op, lhs, rhs)),
        }
    }

    fn integral(
        &self,
        lhs: Value,
        rhs: Value,
        op: &str,
        apply: impl Fn(i64, i64) -> i64,
    ) -> RunResult<Value> {
        let a = lhs.as_integer(&format!("left operand of '{op}'"))?;
        let b = rhs.as_integer(&format!("right operand of '{op}'"))?;
        Ok(Value::num(apply(a, b) as f64))
    }

    fn shift(
        &self,
        lhs: Value,
        rhs: Value,
        op: &str,
        apply: impl Fn(i64, u32) -> i64,
    ) -> RunResult<Value> {
        let a = lhs.as_integer(&format!("left operand of '{op}'"))?;
        let count = rhs.as_integer(&format!("shift count of '{op}'"))?;
        if !(0..64).contains(&count) {
            return Err(RuntimeError::type_error(format!(
                "shift count must be between 0 and 63, got {count}"
            )));
        }
        Ok(Value::num(apply(a, count as u32) as f64))
    }

    fn operand_error(&self, op: &str, value: Value) -> RuntimeError {
        RuntimeError::type_error(format!(
            "unsupported operand for unary '{op}': '{}'",
            value.type_name(&self.heap)
        ))
    }

    pub(super) fn operands_error(&self, op: &str, lhs: Value, rhs: Value) -> RuntimeError {
        RuntimeError::type_error(format!(
            "unsupported operand types for '{op}': '{}' and '{}'",
            lhs.type_name(&self.heap),
            rhs.type_name(&self.heap)
        ))
    }
}
