//! Comparison, containment, type tests, and range construction.

use std::cmp::Ordering;

use crate::{
    error::{RunResult, RuntimeError},
    heap::HeapData,
    opcode::Opcode,
    types::Range,
    value::Value,
};

use super::Vm;

impl Vm {
    pub(super) fn compare_op(&mut self, op: Opcode, lhs: Value, rhs: Value) -> RunResult<Value> {
        let result = match op {
            Opcode::EqEq => lhs.equals(&rhs, &self.heap),
            Opcode::NotEq => !lhs.equals(&rhs, &self.heap),
            Opcode::Lt => lhs.compare(&rhs, &self.heap)? == Ordering::Less,
            Opcode::LtEq => lhs.compare(&rhs, &self.heap)? != Ordering::Greater,
            Opcode::Gt => lhs.compare(&rhs, &self.heap)? == Ordering::Greater,
            Opcode::GtEq => lhs.compare(&rhs, &self.heap)? != Ordering::Less,
            Opcode::In => self.contains(lhs, rhs)?,
            Opcode::Is => self.is_instance(lhs, rhs)?,
            _ => unreachable!("not a comparison opcode"),
        };
        Ok(Value::Bool(result))
    }

    /// `elem in container`: list membership, map key presence, substring
    /// search, numeric range containment.
    fn contains(&self, elem: Value, container: Value) -> RunResult<bool> {
        let Value::Ref(id) = container else {
            return Err(RuntimeError::type_error(format!(
                "'in' needs a container on the right, got a {}",
                container.type_name(&self.heap)
            )));
        };
        match self.heap.get(id) {
            HeapData::List(list) => Ok(list.items.iter().any(|item| item.equals(&elem, &self.heap))),
            HeapData::Map(map) => {
                let hash = elem.hash_value(&self.heap)?;
                Ok(map.find(&elem, hash, &self.heap).is_some())
            }
            HeapData::Str(haystack) => {
                let Value::Ref(needle_id) = elem else {
                    return Err(RuntimeError::type_error(
                        "'in' on a string needs a string on the left",
                    ));
                };
                let HeapData::Str(needle) = self.heap.get(needle_id) else {
                    return Err(RuntimeError::type_error(
                        "'in' on a string needs a string on the left",
                    ));
                };
                Ok(haystack.as_str().contains(needle.as_str()))
            }
            HeapData::Range(range) => match elem.as_num() {
                Some(n) => Ok(range.contains(n)),
                None => Err(RuntimeError::type_error(
                    "'in' on a range needs a number on the left",
                )),
            },
            other => Err(RuntimeError::type_error(format!(
                "'in' needs a container on the right, got a {}",
                other.kind_name()
            ))),
        }
    }

    /// `value is Class`: walks the value's class chain, builtin classes
    /// included.
    fn is_instance(&self, value: Value, class_value: Value) -> RunResult<bool> {
        let Value::Ref(class_id) = class_value else {
            return Err(RuntimeError::type_error(format!(
                "'is' needs a class on the right, got a {}",
                class_value.type_name(&self.heap)
            )));
        };
        if !matches!(self.heap.get(class_id), HeapData::Class(_)) {
            return Err(RuntimeError::type_error(format!(
                "'is' needs a class on the right, got a {}",
                self.heap.get(class_id).kind_name()
            )));
        }
        let mut cursor = Some(self.class_of_value(value));
        while let Some(current) = cursor {
            if current == class_id {
                return Ok(true);
            }
            cursor = self.heap.get_class(current).super_class;
        }
        Ok(false)
    }

    /// `from .. to`: endpoints must be whole numbers, which is what makes
    /// range iteration terminate.
    pub(super) fn make_range(&mut self, from: Value, to: Value) -> RunResult<Value> {
        let from = from.as_integer("range start")?;
        let to = to.as_integer("range end")?;
        let id = self.alloc(crate::heap::HeapData::Range(Range::new(from as f64, to as f64)));
        Ok(Value::Ref(id))
    }
}
