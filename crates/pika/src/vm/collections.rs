//! Subscript access, map plumbing, and the iteration protocol.

use crate::{
    error::{RunResult, RuntimeError},
    heap::{HeapData, HeapId},
    types::List,
    value::Value,
};

use super::Vm;

/// Resolves a possibly negative index against `len`.
fn resolve_index(index: i64, len: usize, what: &str) -> RunResult<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::bound(format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

/// Resolves slice endpoints. Forward slices take `[from, to)` with both
/// endpoints inside `0..=len`; when `from > to` the slice is reversed,
/// reading `(to, from]` backwards.
fn resolve_slice(from: i64, to: i64, len: usize) -> RunResult<(usize, usize)> {
    let len = len as i64;
    let from = if from < 0 { from + len } else { from };
    let to = if to < 0 { to + len } else { to };
    let valid = if from <= to {
        from >= 0 && to <= len
    } else {
        to >= 0 && from < len
    };
    if !valid {
        return Err(RuntimeError::bound("invalid slice range"));
    }
    Ok((from as usize, to as usize))
}

impl Vm {
    pub(super) fn get_subscript(&mut self, receiver: Value, index: Value) -> RunResult<Value> {
        let Value::Ref(id) = receiver else {
            return Err(self.not_subscriptable(receiver));
        };
        match self.heap.get(id) {
            HeapData::Str(_) => self.string_subscript(id, index),
            HeapData::List(_) => self.list_subscript(id, index),
            HeapData::Map(_) => {
                let hash = index.hash_value(&self.heap)?;
                let map = self.heap.get_map(id);
                match map.find(&index, hash, &self.heap) {
                    Some(slot) => Ok(map.value_at(slot)),
                    None => {
                        let mut repr = String::new();
                        index.write_repr(&self.heap, &mut repr);
                        Err(RuntimeError::bound(format!("the map has no key {repr}")))
                    }
                }
            }
            _ => Err(self.not_subscriptable(receiver)),
        }
    }

    fn string_subscript(&mut self, id: HeapId, index: Value) -> RunResult<Value> {
        match index {
            Value::Int(_) | Value::Float(_) => {
                let i = index.as_integer("string")?;
                let len = self.heap.get_str(id).char_count();
                let at = resolve_index(i, len, "string")?;
                let ch = self
                    .heap
                    .get_str(id)
                    .char_at(at)
                    .expect("index validated against length");
                Ok(self.alloc_string(ch.to_string()))
            }
            Value::Ref(range_id) if matches!(self.heap.get(range_id), HeapData::Range(_)) => {
                let HeapData::Range(range) = self.heap.get(range_id) else {
                    unreachable!("matched above");
                };
                let (from, to) = (range.from as i64, range.to as i64);
                let len = self.heap.get_str(id).char_count();
                let (from, to) = resolve_slice(from, to, len)?;
                let sliced = self.heap.get_str(id).slice_chars(from, to);
                Ok(self.alloc_string(sliced))
            }
            _ => Err(RuntimeError::type_error(format!(
                "a string subscript needs a number or a range, got a {}",
                index.type_name(&self.heap)
            ))),
        }
    }

    fn list_subscript(&mut self, id: HeapId, index: Value) -> RunResult<Value> {
        match index {
            Value::Int(_) | Value::Float(_) => {
                let i = index.as_integer("list")?;
                let len = self.heap.get_list(id).len();
                let at = resolve_index(i, len, "list")?;
                Ok(self.heap.get_list(id).items[at])
            }
            Value::Ref(range_id) if matches!(self.heap.get(range_id), HeapData::Range(_)) => {
                let HeapData::Range(range) = self.heap.get(range_id) else {
                    unreachable!("matched above");
                };
                let (from, to) = (range.from as i64, range.to as i64);
                let len = self.heap.get_list(id).len();
                let (from, to) = resolve_slice(from, to, len)?;
                let items: Vec<Value> = if from <= to {
                    self.heap.get_list(id).items[from..to].to_vec()
                } else {
                    self.heap.get_list(id).items[to + 1..=from]
                        .iter()
                        .rev()
                        .copied()
                        .collect()
                };
                let sliced = self.alloc(HeapData::List(List::from_vec(items)));
                Ok(Value::Ref(sliced))
            }
            _ => Err(RuntimeError::type_error(format!(
                "a list subscript needs a number or a range, got a {}",
                index.type_name(&self.heap)
            ))),
        }
    }

    pub(super) fn set_subscript(&mut self, receiver: Value, index: Value, value: Value) -> RunResult<()> {
        let Value::Ref(id) = receiver else {
            return Err(self.not_subscriptable(receiver));
        };
        match self.heap.get(id) {
            HeapData::List(_) => {
                let i = index.as_integer("list")?;
                let len = self.heap.get_list(id).len();
                let at = resolve_index(i, len, "list")?;
                self.heap.get_list_mut(id).items[at] = value;
                Ok(())
            }
            HeapData::Map(_) => self.map_set(id, index, value),
            HeapData::Str(_) => Err(RuntimeError::type_error(
                "strings are immutable and do not support subscript assignment",
            )),
            _ => Err(self.not_subscriptable(receiver)),
        }
    }

    fn not_subscriptable(&self, receiver: Value) -> RuntimeError {
        RuntimeError::type_error(format!(
            "a {} is not subscriptable",
            receiver.type_name(&self.heap)
        ))
    }

    // ------------------------------------------------------------------
    // Map helpers shared with the builtins

    pub(crate) fn map_set(&mut self, map: HeapId, key: Value, value: Value) -> RunResult<()> {
        let hash = key.hash_value(&self.heap)?;
        let existing = self.heap.get_map(map).find(&key, hash, &self.heap);
        match existing {
            Some(slot) => self.heap.get_map_mut(map).set_value_at(slot, value),
            None => {
                self.heap.get_map_mut(map).push_entry(key, value, hash);
                self.heap
                    .note_growth(std::mem::size_of::<(Value, Value, u64)>());
            }
        }
        Ok(())
    }

    pub(crate) fn map_get(&self, map: HeapId, key: Value) -> RunResult<Option<Value>> {
        let hash = key.hash_value(&self.heap)?;
        let m = self.heap.get_map(map);
        Ok(m.find(&key, hash, &self.heap).map(|slot| m.value_at(slot)))
    }

    pub(crate) fn map_remove(&mut self, map: HeapId, key: Value) -> RunResult<Option<Value>> {
        let hash = key.hash_value(&self.heap)?;
        let found = self.heap.get_map(map).find(&key, hash, &self.heap);
        Ok(found.map(|slot| self.heap.get_map_mut(map).remove_at(slot, hash)))
    }

    // ------------------------------------------------------------------
    // Iteration protocol

    /// `ITER_TEST`: validates that the value on top of the stack can drive a
    /// `for` loop.
    pub(super) fn check_iterable(&self) -> RunResult<()> {
        let value = self.peek(0);
        let ok = matches!(
            value,
            Value::Ref(id) if matches!(
                self.heap.get(id),
                HeapData::Str(_) | HeapData::List(_) | HeapData::Map(_) | HeapData::Range(_)
            )
        );
        if ok {
            Ok(())
        } else {
            Err(RuntimeError::type_error(format!(
                "a {} is not iterable",
                value.type_name(&self.heap)
            )))
        }
    }

    /// `ITER`: the top of the stack holds `[sequence, counter, value]`.
    /// Writes the next element into the value slot and advances the counter;
    /// returns `false` once the sequence is exhausted.
    pub(super) fn iterate(&mut self) -> RunResult<bool> {
        enum Step {
            Done,
            Write(Value, usize),
            WriteChar(char, usize),
        }

        let sp = self.fiber().stack.len();
        let seq = self.fiber().stack[sp - 3];
        let Value::Int(counter) = self.fiber().stack[sp - 2] else {
            unreachable!("iteration counter is always an integer");
        };
        let counter = counter as usize;
        let Value::Ref(id) = seq else {
            unreachable!("iterability was checked by ITER_TEST");
        };

        let step = match self.heap.get(id) {
            HeapData::Str(s) => match s.char_at(counter) {
                Some(ch) => Step::WriteChar(ch, counter + 1),
                None => Step::Done,
            },
            HeapData::List(l) => match l.items.get(counter) {
                Some(&item) => Step::Write(item, counter + 1),
                None => Step::Done,
            },
            HeapData::Map(m) => {
                // Scan entry slots, skipping tombstones, until the capacity
                // is reached.
                let mut slot = counter;
                let mut found = Step::Done;
                while slot < m.slot_count() {
                    if let Some((key, _)) = m.entry_at(slot) {
                        found = Step::Write(key, slot + 1);
                        break;
                    }
                    slot += 1;
                }
                found
            }
            HeapData::Range(r) => match r.step(counter as f64) {
                Some(n) => Step::Write(Value::num(n), counter + 1),
                None => Step::Done,
            },
            other => {
                return Err(RuntimeError::type_error(format!(
                    "a {} is not iterable",
                    other.kind_name()
                )));
            }
        };

        match step {
            Step::Done => Ok(false),
            Step::Write(value, next) => {
                let fiber = self.fiber_mut();
                fiber.stack[sp - 1] = value;
                fiber.stack[sp - 2] = Value::Int(next as i32);
                Ok(true)
            }
            Step::WriteChar(ch, next) => {
                let value = self.alloc_string(ch.to_string());
                let fiber = self.fiber_mut();
                fiber.stack[sp - 1] = value;
                fiber.stack[sp - 2] = Value::Int(next as i32);
                Ok(true)
            }
        }
    }
}
