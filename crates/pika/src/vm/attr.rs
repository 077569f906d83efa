//! Polymorphic attribute access.
//!
//! Every value answers `_class`; the rest of the surface depends on the
//! kind. Instances check their attribute map first, then the class chain
//! for methods (returned bound); classes expose statics and unbound method
//! binds.

use crate::{
    error::{RunResult, RuntimeError},
    heap::{HeapData, HeapId},
    types::{add_constant, add_global, MethodBind},
    value::Value,
};

use super::Vm;

impl Vm {
    pub(super) fn get_attrib(&mut self, receiver: Value, name: &str) -> RunResult<Value> {
        if name == "_class" {
            return Ok(Value::Ref(self.class_of_value(receiver)));
        }

        let Value::Ref(id) = receiver else {
            return Err(self.no_attribute(receiver, name));
        };

        match self.heap.get(id) {
            HeapData::Str(s) => match name {
                "length" => Ok(Value::Int(s.char_count() as i32)),
                _ => Err(self.no_attribute(receiver, name)),
            },
            HeapData::List(l) => match name {
                "length" => Ok(Value::Int(l.len() as i32)),
                _ => Err(self.no_attribute(receiver, name)),
            },
            HeapData::Range(r) => match name {
                "first" => Ok(Value::num(r.from)),
                "last" => Ok(Value::num(r.to)),
                "as_list" => {
                    let steps = r.to_vec();
                    let items: Vec<Value> = steps.into_iter().map(Value::num).collect();
                    let list = self.alloc(HeapData::List(crate::types::List::from_vec(items)));
                    Ok(Value::Ref(list))
                }
                _ => Err(self.no_attribute(receiver, name)),
            },
            HeapData::Module(m) => match m.global_index(name, &self.heap) {
                Some(index) => Ok(m.globals[index]),
                None => {
                    let module_name = m.name.clone();
                    Err(RuntimeError::name(format!(
                        "module '{module_name}' has no global '{name}'"
                    )))
                }
            },
            HeapData::Closure(c) => {
                let function = c.function;
                self.callable_attrib(receiver, function, name, None)
            }
            HeapData::MethodBind(bind) => {
                let function = self.heap.get_closure(bind.closure).function;
                let instance = bind.receiver;
                self.callable_attrib(receiver, function, name, Some(instance))
            }
            HeapData::Function(_) => {
                let function = id;
                self.callable_attrib(receiver, function, name, None)
            }
            HeapData::Fiber(f) => match name {
                "is_done" => Ok(Value::Bool(f.state == crate::types::FiberState::Done)),
                "function" => Ok(Value::Ref(f.closure)),
                _ => Err(self.no_attribute(receiver, name)),
            },
            HeapData::Class(c) => match name {
                "name" => {
                    let text = c.name.clone();
                    Ok(self.alloc_string(text))
                }
                "parent" => Ok(c.super_class.map_or(Value::Null, Value::Ref)),
                "_docs" => {
                    let docs = c.docs.clone();
                    Ok(docs.map_or(Value::Null, |d| self.alloc_string(d)))
                }
                _ => {
                    if let Some(&value) = c.statics.get(name) {
                        return Ok(value);
                    }
                    if let Some(method) = self.resolve_method(id, name) {
                        let bind = self.alloc(HeapData::MethodBind(MethodBind {
                            closure: method,
                            receiver: Value::Undefined,
                        }));
                        return Ok(Value::Ref(bind));
                    }
                    Err(self.no_attribute(receiver, name))
                }
            },
            HeapData::Instance(instance) => {
                if let Some(&value) = instance.attrs.get(name) {
                    return Ok(value);
                }
                let class = instance.class;
                if let Some(method) = self.resolve_method(class, name) {
                    let bind = self.alloc(HeapData::MethodBind(MethodBind {
                        closure: method,
                        receiver,
                    }));
                    return Ok(Value::Ref(bind));
                }
                let class_name = self.heap.get_class(class).name.clone();
                Err(RuntimeError::name(format!(
                    "'{class_name}' instance has no attribute '{name}'"
                )))
            }
            HeapData::Upvalue(_) => Err(self.no_attribute(receiver, name)),
            HeapData::Map(_) => Err(self.no_attribute(receiver, name)),
        }
    }

    /// Shared `name` / `arity` / `_docs` surface of closures, method binds,
    /// and raw functions; binds additionally expose `instance`.
    fn callable_attrib(
        &mut self,
        receiver: Value,
        function: HeapId,
        name: &str,
        instance: Option<Value>,
    ) -> RunResult<Value> {
        match name {
            "name" => {
                let text = self.heap.get_function(function).name.clone();
                Ok(self.alloc_string(text))
            }
            "arity" => Ok(Value::Int(i32::from(self.heap.get_function(function).arity))),
            "_docs" => {
                let docs = self.heap.get_function(function).docs.clone();
                Ok(docs.map_or(Value::Null, |d| self.alloc_string(d)))
            }
            "instance" => match instance {
                Some(value) if !value.is_undefined() => Ok(value),
                Some(_) => Ok(Value::Null),
                None => Err(self.no_attribute(receiver, name)),
            },
            _ => Err(self.no_attribute(receiver, name)),
        }
    }

    pub(super) fn set_attrib(&mut self, receiver: Value, name: &str, value: Value) -> RunResult<()> {
        let Value::Ref(id) = receiver else {
            return Err(RuntimeError::name(format!(
                "cannot set an attribute on a {}",
                receiver.type_name(&self.heap)
            )));
        };
        match self.heap.get(id) {
            HeapData::Module(m) => {
                if let Some(index) = m.global_index(name, &self.heap) {
                    self.heap.get_module_mut(id).globals[index] = value;
                    return Ok(());
                }
                // Writing a new name through a module creates the global.
                let name_value = self.alloc_string(name.to_owned());
                let name_idx = add_constant(&mut self.heap, id, name_value)?;
                let global = add_global(&mut self.heap, id, name_idx)?;
                self.heap.get_module_mut(id).globals[global as usize] = value;
                Ok(())
            }
            HeapData::Instance(_) => {
                self.heap
                    .get_instance_mut(id)
                    .attrs
                    .insert(name.to_owned(), value);
                Ok(())
            }
            HeapData::Class(_) => {
                self.heap
                    .get_class_mut(id)
                    .statics
                    .insert(name.to_owned(), value);
                Ok(())
            }
            HeapData::Str(_) | HeapData::List(_) if name == "length" => Err(RuntimeError::name(
                "the attribute 'length' is immutable".to_owned(),
            )),
            other => Err(RuntimeError::name(format!(
                "cannot set an attribute on a {}",
                other.kind_name()
            ))),
        }
    }

    fn no_attribute(&self, receiver: Value, name: &str) -> RuntimeError {
        RuntimeError::name(format!(
            "a {} has no attribute '{name}'",
            receiver.type_name(&self.heap)
        ))
    }
}
