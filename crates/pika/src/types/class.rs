//! Class and instance payloads.

use ahash::AHashMap;
use strum::Display;

use crate::{heap::HeapId, value::Value};

/// What a class constructs, and which builtin class a primitive maps to.
///
/// Builtin classes carry one of the primitive tags; classes defined in script
/// are always `Instance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum ClassKind {
    Null,
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
    Instance,
}

#[derive(Debug)]
pub(crate) struct Class {
    pub name: String,
    pub super_class: Option<HeapId>,
    /// Module the class was defined in; absent for builtins.
    pub owner: Option<HeapId>,
    pub kind: ClassKind,
    /// Constructor closure (`_init`), looked up through the inheritance
    /// chain at instantiation.
    pub constructor: Option<HeapId>,
    /// Method name to closure.
    pub methods: AHashMap<String, HeapId>,
    /// Static attributes, readable and writable through the class value.
    pub statics: AHashMap<String, Value>,
    pub docs: Option<String>,
}

impl Class {
    pub fn new(name: String, kind: ClassKind, super_class: Option<HeapId>, owner: Option<HeapId>) -> Self {
        Self {
            name,
            super_class,
            owner,
            kind,
            constructor: None,
            methods: AHashMap::new(),
            statics: AHashMap::new(),
            docs: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Instance {
    pub class: HeapId,
    pub attrs: AHashMap<String, Value>,
}

impl Instance {
    pub fn new(class: HeapId) -> Self {
        Self {
            class,
            attrs: AHashMap::new(),
        }
    }
}
