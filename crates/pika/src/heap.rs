//! The heap arena and the mark-and-sweep collector's object-level machinery.
//!
//! Every heap object lives in a slot of the arena and is addressed by a
//! [`HeapId`]. Freed slots are recycled through a free list. The arena also
//! owns the byte accounting that decides when the VM should run a collection;
//! the root scan itself lives on the VM, which knows where the roots are.

use std::collections::BTreeMap;

use crate::{
    types::{Class, Closure, Fiber, Function, Instance, List, Map, MethodBind, Module, Range, Str, Upvalue},
    value::Value,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a heap slot: one variant per object kind the language has.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Str),
    List(List),
    Map(Map),
    Range(Range),
    Module(Module),
    Function(Function),
    Closure(Closure),
    MethodBind(MethodBind),
    Upvalue(Upvalue),
    Fiber(Fiber),
    Class(Class),
    Instance(Instance),
}

impl HeapData {
    /// Static name of this object kind, for error messages and stats.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "String",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Range(_) => "Range",
            Self::Module(_) => "Module",
            Self::Function(_) => "Function",
            Self::Closure(_) => "Function",
            Self::MethodBind(_) => "Method",
            Self::Upvalue(_) => "Upvalue",
            Self::Fiber(_) => "Fiber",
            Self::Class(_) => "Class",
            Self::Instance(_) => "Instance",
        }
    }

    /// Stats bucket name; unlike `kind_name` this distinguishes the internal
    /// object kinds that share a user-facing name.
    fn stats_name(&self) -> &'static str {
        match self {
            Self::Closure(_) => "Closure",
            Self::MethodBind(_) => "MethodBind",
            other => other.kind_name(),
        }
    }

    /// Rough byte footprint used by the collector's accounting.
    pub fn estimate_size(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        base + match self {
            Self::Str(s) => s.as_str().len(),
            Self::List(l) => l.items.capacity() * std::mem::size_of::<Value>(),
            Self::Map(m) => m.slot_count() * std::mem::size_of::<(Value, Value, u64)>(),
            Self::Module(m) => {
                (m.constants.capacity() + m.globals.capacity()) * std::mem::size_of::<Value>()
            }
            Self::Function(f) => f.code_size(),
            Self::Closure(c) => c.upvalues.len() * std::mem::size_of::<HeapId>(),
            Self::Fiber(f) => f.stack.capacity() * std::mem::size_of::<Value>(),
            Self::Instance(i) => i.attrs.len() * std::mem::size_of::<(String, Value)>(),
            Self::Class(c) => c.methods.len() * std::mem::size_of::<(String, HeapId)>(),
            Self::Range(_) | Self::MethodBind(_) | Self::Upvalue(_) => 0,
        }
    }

    /// Appends every heap object this one references to `out`.
    ///
    /// This is the tracing half of the collector: the VM marks roots, then
    /// drains the gray worklist by asking each object for its children.
    pub fn children(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) | Self::Range(_) => {}
            Self::List(l) => {
                for item in &l.items {
                    push_value(*item, out);
                }
            }
            Self::Map(m) => {
                for (key, value) in m.iter() {
                    push_value(*key, out);
                    push_value(*value, out);
                }
            }
            Self::Module(m) => {
                for v in &m.constants {
                    push_value(*v, out);
                }
                for v in &m.globals {
                    push_value(*v, out);
                }
                if let Some(body) = m.body {
                    out.push(body);
                }
            }
            Self::Function(f) => {
                if let Some(owner) = f.owner {
                    out.push(owner);
                }
                if let Some(class) = f.owner_class {
                    out.push(class);
                }
            }
            Self::Closure(c) => {
                out.push(c.function);
                out.extend_from_slice(&c.upvalues);
            }
            Self::MethodBind(mb) => {
                out.push(mb.closure);
                push_value(mb.receiver, out);
            }
            Self::Upvalue(u) => {
                if let Some(closed) = u.closed_value() {
                    push_value(closed, out);
                }
            }
            Self::Fiber(f) => f.collect_children(out),
            Self::Class(c) => {
                if let Some(super_class) = c.super_class {
                    out.push(super_class);
                }
                if let Some(owner) = c.owner {
                    out.push(owner);
                }
                if let Some(ctor) = c.constructor {
                    out.push(ctor);
                }
                for closure in c.methods.values() {
                    out.push(*closure);
                }
                for v in c.statics.values() {
                    push_value(*v, out);
                }
            }
            Self::Instance(i) => {
                out.push(i.class);
                for v in i.attrs.values() {
                    push_value(*v, out);
                }
            }
        }
    }
}

#[inline]
fn push_value(v: Value, out: &mut Vec<HeapId>) {
    if let Value::Ref(id) = v {
        out.push(id);
    }
}

#[derive(Debug)]
struct Slot {
    data: HeapData,
    marked: bool,
}

/// Snapshot of heap state at a point in time, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects in the arena.
    pub live_objects: usize,
    /// Number of recycled slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by kind name.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
    /// Bytes currently accounted against the collection threshold.
    pub bytes_allocated: usize,
    /// Byte threshold at which the next collection triggers.
    pub next_gc: usize,
    /// Collections run so far.
    pub gc_cycles: usize,
}

/// Tuning knobs for the collection threshold.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GcTuning {
    /// The threshold never drops below this many bytes.
    pub min_heap_size: usize,
    /// After a collection the threshold is `live * (1 + fill_percent/100)`.
    pub heap_fill_percent: usize,
}

impl Default for GcTuning {
    fn default() -> Self {
        Self {
            min_heap_size: 1024 * 1024,
            heap_fill_percent: 75,
        }
    }
}

/// The arena all heap objects live in.
#[derive(Debug)]
pub(crate) struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    bytes_allocated: usize,
    next_gc: usize,
    /// Set for the duration of a collection; byte accounting is suspended
    /// while it is, since sweep recomputes the totals from survivors.
    collecting: bool,
    tuning: GcTuning,
    gc_cycles: usize,
}

impl Heap {
    pub fn new(tuning: GcTuning) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: tuning.min_heap_size,
            collecting: false,
            tuning,
            gc_cycles: 0,
        }
    }

    #[cfg(test)]
    pub fn new_for_tests() -> Self {
        Self::new(GcTuning::default())
    }

    /// Inserts an object into the arena and accounts its bytes.
    ///
    /// Does not itself trigger a collection; callers that can see the roots
    /// (the VM) check [`Heap::should_collect`] before allocating.
    pub fn insert(&mut self, data: HeapData) -> HeapId {
        debug_assert!(!self.collecting, "allocation during collection");
        self.bytes_allocated += data.estimate_size();
        let slot = Slot { data, marked: false };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            HeapId(index)
        } else {
            let index = u32::try_from(self.slots.len()).expect("heap slot count exceeds u32");
            self.slots.push(Some(slot));
            HeapId(index)
        }
    }

    #[inline]
    pub fn should_collect(&self) -> bool {
        !self.collecting && self.bytes_allocated >= self.next_gc
    }

    #[inline]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()].as_ref().expect("use of freed heap slot").data
    }

    #[inline]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()].as_mut().expect("use of freed heap slot").data
    }

    /// Swaps the payload of a slot, returning the previous one.
    ///
    /// Used by the VM to take the running fiber out of the arena for the
    /// duration of its activation.
    pub fn replace(&mut self, id: HeapId, data: HeapData) -> HeapData {
        let slot = self.slots[id.index()].as_mut().expect("use of freed heap slot");
        std::mem::replace(&mut slot.data, data)
    }

    // Typed accessors. Reaching for the wrong kind is a VM bug, not a user
    // error, hence the panics.

    pub fn get_str(&self, id: HeapId) -> &Str {
        match self.get(id) {
            HeapData::Str(s) => s,
            other => panic!("expected String, found {}", other.kind_name()),
        }
    }

    pub fn get_list(&self, id: HeapId) -> &List {
        match self.get(id) {
            HeapData::List(l) => l,
            other => panic!("expected List, found {}", other.kind_name()),
        }
    }

    pub fn get_list_mut(&mut self, id: HeapId) -> &mut List {
        match self.get_mut(id) {
            HeapData::List(l) => l,
            other => panic!("expected List, found {}", other.kind_name()),
        }
    }

    pub fn get_map(&self, id: HeapId) -> &Map {
        match self.get(id) {
            HeapData::Map(m) => m,
            other => panic!("expected Map, found {}", other.kind_name()),
        }
    }

    pub fn get_map_mut(&mut self, id: HeapId) -> &mut Map {
        match self.get_mut(id) {
            HeapData::Map(m) => m,
            other => panic!("expected Map, found {}", other.kind_name()),
        }
    }

    pub fn get_module(&self, id: HeapId) -> &Module {
        match self.get(id) {
            HeapData::Module(m) => m,
            other => panic!("expected Module, found {}", other.kind_name()),
        }
    }

    pub fn get_module_mut(&mut self, id: HeapId) -> &mut Module {
        match self.get_mut(id) {
            HeapData::Module(m) => m,
            other => panic!("expected Module, found {}", other.kind_name()),
        }
    }

    pub fn get_function(&self, id: HeapId) -> &Function {
        match self.get(id) {
            HeapData::Function(f) => f,
            other => panic!("expected Function, found {}", other.kind_name()),
        }
    }

    pub fn get_function_mut(&mut self, id: HeapId) -> &mut Function {
        match self.get_mut(id) {
            HeapData::Function(f) => f,
            other => panic!("expected Function, found {}", other.kind_name()),
        }
    }

    pub fn get_closure(&self, id: HeapId) -> &Closure {
        match self.get(id) {
            HeapData::Closure(c) => c,
            other => panic!("expected Closure, found {}", other.kind_name()),
        }
    }

    pub fn get_upvalue(&self, id: HeapId) -> &Upvalue {
        match self.get(id) {
            HeapData::Upvalue(u) => u,
            other => panic!("expected Upvalue, found {}", other.kind_name()),
        }
    }

    pub fn get_upvalue_mut(&mut self, id: HeapId) -> &mut Upvalue {
        match self.get_mut(id) {
            HeapData::Upvalue(u) => u,
            other => panic!("expected Upvalue, found {}", other.kind_name()),
        }
    }

    pub fn get_fiber(&self, id: HeapId) -> &Fiber {
        match self.get(id) {
            HeapData::Fiber(f) => f,
            other => panic!("expected Fiber, found {}", other.kind_name()),
        }
    }

    pub fn get_fiber_mut(&mut self, id: HeapId) -> &mut Fiber {
        match self.get_mut(id) {
            HeapData::Fiber(f) => f,
            other => panic!("expected Fiber, found {}", other.kind_name()),
        }
    }

    pub fn get_class(&self, id: HeapId) -> &Class {
        match self.get(id) {
            HeapData::Class(c) => c,
            other => panic!("expected Class, found {}", other.kind_name()),
        }
    }

    pub fn get_class_mut(&mut self, id: HeapId) -> &mut Class {
        match self.get_mut(id) {
            HeapData::Class(c) => c,
            other => panic!("expected Class, found {}", other.kind_name()),
        }
    }

    pub fn get_instance(&self, id: HeapId) -> &Instance {
        match self.get(id) {
            HeapData::Instance(i) => i,
            other => panic!("expected Instance, found {}", other.kind_name()),
        }
    }

    pub fn get_instance_mut(&mut self, id: HeapId) -> &mut Instance {
        match self.get_mut(id) {
            HeapData::Instance(i) => i,
            other => panic!("expected Instance, found {}", other.kind_name()),
        }
    }

    // Collection primitives, driven by the VM's root scan.

    pub fn begin_collection(&mut self) {
        debug_assert!(!self.collecting, "nested collection");
        self.collecting = true;
    }

    /// Marks one object, pushing it on the gray worklist if newly marked.
    pub fn mark_object(&mut self, id: HeapId, gray: &mut Vec<HeapId>) {
        let slot = self.slots[id.index()].as_mut().expect("marking freed heap slot");
        if !slot.marked {
            slot.marked = true;
            gray.push(id);
        }
    }

    /// Marks a value's referent, if it has one.
    pub fn mark_value(&mut self, value: Value, gray: &mut Vec<HeapId>) {
        if let Value::Ref(id) = value {
            self.mark_object(id, gray);
        }
    }

    /// Appends the children of `id` to `out` (blackening step).
    pub fn children_of(&self, id: HeapId, out: &mut Vec<HeapId>) {
        self.get(id).children(out);
    }

    /// Frees every unmarked object, clears survivor marks, recomputes the
    /// byte accounting from survivors, and retunes the trigger threshold.
    ///
    /// Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        debug_assert!(self.collecting, "sweep outside a collection");
        let mut freed = 0usize;
        let mut live_bytes = 0usize;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.marked => {
                    s.marked = false;
                    live_bytes += s.data.estimate_size();
                }
                Some(_) => {
                    *slot = None;
                    self.free.push(index as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        self.bytes_allocated = live_bytes;
        self.next_gc = (live_bytes + live_bytes * self.tuning.heap_fill_percent / 100)
            .max(self.tuning.min_heap_size);
        self.collecting = false;
        self.gc_cycles += 1;
        freed
    }

    #[inline]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Adjusts the accounting when a container grew in place.
    ///
    /// Suspended during collection: sweep recomputes totals itself.
    pub fn note_growth(&mut self, bytes: usize) {
        if !self.collecting {
            self.bytes_allocated += bytes;
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live = 0usize;
        for slot in self.slots.iter().flatten() {
            live += 1;
            *objects_by_kind.entry(slot.data.stats_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: live,
            free_slots: self.free.len(),
            total_slots: self.slots.len(),
            objects_by_kind,
            bytes_allocated: self.bytes_allocated,
            next_gc: self.next_gc,
            gc_cycles: self.gc_cycles,
        }
    }

    #[cfg(test)]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.slots.get(id.index()).is_some_and(Option::is_some)
    }

    #[cfg(test)]
    pub fn all_marks_clear(&self) -> bool {
        self.slots.iter().flatten().all(|s| !s.marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Str;

    fn alloc_str(heap: &mut Heap, s: &str) -> HeapId {
        heap.insert(HeapData::Str(Str::new(s.to_owned())))
    }

    #[test]
    fn slots_are_recycled() {
        let mut heap = Heap::new_for_tests();
        let a = alloc_str(&mut heap, "a");
        let b = alloc_str(&mut heap, "b");

        heap.begin_collection();
        let mut gray = Vec::new();
        heap.mark_object(b, &mut gray);
        let freed = heap.sweep();
        assert_eq!(freed, 1);
        assert!(!heap.is_live(a));
        assert!(heap.is_live(b));

        // The freed slot is reused for the next allocation.
        let c = alloc_str(&mut heap, "c");
        assert_eq!(c.index(), a.index());
    }

    #[test]
    fn sweep_clears_survivor_marks_and_retunes() {
        let mut heap = Heap::new_for_tests();
        let a = alloc_str(&mut heap, "hello");
        heap.begin_collection();
        let mut gray = Vec::new();
        heap.mark_object(a, &mut gray);
        heap.sweep();
        assert!(heap.all_marks_clear());
        assert!(heap.stats().next_gc >= heap.tuning.min_heap_size);
    }

    #[test]
    fn children_follow_list_elements() {
        let mut heap = Heap::new_for_tests();
        let elem = alloc_str(&mut heap, "elem");
        let list = heap.insert(HeapData::List(crate::types::List::from_vec(vec![
            Value::Ref(elem),
            Value::Int(1),
        ])));
        let mut out = Vec::new();
        heap.children_of(list, &mut out);
        assert_eq!(out, vec![elem]);
    }
}
