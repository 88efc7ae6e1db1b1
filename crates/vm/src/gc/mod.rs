//! Mark and sweep garbage collection.
//!
//! Heap objects live in a slot map owned by [`Heap`] and are addressed by
//! [`ObjRef`], a generational index. A collection marks everything reachable
//! from the roots supplied by the caller, drops intern table entries whose
//! string is unmarked, and then frees every unmarked slot.

pub mod alloc;
#[cfg(test)]
mod test;

use slotmap::HopSlotMap;

use crate::value::Value;

pub use alloc::{CollectStats, Heap};

slotmap::new_key_type! {
    /// A reference to a heap object. Copying it does not keep the object alive;
    /// only reachability from the roots does.
    pub struct ObjRef;
}

/// Something that records references found while tracing.
pub trait GcTracer {
    fn mark_object(&mut self, obj: ObjRef);

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(obj) = value {
            self.mark_object(obj)
        }
    }
}

/// Types holding references to heap objects.
pub trait Trace {
    /// Reports every object directly referenced by `self` to `tracer`.
    fn trace(&self, tracer: &mut dyn GcTracer);
}

impl Trace for Value {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        tracer.mark_value(*self)
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        for item in self {
            item.trace(tracer)
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        self.as_slice().trace(tracer)
    }
}

impl Trace for ObjRef {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        tracer.mark_object(*self)
    }
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        if let Some(v) = self {
            v.trace(tracer)
        }
    }
}

/// Collects children of one object so they can be marked after the borrow
/// of that object ends.
impl GcTracer for Vec<ObjRef> {
    fn mark_object(&mut self, obj: ObjRef) {
        self.push(obj)
    }
}

/// The marking half of a collection. Marked objects wait in the gray stack
/// until their own references have been traced.
pub struct Tracer<'h> {
    objects: &'h mut HopSlotMap<ObjRef, alloc::HeapEntry>,
    gray: Vec<ObjRef>,
}

impl<'h> Tracer<'h> {
    fn new(objects: &'h mut HopSlotMap<ObjRef, alloc::HeapEntry>) -> Self {
        Tracer {
            objects,
            gray: Vec::new(),
        }
    }

    /// Drains the gray stack, blackening every object on it.
    fn trace_references(&mut self) {
        let mut children = Vec::new();
        while let Some(obj) = self.gray.pop() {
            if let Some(entry) = self.objects.get(obj) {
                entry.obj.trace(&mut children);
            }
            for child in children.drain(..) {
                self.mark_object(child);
            }
        }
    }
}

impl GcTracer for Tracer<'_> {
    fn mark_object(&mut self, obj: ObjRef) {
        if let Some(entry) = self.objects.get_mut(obj) {
            if !entry.marked {
                entry.marked = true;
                self.gray.push(obj);
            }
        }
    }
}
