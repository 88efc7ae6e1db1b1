use slotmap::HopSlotMap;

use super::{GcTracer, ObjRef, Tracer};
use crate::config::VmOptions;
use crate::object::{Obj, ObjString};
use crate::table::{hash_str, StrKey, Table};
use crate::value::{Value, ValueDisplay};

/// Keeps an almost empty heap from collecting on every allocation.
const MIN_GC_THRESHOLD: usize = 1024;

pub(crate) struct HeapEntry {
    pub(crate) marked: bool,
    /// Bytes accounted for this object when it was allocated
    size: usize,
    pub(crate) obj: Obj,
}

/// Result of one garbage collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub objects_freed: usize,
    pub next_threshold: usize,
}

/// Owner of every heap object, and of the string intern table.
///
/// The heap never decides on its own to collect: it cannot see the roots.
/// Its owner asks [`Heap::should_collect`] before allocating and then runs
/// [`Heap::collect`] with a callback that marks the roots.
pub struct Heap {
    objects: HopSlotMap<ObjRef, HeapEntry>,

    /// Every live string, keyed by itself. This table is weak: it is not a
    /// root, and unmarked entries are dropped before each sweep.
    strings: Table,

    /// Total memory allocated for live objects, as accounted at allocation
    /// time.
    total_mem_allocated: usize,

    /// The threshold for triggering a GC. Recalculated as
    /// `grow_factor * total_mem_allocated` after each GC.
    gc_threshold: usize,
    grow_factor: usize,
    stress: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(&VmOptions::default())
    }
}

impl Heap {
    pub fn new(options: &VmOptions) -> Heap {
        Heap {
            objects: HopSlotMap::with_key(),
            strings: Table::new(),
            total_mem_allocated: 0,
            gc_threshold: options.initial_gc_threshold,
            grow_factor: options.gc_grow_factor.max(1),
            stress: options.stress_gc,
        }
    }

    /// Moves `obj` into the heap. This never collects.
    pub fn insert(&mut self, obj: Obj) -> ObjRef {
        let size = std::mem::size_of::<HeapEntry>() + obj.extra_size();
        self.total_mem_allocated += size;
        self.objects.insert(HeapEntry {
            marked: false,
            size,
            obj,
        })
    }

    /// Recharges `obj` after it grew or shrank in place, so that the
    /// collection budget and the sweep see its current size.
    pub fn resize(&mut self, obj: ObjRef) {
        let entry = &mut self.objects[obj];
        let size = std::mem::size_of::<HeapEntry>() + entry.obj.extra_size();
        self.total_mem_allocated = self.total_mem_allocated - entry.size + size;
        entry.size = size;
    }

    /// Returns the interned string with the given content, creating it if
    /// needed. This never collects.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        if let Some(r) = self.find_interned(s) {
            return r;
        }

        let hash = hash_str(s);
        let r = self.insert(Obj::String(ObjString {
            chars: s.into(),
            hash,
        }));
        self.strings.set(StrKey { obj: r, hash }, Value::Nil);
        r
    }

    /// Finds an already interned string without creating it.
    pub fn find_interned(&self, s: &str) -> Option<ObjRef> {
        let objects = &self.objects;
        self.strings.find_string(hash_str(s), |r| match objects.get(r) {
            Some(HeapEntry {
                obj: Obj::String(candidate),
                ..
            }) => &*candidate.chars == s,
            _ => false,
        })
    }

    pub fn get(&self, obj: ObjRef) -> &Obj {
        &self.objects[obj].obj
    }

    pub fn get_mut(&mut self, obj: ObjRef) -> &mut Obj {
        &mut self.objects[obj].obj
    }

    /// `None` if the object has been freed
    pub fn try_get(&self, obj: ObjRef) -> Option<&Obj> {
        self.objects.get(obj).map(|e| &e.obj)
    }

    pub fn as_str(&self, obj: ObjRef) -> Option<&str> {
        match self.get(obj) {
            Obj::String(s) => Some(&s.chars),
            _ => None,
        }
    }

    /// Content of a string object. Other objects read as the empty string.
    pub fn str(&self, obj: ObjRef) -> &str {
        self.as_str(obj).unwrap_or_default()
    }

    /// The table key for a string object
    pub fn key(&self, obj: ObjRef) -> StrKey {
        match self.get(obj) {
            Obj::String(s) => StrKey { obj, hash: s.hash },
            _ => unreachable!("table keys are always strings"),
        }
    }

    pub fn display(&self, value: Value) -> ValueDisplay<'_> {
        ValueDisplay {
            heap: self,
            value,
            depth: 0,
        }
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Amount of memory currently allocated by this heap
    pub fn total_mem_allocated(&self) -> usize {
        self.total_mem_allocated
    }

    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.total_mem_allocated >= self.gc_threshold
    }

    /// Runs a full collection. `mark_roots` must report every root.
    pub fn collect(&mut self, mark_roots: impl FnOnce(&mut dyn GcTracer)) -> CollectStats {
        let bytes_before = self.total_mem_allocated;
        let objects_before = self.objects.len();
        tracing::debug!(bytes = bytes_before, objects = objects_before, "gc begin");

        // Marking stage
        let mut tracer = Tracer::new(&mut self.objects);
        mark_roots(&mut tracer);
        tracer.trace_references();

        // Weak references
        let objects = &self.objects;
        self.strings
            .remove_white(|r| objects.get(r).map_or(false, |e| e.marked));

        // Sweeping stage
        let mut freed_bytes = 0;
        self.objects.retain(|_, entry| {
            if entry.marked {
                entry.marked = false;
                true
            } else {
                freed_bytes += entry.size;
                false
            }
        });
        self.total_mem_allocated -= freed_bytes;
        self.gc_threshold = (self.total_mem_allocated * self.grow_factor).max(MIN_GC_THRESHOLD);

        let stats = CollectStats {
            bytes_before,
            bytes_after: self.total_mem_allocated,
            objects_freed: objects_before - self.objects.len(),
            next_threshold: self.gc_threshold,
        };
        tracing::debug!(
            collected = bytes_before - stats.bytes_after,
            bytes = stats.bytes_after,
            freed = stats.objects_freed,
            next = stats.next_threshold,
            "gc end"
        );
        stats
    }
}
