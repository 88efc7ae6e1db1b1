//! Heap object variants.

use mal_bytecode::Chunk;

use crate::gc::{GcTracer, ObjRef, Trace};
use crate::native::NativeFn;
use crate::table::{StrKey, Table};
use crate::value::Value;

pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Enum(ObjEnum),
    List(ObjList),
    Table(ObjTable),
}

/// An interned, immutable string with its hash cached.
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

pub struct ObjFunction {
    /// `None` for the top-level script
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub optionals: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk<Value>,
}

pub struct ObjNative {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable.
///
/// While the declaring frame is live the upvalue refers to the variable's
/// stack slot; when the frame returns the value is moved into the upvalue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
    /// Modules cannot be instantiated and their functions are called
    /// without a receiver.
    pub is_module: bool,
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

pub struct ObjEnum {
    pub name: ObjRef,
    /// Ordinal handed to the next member without an explicit value
    pub counter: f64,
    pub fields: Table,
    /// Member names in declaration order
    pub members: Vec<ObjRef>,
}

#[derive(Default)]
pub struct ObjList {
    pub items: Vec<Value>,
}

/// A string keyed map that remembers insertion order.
#[derive(Default)]
pub struct ObjTable {
    pub entries: Table,
    pub keys: Vec<Value>,
}

impl ObjString {
    /// Length in characters, which is what indexing counts in
    pub fn char_len(&self) -> usize {
        self.chars.chars().count()
    }
}

impl ObjTable {
    pub fn get(&self, key: StrKey) -> Option<Value> {
        self.entries.get(key)
    }

    /// Inserts or overwrites `key`, remembering the order keys first appear
    /// in.
    pub fn set(&mut self, key: StrKey, value: Value) {
        if self.entries.set(key, value) {
            self.keys.push(Value::Obj(key.obj));
        }
    }
}

impl Obj {
    /// Name of the object's type as seen by scripts
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) | Obj::Closure(_) | Obj::BoundMethod(_) => "function",
            Obj::Native(_) => "native",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(c) if c.is_module => "module",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::Enum(_) => "enum",
            Obj::List(_) => "list",
            Obj::Table(_) => "table",
        }
    }

    /// Approximate number of bytes owned by the object outside of its heap
    /// slot.
    pub fn extra_size(&self) -> usize {
        use std::mem::size_of;
        match self {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => f.chunk.heap_size(),
            Obj::Closure(c) => c.upvalues.capacity() * size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.heap_size(),
            Obj::Instance(i) => i.fields.heap_size(),
            Obj::Enum(e) => e.fields.heap_size() + e.members.capacity() * size_of::<ObjRef>(),
            Obj::List(l) => l.items.capacity() * size_of::<Value>(),
            Obj::Table(t) => t.entries.heap_size() + t.keys.capacity() * size_of::<Value>(),
            Obj::Native(_) | Obj::Upvalue(_) | Obj::BoundMethod(_) => 0,
        }
    }
}

impl Trace for Obj {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                f.name.trace(tracer);
                f.chunk.constants().trace(tracer);
            }
            Obj::Closure(c) => {
                tracer.mark_object(c.function);
                c.upvalues.trace(tracer);
            }
            Obj::Upvalue(ObjUpvalue::Closed(v)) => tracer.mark_value(*v),
            Obj::Upvalue(ObjUpvalue::Open(_)) => {}
            Obj::Class(c) => {
                tracer.mark_object(c.name);
                c.methods.trace(tracer);
            }
            Obj::Instance(i) => {
                tracer.mark_object(i.class);
                i.fields.trace(tracer);
            }
            Obj::BoundMethod(b) => {
                tracer.mark_value(b.receiver);
                tracer.mark_object(b.method);
            }
            Obj::Enum(e) => {
                tracer.mark_object(e.name);
                e.fields.trace(tracer);
                e.members.trace(tracer);
            }
            Obj::List(l) => l.items.trace(tracer),
            Obj::Table(t) => {
                t.entries.trace(tracer);
                t.keys.trace(tracer);
            }
        }
    }
}
