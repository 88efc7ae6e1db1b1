//! Host functions callable from scripts.
//!
//! A native receives the call arguments and a slot for its return value. It
//! returns `true` on success. On failure it returns `false` and leaves an
//! error message string in the return slot, which the VM raises as a runtime
//! error.
//!
//! Natives get the [`Heap`] but no roots, so they may allocate but never
//! collect.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::gc::Heap;
use crate::object::{Obj, ObjList};
use crate::value::Value;

pub type NativeFn = fn(heap: &mut Heap, args: &[Value], ret: &mut Value) -> bool;

/// Natives every VM defines as globals: name, arity, function
pub(crate) const CORE_NATIVES: &[(&str, u8, NativeFn)] = &[
    ("clock", 0, clock),
    ("now", 0, now),
    ("len", 1, len),
    ("add", 2, add),
    ("keys", 1, keys),
    ("str", 1, stringify),
    ("typeof", 1, type_of),
];

/// Script source run at start-up, defining the functions behind `where` and
/// `select`.
pub(crate) const PRELUDE: &str = include_str!("prelude.mal");

/// Writes `message` as the error result.
pub fn fail(heap: &mut Heap, ret: &mut Value, message: &str) -> bool {
    *ret = Value::Obj(heap.intern(message));
    false
}

fn clock(_heap: &mut Heap, _args: &[Value], ret: &mut Value) -> bool {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    *ret = Value::Number(secs);
    true
}

fn now(_heap: &mut Heap, _args: &[Value], ret: &mut Value) -> bool {
    *ret = Value::DateTime(chrono::Local::now().timestamp());
    true
}

fn len(heap: &mut Heap, args: &[Value], ret: &mut Value) -> bool {
    let n = match args[0] {
        Value::Obj(r) => match heap.get(r) {
            Obj::String(s) => s.char_len(),
            Obj::List(l) => l.items.len(),
            Obj::Table(t) => t.keys.len(),
            _ => return fail(heap, ret, "len() expects a list, string or table."),
        },
        _ => return fail(heap, ret, "len() expects a list, string or table."),
    };
    *ret = Value::Number(n as f64);
    true
}

fn add(heap: &mut Heap, args: &[Value], ret: &mut Value) -> bool {
    if let Value::Obj(r) = args[0] {
        if let Obj::List(l) = heap.get_mut(r) {
            l.items.push(args[1]);
            heap.resize(r);
            *ret = args[0];
            return true;
        }
    }
    fail(heap, ret, "add() expects a list as its first argument.")
}

fn keys(heap: &mut Heap, args: &[Value], ret: &mut Value) -> bool {
    let items = match args[0] {
        Value::Obj(r) => match heap.get(r) {
            Obj::Table(t) => t.keys.clone(),
            _ => return fail(heap, ret, "keys() expects a table."),
        },
        _ => return fail(heap, ret, "keys() expects a table."),
    };
    *ret = Value::Obj(heap.insert(Obj::List(ObjList { items })));
    true
}

fn stringify(heap: &mut Heap, args: &[Value], ret: &mut Value) -> bool {
    let s = heap.display(args[0]).to_string();
    *ret = Value::Obj(heap.intern(&s));
    true
}

fn type_of(heap: &mut Heap, args: &[Value], ret: &mut Value) -> bool {
    let name = args[0].type_name(heap);
    *ret = Value::Obj(heap.intern(name));
    true
}
