use std::fmt::{self, Display, Formatter};

use chrono::TimeZone;
use itertools::Itertools;
use static_assertions::const_assert;

use crate::gc::{Heap, ObjRef};
use crate::object::{Obj, ObjUpvalue};

/// A script value. Everything but `Obj` is stored inline; `Obj` refers to an
/// object in the [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    /// Seconds since the Unix epoch
    DateTime(i64),
    Obj(ObjRef),
}

const_assert!(std::mem::size_of::<Value>() <= 16);

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl Value {
    /// Returns `true` if the value is [`Nil`].
    ///
    /// [`Nil`]: Value::Nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        if let Self::Number(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_obj(&self) -> Option<ObjRef> {
        if let Self::Obj(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Convert this value to boolean.
    ///
    /// The only falsy values are:
    ///
    /// - `nil`
    /// - `false`
    /// - the number `0`
    pub fn is_falsey(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Bool(b) => !b,
            Value::Number(n) => *n == 0.0,
            _ => false,
        }
    }

    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::DateTime(_) => "datetime",
            Value::Obj(r) => heap.get(*r).type_name(),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<ObjRef> for Value {
    fn from(v: ObjRef) -> Self {
        Value::Obj(v)
    }
}

/// Containers nested deeper than this print as `...`, which also keeps self
/// referencing lists printable.
const MAX_DISPLAY_DEPTH: usize = 16;

/// Displays a value the way `print` shows it.
pub struct ValueDisplay<'h> {
    pub(crate) heap: &'h Heap,
    pub(crate) value: Value,
    /// Set inside containers, where strings are quoted
    pub(crate) depth: usize,
}

impl<'h> ValueDisplay<'h> {
    fn nested(&self, value: Value) -> ValueDisplay<'h> {
        ValueDisplay {
            heap: self.heap,
            value,
            depth: self.depth + 1,
        }
    }

    fn write_name(&self, f: &mut Formatter<'_>, name: ObjRef) -> fmt::Result {
        f.write_str(self.heap.str(name))
    }
}

impl Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let obj = match self.value {
            Value::Nil => return f.write_str("nil"),
            Value::Bool(b) => return write!(f, "{}", b),
            Value::Number(n) => return write!(f, "{}", n),
            Value::DateTime(secs) => {
                return match chrono::Local.timestamp_opt(secs, 0).single() {
                    Some(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
                    None => write!(f, "<datetime {}>", secs),
                }
            }
            Value::Obj(r) => r,
        };

        match self.heap.get(obj) {
            Obj::String(s) if self.depth > 0 => write!(f, "\"{}\"", s.chars),
            Obj::String(s) => f.write_str(&s.chars),
            Obj::Function(func) => match func.name {
                Some(name) => {
                    f.write_str("<fn ")?;
                    self.write_name(f, name)?;
                    f.write_str(">")
                }
                None => f.write_str("<script>"),
            },
            Obj::Native(n) => write!(f, "<native fn {}>", n.name),
            Obj::Closure(c) => self.nested(Value::Obj(c.function)).fmt(f),
            Obj::BoundMethod(b) => self.nested(Value::Obj(b.method)).fmt(f),
            Obj::Upvalue(ObjUpvalue::Closed(v)) => self.nested(*v).fmt(f),
            Obj::Upvalue(ObjUpvalue::Open(_)) => f.write_str("upvalue"),
            Obj::Class(c) => self.write_name(f, c.name),
            Obj::Instance(i) => match self.heap.get(i.class) {
                Obj::Class(c) => {
                    self.write_name(f, c.name)?;
                    f.write_str(" instance")
                }
                _ => f.write_str("instance"),
            },
            Obj::Enum(e) => {
                f.write_str("<enum ")?;
                self.write_name(f, e.name)?;
                f.write_str(">")
            }
            Obj::List(_) | Obj::Table(_) if self.depth >= MAX_DISPLAY_DEPTH => f.write_str("..."),
            Obj::List(l) => write!(
                f,
                "[{}]",
                l.items
                    .iter()
                    .format_with(", ", |v, g| g(&self.nested(*v)))
            ),
            Obj::Table(t) => write!(
                f,
                "{{{}}}",
                t.keys.iter().format_with(", ", |k, g| {
                    let value = k
                        .as_obj()
                        .and_then(|k| t.entries.get(self.heap.key(k)))
                        .unwrap_or(Value::Nil);
                    g(&format_args!("{}: {}", self.nested(*k), self.nested(value)))
                })
            ),
        }
    }
}
