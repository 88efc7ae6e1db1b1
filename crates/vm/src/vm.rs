//! The bytecode interpreter.

mod frame;

use std::io::Write;

use mal_bytecode::{Chunk, Constant, Function, Op};

use self::frame::CallFrame;
use crate::config::{VmOptions, SLOTS_PER_FRAME};
use crate::error::{InterpretError, RuntimeError, TraceFrame};
use crate::gc::{CollectStats, Heap, ObjRef, Trace};
use crate::native::{NativeFn, CORE_NATIVES, PRELUDE};
use crate::object::*;
use crate::table::{StrKey, Table};
use crate::value::Value;

type VmResult<T = ()> = Result<T, RuntimeError>;

/// A virtual machine instance. Each instance owns its heap, stack and
/// globals; nothing is shared between instances.
pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Upvalues still pointing into the stack, ordered by stack slot
    open_upvalues: Vec<ObjRef>,
    /// Values created while loading a compiled function, kept alive until
    /// the function object owning them exists
    compiler_roots: Vec<Value>,
    init_string: ObjRef,
    options: VmOptions,
    out: Box<dyn Write>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_options(VmOptions::default())
    }

    pub fn with_options(mut options: VmOptions) -> Self {
        // The script itself needs a frame
        options.max_frames = options.max_frames.max(1);

        let mut heap = Heap::new(&options);
        let init_string = heap.intern("init");
        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(options.max_frames * SLOTS_PER_FRAME),
            frames: Vec::with_capacity(options.max_frames),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            compiler_roots: Vec::new(),
            init_string,
            options,
            out: Box::new(std::io::stdout()),
        };

        for &(name, arity, function) in CORE_NATIVES {
            vm.define_native(name, arity, function);
        }
        if vm.options.load_prelude {
            if let Err(e) = vm.interpret(PRELUDE, "prelude") {
                unreachable!("the core prelude failed to run: {}", e);
            }
        }
        vm
    }

    /// Redirects the output of `print`.
    pub fn set_output(&mut self, out: impl Write + 'static) {
        self.out = Box::new(out);
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Reads a global variable without running any code.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let name = self.heap.find_interned(name)?;
        self.globals.get(self.heap.key(name))
    }

    /// Renders a value the way `print` does.
    pub fn display(&self, value: Value) -> String {
        self.heap.display(value).to_string()
    }

    /// Registers a host function as a global.
    pub fn define_native(&mut self, name: &'static str, arity: u8, function: NativeFn) {
        let name_obj = self.intern(name);
        self.push(Value::Obj(name_obj));
        let native = self.alloc(Obj::Native(ObjNative {
            name,
            arity,
            function,
        }));
        self.push(Value::Obj(native));
        self.globals
            .set(self.heap.key(name_obj), Value::Obj(native));
        self.pop();
        self.pop();
    }

    /// Compiles and runs `source`. `name` identifies the source in logs.
    ///
    /// After a runtime error the stack is reset, so the VM can go on with
    /// the next call; globals defined so far stay defined.
    pub fn interpret(&mut self, source: &str, name: &str) -> Result<(), InterpretError> {
        tracing::debug!(name, "interpret");
        let function = mal_codegen::compile(source, name)?;
        self.run_script(function).map_err(|e| {
            tracing::debug!(message = %e.message, "runtime error");
            self.reset_stack();
            InterpretError::from(e)
        })
    }

    /// Runs a full collection now and reports what it did.
    pub fn collect_garbage(&mut self) -> CollectStats {
        self.collect(None)
    }

    fn run_script(&mut self, function: Function) -> VmResult {
        let function = self.load_function(function);
        self.push(Value::Obj(function));
        let closure = self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::Obj(closure));
        self.call(closure, 0)?;
        self.run()
    }

    /// Drops everything left by an aborted run. Closures that escaped keep
    /// the values they captured.
    fn reset_stack(&mut self) {
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
        self.compiler_roots.clear();
    }

    // ---- allocation ----

    fn collect(&mut self, pending: Option<&Obj>) -> CollectStats {
        let Vm {
            heap,
            stack,
            frames,
            globals,
            open_upvalues,
            compiler_roots,
            init_string,
            ..
        } = self;
        heap.collect(|tracer| {
            stack.trace(tracer);
            for frame in frames.iter() {
                frame.trace(tracer);
            }
            open_upvalues.trace(tracer);
            globals.trace(tracer);
            compiler_roots.trace(tracer);
            tracer.mark_object(*init_string);
            if let Some(obj) = pending {
                obj.trace(tracer);
            }
        })
    }

    /// Moves `obj` into the heap, collecting first if the budget is spent.
    /// Objects referenced by `obj` are kept alive by that collection.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.collect(Some(&obj));
        }
        self.heap.insert(obj)
    }

    fn intern(&mut self, s: &str) -> ObjRef {
        if self.heap.should_collect() {
            self.collect(None);
        }
        self.heap.intern(s)
    }

    /// Turns a compiled prototype into a function object, loading nested
    /// functions first.
    fn load_function(&mut self, function: Function) -> ObjRef {
        let base = self.compiler_roots.len();
        let name = function.name.as_deref().map(|name| {
            let name = self.intern(name);
            self.compiler_roots.push(Value::Obj(name));
            name
        });
        let Function {
            arity,
            optionals,
            upvalue_count,
            chunk,
            ..
        } = function;
        let chunk = chunk.map_constants(|c| self.load_constant(c));
        let function = self.alloc(Obj::Function(ObjFunction {
            name,
            arity,
            optionals,
            upvalue_count,
            chunk,
        }));
        self.compiler_roots.truncate(base);
        function
    }

    fn load_constant(&mut self, constant: Constant) -> Value {
        let value = match constant {
            Constant::Number(n) => Value::Number(n),
            Constant::String(s) => Value::Obj(self.intern(&s)),
            Constant::Function(f) => Value::Obj(self.load_function(*f)),
        };
        self.compiler_roots.push(value);
        value
    }

    // ---- stack ----

    fn push(&mut self, value: Value) {
        self.stack.push(value)
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn replace_top(&mut self, count: usize, value: Value) {
        let len = self.stack.len();
        self.stack.truncate(len - count);
        self.push(value);
    }

    // ---- frames ----

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("a frame is active while running")
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self
            .frames
            .last_mut()
            .expect("a frame is active while running");
        frame.read_u8(chunk(&self.heap, frame.function))
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self
            .frames
            .last_mut()
            .expect("a frame is active while running");
        frame.read_u16(chunk(&self.heap, frame.function))
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_u16() as usize;
        *chunk(&self.heap, self.frame().function).constant(idx)
    }

    /// Reads a local slot operand as an absolute stack index.
    fn local_slot(&mut self) -> usize {
        let slot = self.read_u8() as usize;
        self.frame().slots + slot
    }

    /// Reads an upvalue operand of the running closure.
    fn read_upvalue(&mut self) -> ObjRef {
        let idx = self.read_u8();
        self.frame_upvalue(idx)
    }

    fn read_string(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            _ => unreachable!("name operands refer to string constants"),
        }
    }

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = function(&self.heap, frame.function);
                TraceFrame {
                    line: frame.line(&function.chunk),
                    function: function.name.map(|n| self.heap.str(n).to_owned()),
                }
            })
            .collect();
        RuntimeError {
            message: message.into(),
            trace,
        }
    }

    // ---- calls ----

    fn call_value(&mut self, callee: Value, argc: usize) -> VmResult {
        let obj = match callee {
            Value::Obj(obj) => obj,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        let slot = self.stack.len() - argc - 1;
        match self.heap.get(obj) {
            Obj::BoundMethod(bound) => {
                let method = bound.method;
                self.stack[slot] = bound.receiver;
                self.call(method, argc)
            }
            Obj::Class(class) => {
                if class.is_module {
                    return Err(self.runtime_error("Cannot instantiate a module."));
                }
                let initializer = class.methods.get(self.heap.key(self.init_string));
                let instance = self.alloc(Obj::Instance(ObjInstance {
                    class: obj,
                    fields: Table::new(),
                }));
                self.stack[slot] = Value::Obj(instance);
                match initializer {
                    Some(init) => self.call_value(init, argc),
                    None if argc != 0 => Err(self.runtime_error(format!(
                        "Expected 0 arguments but got {}.",
                        argc
                    ))),
                    None => Ok(()),
                }
            }
            Obj::Closure(_) => self.call(obj, argc),
            Obj::Native(native) => {
                let (function, arity) = (native.function, native.arity as usize);
                if argc != arity {
                    return Err(self.runtime_error(format!(
                        "Expected {} arguments but got {}.",
                        arity, argc
                    )));
                }
                let (ret, args) = self.stack[slot..]
                    .split_first_mut()
                    .expect("the callee occupies a stack slot");
                let ok = function(&mut self.heap, args, ret);
                let result = self.stack[slot];
                self.stack.truncate(slot + 1);
                if ok {
                    Ok(())
                } else {
                    let message = match result {
                        Value::Obj(r) => self.heap.as_str(r).map(str::to_owned),
                        _ => None,
                    };
                    Err(self.runtime_error(
                        message.unwrap_or_else(|| "Native function failed.".to_owned()),
                    ))
                }
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    /// Pushes a frame for `closure`, whose arguments are on top of the stack.
    /// Omitted optional arguments are passed as `nil`.
    fn call(&mut self, closure: ObjRef, argc: usize) -> VmResult {
        let function_ref = match self.heap.get(closure) {
            Obj::Closure(c) => c.function,
            _ => unreachable!("call targets are closures"),
        };
        let function = function(&self.heap, function_ref);
        let arity = function.arity as usize;
        let required = arity - function.optionals as usize;
        if argc < required || argc > arity {
            return Err(self.runtime_error(format!(
                "Expected {} arguments but got {}.",
                arity, argc
            )));
        }
        if self.frames.len() >= self.options.max_frames {
            return Err(self.runtime_error("Stack overflow."));
        }
        for _ in argc..arity {
            self.push(Value::Nil);
        }
        let slots = self.stack.len() - arity - 1;
        self.frames.push(CallFrame::new(closure, function_ref, slots));
        Ok(())
    }

    // ---- upvalues ----

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate().rev() {
            match self.heap.get(upvalue) {
                Obj::Upvalue(ObjUpvalue::Open(s)) if *s == slot => return upvalue,
                Obj::Upvalue(ObjUpvalue::Open(s)) if *s < slot => break,
                _ => insert_at = i,
            }
        }
        let upvalue = self.alloc(Obj::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, upvalue);
        upvalue
    }

    /// Closes every open upvalue referring to slot `last` or above.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let slot = match self.heap.get(upvalue) {
                Obj::Upvalue(ObjUpvalue::Open(slot)) => *slot,
                _ => unreachable!("open upvalue list holds open upvalues only"),
            };
            if slot < last {
                break;
            }
            *self.heap.get_mut(upvalue) = Obj::Upvalue(ObjUpvalue::Closed(self.stack[slot]));
            self.open_upvalues.pop();
        }
    }

    fn frame_upvalue(&self, idx: u8) -> ObjRef {
        match self.heap.get(self.frame().closure) {
            Obj::Closure(c) => c.upvalues[idx as usize],
            _ => unreachable!("frames execute closures"),
        }
    }

    fn upvalue_get(&self, upvalue: ObjRef) -> Value {
        match self.heap.get(upvalue) {
            Obj::Upvalue(ObjUpvalue::Open(slot)) => self.stack[*slot],
            Obj::Upvalue(ObjUpvalue::Closed(value)) => *value,
            _ => unreachable!("closures capture upvalue objects"),
        }
    }

    fn upvalue_set(&mut self, upvalue: ObjRef, value: Value) {
        match self.heap.get_mut(upvalue) {
            Obj::Upvalue(ObjUpvalue::Open(slot)) => {
                let slot = *slot;
                self.stack[slot] = value;
            }
            Obj::Upvalue(ObjUpvalue::Closed(closed)) => *closed = value,
            _ => unreachable!("closures capture upvalue objects"),
        }
    }

    // ---- properties and subscripts ----

    fn string_key(&self, value: Value) -> Option<StrKey> {
        match value {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::String(_)) => Some(self.heap.key(r)),
            _ => None,
        }
    }

    /// `target.name`. Methods read off an instance come back bound to it.
    fn get_property(&mut self, target: Value, name: ObjRef) -> VmResult<Value> {
        let key = self.heap.key(name);
        let obj = match target {
            Value::Obj(obj) => obj,
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };
        let found = match self.heap.get(obj) {
            Obj::Instance(instance) => match instance.fields.get(key) {
                Some(value) => Some(value),
                None => {
                    let method = match self.heap.get(instance.class) {
                        Obj::Class(class) => class.methods.get(key),
                        _ => unreachable!("instances refer to classes"),
                    };
                    match method {
                        Some(Value::Obj(method)) => {
                            let bound = self.alloc(Obj::BoundMethod(ObjBoundMethod {
                                receiver: target,
                                method,
                            }));
                            Some(Value::Obj(bound))
                        }
                        _ => None,
                    }
                }
            },
            Obj::Class(class) if class.is_module => class.methods.get(key),
            Obj::Enum(e) => e.fields.get(key),
            Obj::Table(table) => return Ok(table.entries.get(key).unwrap_or(Value::Nil)),
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };
        found.ok_or_else(|| {
            self.runtime_error(format!("Undefined property '{}'.", self.heap.str(name)))
        })
    }

    fn set_property(&mut self, target: Value, name: ObjRef, value: Value) -> VmResult {
        let key = self.heap.key(name);
        if let Value::Obj(obj) = target {
            let stored = match self.heap.get_mut(obj) {
                Obj::Instance(instance) => {
                    instance.fields.set(key, value);
                    true
                }
                Obj::Table(table) => {
                    table.set(key, value);
                    true
                }
                _ => false,
            };
            if stored {
                self.heap.resize(obj);
                return Ok(());
            }
        }
        Err(self.runtime_error("Only instances have fields."))
    }

    fn get_subscript(&mut self, target: Value, index: Value) -> VmResult<Value> {
        let obj = match target {
            Value::Obj(obj) => obj,
            _ => return Err(self.runtime_error("Subscript invalid for type.")),
        };
        match self.heap.get(obj) {
            Obj::List(list) => {
                let i = self.index(index, list.items.len(), "list")?;
                Ok(list.items[i])
            }
            Obj::String(s) => {
                let i = self.index(index, s.char_len(), "string")?;
                let mut buf = [0; 4];
                let c = s.chars.chars().nth(i).unwrap_or_default();
                let c = c.encode_utf8(&mut buf);
                Ok(Value::Obj(self.intern(c)))
            }
            Obj::Table(table) => match self.string_key(index) {
                Some(key) => Ok(table.entries.get(key).unwrap_or(Value::Nil)),
                None => Err(self.runtime_error("Table keys must be strings.")),
            },
            Obj::Enum(e) => Ok(e
                .members
                .iter()
                .find(|&&member| e.fields.get(self.heap.key(member)) == Some(index))
                .map_or(Value::Nil, |&member| Value::Obj(member))),
            _ => Err(self.runtime_error("Subscript invalid for type.")),
        }
    }

    fn set_subscript(&mut self, target: Value, index: Value, value: Value) -> VmResult {
        let obj = match target {
            Value::Obj(obj) => obj,
            _ => return Err(self.runtime_error("Subscript invalid for type.")),
        };
        match self.heap.get(obj) {
            Obj::List(list) => {
                let i = self.index(index, list.items.len(), "list")?;
                if let Obj::List(list) = self.heap.get_mut(obj) {
                    list.items[i] = value;
                }
                Ok(())
            }
            Obj::Table(_) => {
                let key = self
                    .string_key(index)
                    .ok_or_else(|| self.runtime_error("Table keys must be strings."))?;
                if let Obj::Table(table) = self.heap.get_mut(obj) {
                    table.set(key, value);
                }
                self.heap.resize(obj);
                Ok(())
            }
            Obj::String(_) => Err(self.runtime_error("Strings are immutable.")),
            _ => Err(self.runtime_error("Subscript invalid for type.")),
        }
    }

    /// Resolves a possibly negative index into a sequence of `len` items.
    fn index(&self, index: Value, len: usize, what: &str) -> VmResult<usize> {
        let index = index
            .as_number()
            .ok_or_else(|| self.runtime_error("Index must be a number."))?;
        let i = index.trunc() as i64;
        let i = if i < 0 { i + len as i64 } else { i };
        if i < 0 || i >= len as i64 {
            return Err(self.runtime_error(format!("Index outside the bounds of the {}.", what)));
        }
        Ok(i as usize)
    }

    /// Resolves slice bounds. `nil` stands for the start or the end.
    fn slice_bounds(&self, start: Value, end: Value, len: usize, what: &str) -> VmResult<(usize, usize)> {
        let bound = |value: Value, default: usize| -> VmResult<i64> {
            match value {
                Value::Nil => Ok(default as i64),
                Value::Number(n) => {
                    let i = n.trunc() as i64;
                    Ok(if i < 0 { i + len as i64 } else { i })
                }
                _ => Err(self.runtime_error("Index must be a number.")),
            }
        };
        let (start, end) = (bound(start, 0)?, bound(end, len)?);
        let len = len as i64;
        if start < 0 || start > len || end < 0 || end > len {
            return Err(self.runtime_error(format!("Index outside the bounds of the {}.", what)));
        }
        Ok((start as usize, end.max(start) as usize))
    }

    fn slice(&mut self, target: Value, start: Value, end: Value) -> VmResult<Value> {
        let obj = match target {
            Value::Obj(obj) => obj,
            _ => return Err(self.runtime_error("Slice invalid for type.")),
        };
        let sliced = match self.heap.get(obj) {
            Obj::List(list) => {
                let (start, end) = self.slice_bounds(start, end, list.items.len(), "list")?;
                Obj::List(ObjList {
                    items: list.items[start..end].to_vec(),
                })
            }
            Obj::String(s) => {
                let (start, end) = self.slice_bounds(start, end, s.char_len(), "string")?;
                let sliced: String = s.chars.chars().skip(start).take(end - start).collect();
                return Ok(Value::Obj(self.intern(&sliced)));
            }
            _ => return Err(self.runtime_error("Slice invalid for type.")),
        };
        Ok(Value::Obj(self.alloc(sliced)))
    }

    fn length(&self, value: Value) -> VmResult<usize> {
        if let Value::Obj(obj) = value {
            match self.heap.get(obj) {
                Obj::List(list) => return Ok(list.items.len()),
                Obj::String(s) => return Ok(s.char_len()),
                Obj::Table(table) => return Ok(table.keys.len()),
                _ => {}
            }
        }
        Err(self.runtime_error("Can only iterate over a list, string or table."))
    }

    /// Item `index` of a sequence being iterated by `for`. Tables yield
    /// their keys.
    fn iter_item(&mut self, sequence: Value, index: Value) -> VmResult<Value> {
        if let Value::Obj(obj) = sequence {
            if let Obj::Table(table) = self.heap.get(obj) {
                let i = self.index(index, table.keys.len(), "table")?;
                return Ok(table.keys[i]);
            }
        }
        self.get_subscript(sequence, index)
    }

    // ---- operators ----

    fn numbers(&self, a: Value, b: Value) -> VmResult<(f64, f64)> {
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn binary_number(&mut self, op: fn(f64, f64) -> Value) -> VmResult {
        let (a, b) = self.numbers(self.peek(1), self.peek(0))?;
        self.replace_top(2, op(a, b));
        Ok(())
    }

    /// `<` and `>` on numbers, datetimes and strings
    fn compare(&mut self, greater: bool) -> VmResult {
        let (a, b) = (self.peek(1), self.peek(0));
        let ordering = match (a, b) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(&b),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(&b)),
            (Value::Obj(a), Value::Obj(b)) => match (self.heap.as_str(a), self.heap.as_str(b)) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => return Err(self.runtime_error("Operands must be numbers.")),
            },
            _ => return Err(self.runtime_error("Operands must be numbers.")),
        };
        let expected = if greater {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Less
        };
        self.replace_top(2, Value::Bool(ordering == Some(expected)));
        Ok(())
    }

    fn add(&mut self) -> VmResult {
        let (a, b) = (self.peek(1), self.peek(0));
        let result = match (a, b) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Obj(x), Value::Obj(y)) => match (self.heap.get(x), self.heap.get(y)) {
                (Obj::String(x), Obj::String(y)) => {
                    let joined = [&*x.chars, &*y.chars].concat();
                    Value::Obj(self.intern(&joined))
                }
                (Obj::List(x), Obj::List(y)) => {
                    let items = x.items.iter().chain(&y.items).copied().collect();
                    Value::Obj(self.alloc(Obj::List(ObjList { items })))
                }
                _ => return Err(self.add_error()),
            },
            _ => return Err(self.add_error()),
        };
        self.replace_top(2, result);
        Ok(())
    }

    fn add_error(&self) -> RuntimeError {
        self.runtime_error("Operands must be two numbers, strings or lists.")
    }

    /// Adds `delta` to a number, for the increment operators.
    fn increment(&self, value: Value, delta: Value) -> VmResult<Value> {
        match (value, delta) {
            (Value::Number(v), Value::Number(d)) => Ok(Value::Number(v + d)),
            _ => Err(self.runtime_error("Can only increment a number.")),
        }
    }

    fn range(&mut self) -> VmResult {
        let (start, end) = self.numbers(self.peek(1), self.peek(0))?;
        let (start, end) = (start.trunc() as i64, end.trunc() as i64);
        let items: Vec<Value> = if start <= end {
            (start..=end).map(|i| Value::Number(i as f64)).collect()
        } else {
            (end..=start).rev().map(|i| Value::Number(i as f64)).collect()
        };
        let list = self.alloc(Obj::List(ObjList { items }));
        self.replace_top(2, Value::Obj(list));
        Ok(())
    }

    fn print(&mut self, value: Value) -> VmResult {
        let text = self.heap.display(value).to_string();
        writeln!(self.out, "{}", text)
            .map_err(|e| self.runtime_error(format!("Could not write output: {}", e)))
    }

    // ---- the interpreter loop ----

    fn run(&mut self) -> VmResult {
        loop {
            let byte = self.read_u8();
            let op = match Op::from_ordinal(byte) {
                Some(op) => op,
                None => unreachable!("invalid opcode {}", byte),
            };
            match op {
                Op::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                Op::Nil => self.push(Value::Nil),
                Op::True => self.push(Value::Bool(true)),
                Op::False => self.push(Value::Bool(false)),
                Op::Pop => {
                    self.pop();
                }
                Op::Dup => self.push(self.peek(0)),
                Op::Swap => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }

                Op::GetLocal => {
                    let slot = self.local_slot();
                    self.push(self.stack[slot]);
                }
                Op::SetLocal => {
                    let slot = self.local_slot();
                    let value = self.peek(0);
                    self.stack[slot] = value;
                }
                Op::GetUpvalue => {
                    let upvalue = self.read_upvalue();
                    self.push(self.upvalue_get(upvalue));
                }
                Op::SetUpvalue => {
                    let upvalue = self.read_upvalue();
                    self.upvalue_set(upvalue, self.peek(0));
                }
                Op::DefineGlobal => {
                    let name = self.read_string();
                    let key = self.heap.key(name);
                    let value = self.pop();
                    self.globals.set(key, value);
                }
                Op::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(self.heap.key(name)) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                self.heap.str(name)
                            )))
                        }
                    }
                }

                Op::GetProperty => {
                    let name = self.read_string();
                    let value = self.get_property(self.peek(0), name)?;
                    self.replace_top(1, value);
                }
                Op::SetProperty => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    self.set_property(self.peek(1), name, value)?;
                    self.replace_top(2, value);
                }
                Op::GetSubscript => {
                    let value = self.get_subscript(self.peek(1), self.peek(0))?;
                    self.replace_top(2, value);
                }
                Op::SetSubscript => {
                    let value = self.peek(0);
                    self.set_subscript(self.peek(2), self.peek(1), value)?;
                    self.replace_top(3, value);
                }
                Op::Slice => {
                    let value = self.slice(self.peek(2), self.peek(1), self.peek(0))?;
                    self.replace_top(3, value);
                }

                Op::Equal => {
                    let equal = self.peek(1) == self.peek(0);
                    self.replace_top(2, Value::Bool(equal));
                }
                Op::Greater => self.compare(true)?,
                Op::Less => self.compare(false)?,
                Op::Add => self.add()?,
                Op::Subtract => self.binary_number(|a, b| Value::Number(a - b))?,
                Op::Multiply => self.binary_number(|a, b| Value::Number(a * b))?,
                Op::Divide => self.binary_number(|a, b| Value::Number(a / b))?,
                Op::Modulo => self.binary_number(|a, b| Value::Number(a % b))?,
                Op::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Op::Negate => match self.peek(0) {
                    Value::Number(n) => self.replace_top(1, Value::Number(-n)),
                    _ => return Err(self.runtime_error("Operand must be a number.")),
                },
                Op::Range => self.range()?,
                Op::Length => {
                    let len = self.length(self.peek(0))?;
                    self.replace_top(1, Value::Number(len as f64));
                }
                Op::IterItem => {
                    let item = self.iter_item(self.peek(1), self.peek(0))?;
                    self.replace_top(2, item);
                }
                Op::Stringify => {
                    let value = self.peek(0);
                    if self.string_key(value).is_none() {
                        let text = self.heap.display(value).to_string();
                        let s = self.intern(&text);
                        self.replace_top(1, Value::Obj(s));
                    }
                }

                Op::IncLocal | Op::DecLocal => {
                    let slot = self.local_slot();
                    let old = self.stack[slot];
                    let new = self.increment(old, step(op == Op::IncLocal))?;
                    self.stack[slot] = new;
                    self.push(old);
                }
                Op::IncUpvalue | Op::DecUpvalue => {
                    let upvalue = self.read_upvalue();
                    let old = self.upvalue_get(upvalue);
                    let new = self.increment(old, step(op == Op::IncUpvalue))?;
                    self.upvalue_set(upvalue, new);
                    self.push(old);
                }
                Op::IncProperty | Op::DecProperty => {
                    let name = self.read_string();
                    let target = self.peek(0);
                    let old = self.get_property(target, name)?;
                    let new = self.increment(old, step(op == Op::IncProperty))?;
                    self.set_property(target, name, new)?;
                    self.replace_top(1, old);
                }
                Op::AddProperty => {
                    let name = self.read_string();
                    let (target, delta) = (self.peek(1), self.peek(0));
                    let old = self.get_property(target, name)?;
                    let new = self.increment(old, delta)?;
                    self.set_property(target, name, new)?;
                    self.replace_top(2, new);
                }
                Op::IncSubscript | Op::DecSubscript => {
                    let (target, index) = (self.peek(1), self.peek(0));
                    let old = self.get_subscript(target, index)?;
                    let new = self.increment(old, step(op == Op::IncSubscript))?;
                    self.set_subscript(target, index, new)?;
                    self.replace_top(2, old);
                }
                Op::AddSubscript => {
                    let (target, index, delta) = (self.peek(2), self.peek(1), self.peek(0));
                    let old = self.get_subscript(target, index)?;
                    let new = self.increment(old, delta)?;
                    self.set_subscript(target, index, new)?;
                    self.replace_top(3, new);
                }

                Op::NewList => {
                    let list = self.alloc(Obj::List(ObjList::default()));
                    self.push(Value::Obj(list));
                }
                Op::ListAdd => {
                    let value = self.pop();
                    if let Value::Obj(list) = self.peek(0) {
                        if let Obj::List(items) = self.heap.get_mut(list) {
                            items.items.push(value);
                        }
                        self.heap.resize(list);
                    }
                }
                Op::NewTable => {
                    let table = self.alloc(Obj::Table(ObjTable::default()));
                    self.push(Value::Obj(table));
                }
                Op::TableAdd => {
                    let key = self
                        .string_key(self.peek(1))
                        .ok_or_else(|| self.runtime_error("Table keys must be strings."))?;
                    let value = self.peek(0);
                    if let Value::Obj(table) = self.peek(2) {
                        if let Obj::Table(entries) = self.heap.get_mut(table) {
                            entries.set(key, value);
                        }
                        self.heap.resize(table);
                    }
                    self.stack.truncate(self.stack.len() - 2);
                }
                Op::Print => {
                    let value = self.pop();
                    self.print(value)?;
                }

                Op::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frames
                        .last_mut()
                        .expect("a frame is active while running")
                        .ip += offset;
                }
                Op::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames
                            .last_mut()
                            .expect("a frame is active while running")
                            .ip += offset;
                    }
                }
                Op::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frames
                        .last_mut()
                        .expect("a frame is active while running")
                        .ip -= offset;
                }
                Op::Call => {
                    let argc = self.read_u8() as usize;
                    self.call_value(self.peek(argc), argc)?;
                }
                Op::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(f) => f,
                        _ => unreachable!("closure operands refer to function constants"),
                    };
                    let upvalue_count = self::function(&self.heap, function).upvalue_count;
                    let closure = self.alloc(Obj::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::Obj(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_u8() != 0;
                        let index = self.read_u8();
                        let upvalue = if is_local {
                            let slot = self.frame().slots + index as usize;
                            self.capture_upvalue(slot)
                        } else {
                            self.frame_upvalue(index)
                        };
                        if let Obj::Closure(c) = self.heap.get_mut(closure) {
                            c.upvalues.push(upvalue);
                        }
                    }
                }
                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                Op::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("a frame is active while running");
                    self.close_upvalues(frame.slots);
                    self.stack.truncate(frame.slots);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }

                Op::Class | Op::Module => {
                    let name = self.read_string();
                    let class = self.alloc(Obj::Class(ObjClass {
                        name,
                        methods: Table::new(),
                        is_module: op == Op::Module,
                    }));
                    self.push(Value::Obj(class));
                }
                Op::Method => {
                    let name = self.read_string();
                    let key = self.heap.key(name);
                    let method = self.peek(0);
                    if let Value::Obj(class) = self.peek(1) {
                        if let Obj::Class(c) = self.heap.get_mut(class) {
                            c.methods.set(key, method);
                        }
                        self.heap.resize(class);
                    }
                    self.pop();
                }
                Op::Enum => {
                    let name = self.read_string();
                    let e = self.alloc(Obj::Enum(ObjEnum {
                        name,
                        counter: 0.0,
                        fields: Table::new(),
                        members: Vec::new(),
                    }));
                    self.push(Value::Obj(e));
                }
                Op::EnumField | Op::EnumFieldValue => {
                    let name = self.read_string();
                    let key = self.heap.key(name);
                    let explicit = if op == Op::EnumFieldValue {
                        Some(self.pop())
                    } else {
                        None
                    };
                    if let Value::Obj(target) = self.peek(0) {
                        if let Obj::Enum(e) = self.heap.get_mut(target) {
                            let value = explicit.unwrap_or(Value::Number(e.counter));
                            if let Value::Number(n) = value {
                                e.counter = n + 1.0;
                            }
                            if e.fields.set(key, value) {
                                e.members.push(name);
                            }
                        }
                        self.heap.resize(target);
                    }
                }
            }
        }
    }
}

fn step(up: bool) -> Value {
    Value::Number(if up { 1.0 } else { -1.0 })
}

fn function(heap: &Heap, function: ObjRef) -> &ObjFunction {
    match heap.get(function) {
        Obj::Function(f) => f,
        _ => unreachable!("frames and closures refer to function objects"),
    }
}

fn chunk(heap: &Heap, function: ObjRef) -> &Chunk<Value> {
    &self::function(heap, function).chunk
}
