use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::gc::Heap;
use crate::table::Table;
use crate::{InterpretError, InterpretResult, RuntimeError, Value, Vm, VmOptions};

/// Collects what a VM prints.
#[derive(Clone, Default)]
struct Output(Rc<RefCell<Vec<u8>>>);

impl Output {
    fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.borrow_mut());
        String::from_utf8(bytes).unwrap()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn vm_with(options: VmOptions) -> (Vm, Output) {
    let mut vm = Vm::with_options(options);
    let out = Output::default();
    vm.set_output(out.clone());
    (vm, out)
}

fn run(src: &str) -> String {
    let (mut vm, out) = vm_with(VmOptions::default());
    if let Err(e) = vm.interpret(src, "test") {
        panic!("unexpected error: {}\noutput so far:\n{}", e, out.take());
    }
    out.take()
}

fn runtime_error(src: &str) -> RuntimeError {
    let (mut vm, _) = vm_with(VmOptions::default());
    match vm.interpret(src, "test") {
        Err(InterpretError::Runtime(e)) => e,
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

#[test]
fn arithmetic_and_printing() {
    assert_eq!(
        run("print 1 + 2 * 3; print 0.5; print 7 % 4; print -(2 - 5); print 10 / 4;"),
        "7\n0.5\n3\n3\n2.5\n"
    );
    assert_eq!(run("print nil; print true; print !0;"), "nil\ntrue\ntrue\n");
}

#[test]
fn strings_are_interned() {
    let (mut vm, _) = vm_with(VmOptions::default());
    vm.interpret(r#"const a = "ab"; const b = "a" + "b";"#, "test")
        .unwrap();
    let a = vm.get_global("a").unwrap();
    let b = vm.get_global("b").unwrap();
    assert!(matches!(a, Value::Obj(_)));
    assert_eq!(a, b);
    assert_eq!(run(r#"print "a" + "b" == "ab";"#), "true\n");
}

#[test]
fn closures_share_captured_variables() {
    let src = r#"
fn test() {
    var counter = 0;
    var readers = [];
    loop 3 times {
        counter++;
        add(readers, fn () => counter);
    }
    for reader in readers do print reader();
}
test();
"#;
    assert_eq!(run(src), "3\n3\n3\n");
}

#[test]
fn closed_upvalues_outlive_their_frame() {
    let src = r#"
fn make() {
    var n = 0;
    return [fn () { n++; return n; }, fn () => n];
}
const fns = make();
fns[0]();
fns[0]();
print fns[1]();
"#;
    assert_eq!(run(src), "2\n");
}

#[test]
fn each_closure_expression_is_a_new_closure() {
    let src = r#"
fn counter() {
    var n = 0;
    return fn () { n += 1; return n; };
}
const a = counter();
const b = counter();
a();
a();
print a();
print b();
"#;
    assert_eq!(run(src), "3\n1\n");
}

#[test]
fn unreachable_objects_are_freed() {
    let (mut vm, _) = vm_with(VmOptions::default());
    vm.interpret("const keep = [1, 2, 3];", "test").unwrap();
    vm.collect_garbage();
    let objects = vm.heap().object_count();
    let bytes = vm.heap().total_mem_allocated();

    vm.interpret(
        r#"{ var garbage = [4, 5, 6]; var s = "temp" + "orary"; }"#,
        "test",
    )
    .unwrap();
    assert!(vm.heap().object_count() > objects);
    vm.collect_garbage();

    assert_eq!(vm.heap().object_count(), objects);
    assert_eq!(vm.heap().total_mem_allocated(), bytes);
    let keep = vm.get_global("keep").unwrap();
    assert_eq!(vm.display(keep), "[1, 2, 3]");
}

#[test]
fn growing_objects_are_charged_to_the_heap() {
    let (mut vm, _) = vm_with(VmOptions::default());
    vm.interpret("const l = []; const t = {};", "test").unwrap();
    vm.collect_garbage();
    let before = vm.heap().total_mem_allocated();

    vm.interpret(
        r#"loop 1000 times { add(l, i); t["k%{i}"] = i; }"#,
        "test",
    )
    .unwrap();
    vm.collect_garbage();
    let after = vm.heap().total_mem_allocated();
    assert!(after >= before + 2000 * std::mem::size_of::<Value>());

    // Sweeping gives back what growth charged
    let (mut fresh, _) = vm_with(VmOptions::default());
    fresh.collect_garbage();
    let baseline = fresh.heap().total_mem_allocated();
    fresh
        .interpret("{ var l = []; loop 1000 times add(l, i); var s = [1, 2] + l; }", "test")
        .unwrap();
    fresh.collect_garbage();
    assert_eq!(fresh.heap().total_mem_allocated(), baseline);
}

#[test]
fn stress_gc_keeps_everything_reachable() {
    let src = r#"
class Node {
    fn init(value) { me.value = value; me.children = []; }
    fn add(child) { add(me.children, child); return me; }
}
fn build(depth) {
    var node = Node(depth);
    if depth > 0 then {
        node.add(build(depth - 1));
        node.add(build(depth - 1));
    }
    return node;
}
fn count(node) {
    var total = 1;
    for child in node.children do total += count(child);
    return total;
}
const tree = build(4);
print count(tree);
print "%{tree.value} levels" + "!";
print [1, 2, 3, 4] where x => x % 2 == 0;
"#;
    let (mut vm, out) = vm_with(VmOptions {
        stress_gc: true,
        ..VmOptions::default()
    });
    vm.interpret(src, "test").unwrap();
    assert_eq!(out.take(), "31\n4 levels!\n[2, 4]\n");
}

#[test]
fn negative_indexing() {
    assert_eq!(
        run("const l = [10, 20, 30]; print l[-1]; print l[-3]; print l[0];"),
        "30\n10\n10\n"
    );
    let e = runtime_error("const l = [10, 20, 30]; print l[-4];");
    assert_eq!(e.message, "Index outside the bounds of the list.");
    let e = runtime_error("const l = [10, 20, 30]; print l[3];");
    assert_eq!(e.message, "Index outside the bounds of the list.");
    let e = runtime_error(r#"print "abc"[5];"#);
    assert_eq!(e.message, "Index outside the bounds of the string.");
}

#[test]
fn ranges() {
    assert_eq!(run("print 1..5;"), "[1, 2, 3, 4, 5]\n");
    assert_eq!(run("print 5..1;"), "[5, 4, 3, 2, 1]\n");
    assert_eq!(run("print 3..3;"), "[3]\n");
    assert_eq!(
        run("{ var total = 0; for i in 1..4 do total += i; print total; }"),
        "10\n"
    );
}

#[test]
fn arity_is_enforced() {
    let src = "fn f(a, b) { return a + b; }\n";
    let e = runtime_error(&format!("{}f(1);", src));
    assert_eq!(e.message, "Expected 2 arguments but got 1.");
    let e = runtime_error(&format!("{}f(1, 2, 3);", src));
    assert_eq!(e.message, "Expected 2 arguments but got 3.");
    let e = runtime_error("len(1, 2);");
    assert_eq!(e.message, "Expected 1 arguments but got 2.");
}

#[test]
fn optional_parameters() {
    let src = r#"
fn greet(name, greeting = "Hello") { return greeting + " " + name; }
print greet("Bob");
print greet("Bob", "Hi");
"#;
    assert_eq!(run(src), "Hello Bob\nHi Bob\n");
    let e = runtime_error(r#"fn f(a, b = 1) { return a; } f();"#);
    assert_eq!(e.message, "Expected 2 arguments but got 0.");
}

#[test]
fn modules() {
    let src = r#"
mod Greeter {
    fn hello(name) { return "hi " + name; }
}
print Greeter.hello("there");
print Greeter;
"#;
    assert_eq!(run(src), "hi there\nGreeter\n");
    let e = runtime_error("mod M { fn f() { return 1; } } M();");
    assert_eq!(e.message, "Cannot instantiate a module.");
}

#[test]
fn global_const_rule_is_a_compile_error() {
    let (mut vm, out) = vm_with(VmOptions::default());
    let result = vm.interpret("print 1; var x = 1;", "test");
    assert_eq!(InterpretResult::from(&result), InterpretResult::CompileError);
    let error = result.unwrap_err();
    assert_eq!(error.exit_code(), 65);
    match error {
        InterpretError::Compile(errors) => assert_eq!(
            errors.messages(),
            vec!["Global variables must be marked 'const'"]
        ),
        other => panic!("expected a compile error, got {:?}", other),
    }
    // Nothing ran
    assert_eq!(out.take(), "");
}

#[test]
fn classes_and_bound_methods() {
    let src = r#"
class Point {
    fn init(x, y) { me.x = x; me.y = y; }
    fn sum() { return me.x + me.y; }
}
const p = Point(1, 2);
print p.sum();
const m = p.sum;
print m();
p.x += 10;
p.y++;
print p.sum();
print p;
print Point;
"#;
    assert_eq!(run(src), "3\n3\n14\nPoint instance\nPoint\n");
}

#[test]
fn class_without_init_takes_no_arguments() {
    assert_eq!(run("class A { fn f() { return 1; } } print A().f();"), "1\n");
    let e = runtime_error("class A { } A(1);");
    assert_eq!(e.message, "Expected 0 arguments but got 1.");
}

#[test]
fn property_errors() {
    let e = runtime_error("class A { } print A().nope;");
    assert_eq!(e.message, "Undefined property 'nope'.");
    let e = runtime_error("const n = 1; print n.x;");
    assert_eq!(e.message, "Only instances have properties.");
    let e = runtime_error(r#"class A { } { var a = A(); a.x = "s"; a.x++; }"#);
    assert_eq!(e.message, "Can only increment a number.");
}

#[test]
fn enums() {
    let src = r#"
enum Color { Red, Green = 10, Blue, Named = "n" }
print Color.Red;
print Color.Blue;
print Color[10];
print Color.Named;
print Color;
"#;
    assert_eq!(run(src), "0\n11\nGreen\nn\n<enum Color>\n");
}

#[test]
fn enum_reverse_lookup_prefers_the_first_member() {
    let src = r#"
enum E { A = 1, B = 0, C }
print E.C;
print E[1];
print E[0];
"#;
    assert_eq!(run(src), "1\nA\nB\n");
}

#[test]
fn where_and_select() {
    assert_eq!(run("print [1, 2, 3, 4] where x => x > 2;"), "[3, 4]\n");
    assert_eq!(run("print [1, 2] select x => x * 10;"), "[10, 20]\n");
    assert_eq!(
        run("print 1..6 where x => x % 2 == 0 select y => y * y;"),
        "[4, 16, 36]\n"
    );
}

#[test]
fn string_interpolation() {
    assert_eq!(
        run(r#"const n = 3; print "n = %{n + 1}!"; print "%{n}%{n}";"#),
        "n = 4!\n33\n"
    );
}

#[test]
fn tables() {
    let src = r#"
const t = {"a": 1};
t.b = 2;
t["c"] = 3;
t["a"] += 5;
print t;
print t.missing;
print keys(t);
print len(t);
"#;
    assert_eq!(
        run(src),
        "{\"a\": 6, \"b\": 2, \"c\": 3}\nnil\n[\"a\", \"b\", \"c\"]\n3\n"
    );
}

#[test]
fn slices() {
    let src = r#"
const l = [1, 2, 3, 4];
print l[1:3];
print l[:2];
print l[2:];
print l[-2:];
print "hello"[1:-1];
print "abc"[-1];
"#;
    assert_eq!(run(src), "[2, 3]\n[1, 2]\n[3, 4]\n[3, 4]\nell\nc\n");
    let e = runtime_error("print [1][0:5];");
    assert_eq!(e.message, "Index outside the bounds of the list.");
}

#[test]
fn control_flow() {
    assert_eq!(
        run(r#"if 0 then print "yes"; else print "no";"#),
        "no\n"
    );
    assert_eq!(run("loop 3 times print i;"), "0\n1\n2\n");
    assert_eq!(run(r#"for c in "ab" do print c;"#), "a\nb\n");
    assert_eq!(
        run("{ var n = 0; while n < 3 do n++; print n; }"),
        "3\n"
    );
    assert_eq!(run("print nil or 2; print 1 and 0;"), "2\n0\n");
}

#[test]
fn increments_yield_the_old_value() {
    assert_eq!(run("{ var a = 1; print a++; print a; print a--; print a; }"), "1\n2\n2\n1\n");
    assert_eq!(
        run("{ var l = [1, 2]; l[0] += 5; l[1]--; l[0] -= 1; print l; }"),
        "[5, 1]\n"
    );
}

#[test]
fn operator_type_errors() {
    let e = runtime_error(r#"print 1 + "a";"#);
    assert_eq!(e.message, "Operands must be two numbers, strings or lists.");
    let e = runtime_error(r#"print 1 * "a";"#);
    assert_eq!(e.message, "Operands must be numbers.");
    let e = runtime_error(r#"print -"a";"#);
    assert_eq!(e.message, "Operand must be a number.");
    let e = runtime_error("print 1[0];");
    assert_eq!(e.message, "Subscript invalid for type.");
    let e = runtime_error("nope();");
    assert_eq!(e.message, "Undefined variable 'nope'.");
    let e = runtime_error("{ var x = 1; x(); }");
    assert_eq!(e.message, "Can only call functions and classes.");
}

#[test]
fn comparisons() {
    assert_eq!(
        run(r#"print "a" < "b"; print 2 >= 2; print 1 > 2; print [1] + [2];"#),
        "true\ntrue\nfalse\n[1, 2]\n"
    );
    let e = runtime_error(r#"print 1 < "a";"#);
    assert_eq!(e.message, "Operands must be numbers.");
}

#[test]
fn core_natives() {
    assert_eq!(
        run(r#"print typeof(1); print len("héllo"); print str(12) + "!"; print typeof(now());"#),
        "number\n5\n12!\ndatetime\n"
    );
    assert_eq!(run(r#"print ["a", 1, nil];"#), "[\"a\", 1, nil]\n");
    let e = runtime_error("len(1);");
    assert_eq!(e.message, "len() expects a list, string or table.");
}

#[test]
fn stack_trace_lists_frames_innermost_first() {
    let e = runtime_error(
        "fn inner() { return -\"x\"; }\nfn outer() { return inner(); }\nouter();",
    );
    assert_eq!(e.message, "Operand must be a number.");
    assert_eq!(
        e.to_string(),
        "Operand must be a number.\n[line 1] in inner()\n[line 2] in outer()\n[line 3] in script"
    );
}

#[test]
fn stack_overflow() {
    let e = runtime_error("fn f() { return f(); } f();");
    assert_eq!(e.message, "Stack overflow.");
    assert_eq!(e.trace.len(), 64);
}

#[test]
fn vm_recovers_after_runtime_error() {
    let (mut vm, out) = vm_with(VmOptions::default());
    let result = vm.interpret("const a = 1; print a; print -nil;", "test");
    assert_eq!(InterpretResult::from(&result), InterpretResult::RuntimeError);
    assert_eq!(result.unwrap_err().exit_code(), 70);
    vm.interpret("print a + 1;", "test").unwrap();
    assert_eq!(out.take(), "1\n2\n");
}

#[test]
fn escaped_closures_survive_a_runtime_error() {
    let (mut vm, out) = vm_with(VmOptions::default());
    let result = vm.interpret(
        r#"
const holder = [];
fn make() {
    var a = 1;
    var b = 2;
    var x = 42;
    add(holder, fn () => x + a + b - 3);
    return -nil;
}
make();
"#,
        "test",
    );
    assert_eq!(InterpretResult::from(&result), InterpretResult::RuntimeError);
    vm.interpret("print holder[0]();", "test").unwrap();
    assert_eq!(out.take(), "42\n");
}

#[test]
fn prelude_can_be_skipped() {
    let (mut vm, _) = vm_with(VmOptions {
        load_prelude: false,
        ..VmOptions::default()
    });
    assert!(vm.get_global("filter").is_none());
    assert!(vm.get_global("len").is_some());
    let result = vm.interpret("print [1] where x => x;", "test");
    match result {
        Err(InterpretError::Runtime(e)) => assert_eq!(e.message, "Undefined variable 'filter'."),
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

#[test]
fn table_probing_and_tombstones() {
    let mut heap = Heap::default();
    let keys: Vec<_> = (0..50)
        .map(|i| {
            let s = heap.intern(&format!("key{}", i));
            heap.key(s)
        })
        .collect();

    let mut table = Table::new();
    for (i, &key) in keys.iter().enumerate() {
        assert!(table.set(key, Value::Number(i as f64)));
    }
    assert_eq!(table.len(), 50);
    assert!(table.capacity().is_power_of_two());
    assert!(table.len() * 4 <= table.capacity() * 3);

    assert!(!table.set(keys[3], Value::Bool(true)));
    assert_eq!(table.get(keys[3]), Some(Value::Bool(true)));

    for key in keys.iter().step_by(2) {
        assert!(table.delete(*key));
    }
    assert!(!table.delete(keys[0]));
    assert_eq!(table.len(), 25);
    for (i, key) in keys.iter().enumerate() {
        let expected = match i {
            _ if i % 2 == 0 => None,
            3 => Some(Value::Bool(true)),
            _ => Some(Value::Number(i as f64)),
        };
        assert_eq!(table.get(*key), expected);
    }

    // Deleted slots are reused
    let capacity = table.capacity();
    for key in keys.iter().step_by(2) {
        table.set(*key, Value::Nil);
    }
    assert_eq!(table.capacity(), capacity);
    assert_eq!(table.len(), 50);
    assert!(table.contains_key(keys[0]));
}

#[test]
fn table_add_all() {
    let mut heap = Heap::default();
    let a = heap.intern("a");
    let b = heap.intern("b");
    let mut from = Table::new();
    from.set(heap.key(a), Value::Number(1.0));
    from.set(heap.key(b), Value::Number(2.0));
    let mut to = Table::new();
    to.set(heap.key(a), Value::Nil);
    from.add_all(&mut to);
    assert_eq!(to.len(), 2);
    assert_eq!(to.get(heap.key(a)), Some(Value::Number(1.0)));
    assert!(to.delete(heap.key(b)));
    assert!(to.iter().all(|(k, _)| k == heap.key(a)));
}
