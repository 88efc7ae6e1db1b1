use mal_bytecode::{Constant, Function, Op, Operand};
use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::compile;

/// Decodes the instruction stream of `f`, skipping operands.
fn ops(f: &Function) -> Vec<Op> {
    let chunk = &f.chunk;
    let mut out = vec![];
    let mut offset = 0;
    while offset < chunk.len() {
        let op = Op::from_ordinal(chunk.read_u8(offset)).expect("valid opcode");
        offset += 1 + op.operand().width();
        if op.operand() == Operand::Closure {
            let idx = chunk.read_u16(offset - 2) as usize;
            match chunk.constant(idx) {
                Constant::Function(func) => offset += 2 * func.upvalue_count,
                c => panic!("closure over non-function constant {}", c),
            }
        }
        out.push(op);
    }
    out
}

fn nested(f: &Function, name: &str) -> Box<Function> {
    f.chunk
        .constants()
        .iter()
        .find_map(|c| match c {
            Constant::Function(func) if func.name.as_deref() == Some(name) => {
                Some(Box::new(clone_function(func)))
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("no nested function named {}", name))
}

// Functions are not Clone; rebuild the parts the tests look at.
fn clone_function(f: &Function) -> Function {
    let mut copy = Function::new(f.name.clone());
    copy.arity = f.arity;
    copy.optionals = f.optionals;
    copy.upvalue_count = f.upvalue_count;
    for (offset, &byte) in f.chunk.code().iter().enumerate() {
        copy.chunk.write(byte, f.chunk.line_at(offset));
    }
    for c in f.chunk.constants() {
        copy.chunk.add_constant(match c {
            Constant::Number(n) => Constant::Number(*n),
            Constant::String(s) => Constant::String(s.clone()),
            Constant::Function(func) => Constant::Function(Box::new(clone_function(func))),
        });
    }
    copy
}

fn errors(src: &str) -> Vec<String> {
    match compile(src, "test") {
        Ok(_) => vec![],
        Err(e) => e.errors.iter().map(|e| e.to_string()).collect(),
    }
}

#[test]
fn script_ends_with_return_on_its_last_line() {
    let f = compile("print 1;\n\nprint 2;", "test").unwrap();
    let code = f.chunk.code();
    let ops = ops(&f);
    assert_eq!(ops[ops.len() - 2..].to_vec(), vec![Op::Nil, Op::Return]);
    assert_eq!(f.chunk.line_at(code.len() - 1), 3);
    assert_eq!(f.chunk.line_at(code.len() - 2), 3);
}

#[test]
fn print_arithmetic() {
    let f = compile("print 1 + 2 * 3;", "test").unwrap();
    assert_eq!(
        ops(&f),
        vec![
            Op::Constant,
            Op::Constant,
            Op::Constant,
            Op::Multiply,
            Op::Add,
            Op::Print,
            Op::Nil,
            Op::Return
        ]
    );
    assert_eq!(f.name, None);
}

#[test]
fn comparison_desugaring() {
    let f = compile("print 1 <= 2;", "test").unwrap();
    assert_eq!(
        ops(&f)[2..4].to_vec(),
        vec![Op::Greater, Op::Not],
    );
    let f = compile("print 1 != 2;", "test").unwrap();
    assert_eq!(ops(&f)[2..4].to_vec(), vec![Op::Equal, Op::Not]);
}

#[test]
fn constants_are_not_deduplicated() {
    let f = compile("print 1 + 1;", "test").unwrap();
    assert_eq!(f.chunk.constants().len(), 2);
}

#[test]
fn string_escapes() {
    let f = compile(r#"print "a\tb\qc\%";"#, "test").unwrap();
    match &f.chunk.constants()[0] {
        Constant::String(s) => assert_eq!(s.as_str(), "a\tb\\qc%"),
        c => panic!("unexpected constant {}", c),
    }
}

#[test]
fn raw_strings_keep_backslashes() {
    let f = compile(r#"print """a\nb""";"#, "test").unwrap();
    match &f.chunk.constants()[0] {
        Constant::String(s) => assert_eq!(s.as_str(), r"a\nb"),
        c => panic!("unexpected constant {}", c),
    }
}

#[test]
fn interpolation_concatenates() {
    let f = compile(r#"const x = 1; print "a%{x}b";"#, "test").unwrap();
    assert_eq!(
        ops(&f),
        vec![
            Op::Constant,
            Op::DefineGlobal,
            Op::Constant,
            Op::GetGlobal,
            Op::Stringify,
            Op::Add,
            Op::Constant,
            Op::Add,
            Op::Print,
            Op::Nil,
            Op::Return
        ]
    );
}

#[test]
fn local_scopes_pop_their_locals() {
    let f = compile("{ var a = 1; var b = 2; print a + b; }", "test").unwrap();
    assert_eq!(
        ops(&f),
        vec![
            Op::Constant,
            Op::Constant,
            Op::GetLocal,
            Op::GetLocal,
            Op::Add,
            Op::Print,
            Op::Pop,
            Op::Pop,
            Op::Nil,
            Op::Return
        ]
    );
}

#[test]
fn captured_locals_are_closed() {
    let f = compile(
        "fn outer() { var x = 1; fn inner() { return x; } return inner; }",
        "test",
    )
    .unwrap();
    let outer = nested(&f, "outer");
    let inner = nested(&outer, "inner");
    assert_eq!(inner.upvalue_count, 1);
    assert_eq!(
        ops(&inner),
        vec![Op::GetUpvalue, Op::Return, Op::Nil, Op::Return]
    );
    // `x` lives in slot 1, so the upvalue pair is (is_local = 1, index = 1).
    let code = outer.chunk.code();
    let closure_at = code
        .iter()
        .position(|&b| b == Op::Closure.ordinal())
        .unwrap();
    assert_eq!(&code[closure_at + 3..closure_at + 5], &[1, 1]);
}

#[test]
fn upvalues_chain_through_enclosing_functions() {
    let f = compile(
        "fn a() { var x = 1; fn b() { fn c() { return x; } return c; } return b; }",
        "test",
    )
    .unwrap();
    let b = nested(&nested(&f, "a"), "b");
    assert_eq!(b.upvalue_count, 1);
    let c = nested(&b, "c");
    assert_eq!(c.upvalue_count, 1);
}

#[test]
fn optional_parameters() {
    let f = compile("fn f(a, b = 2) { return a + b; }", "test").unwrap();
    let func = nested(&f, "f");
    assert_eq!(func.arity, 2);
    assert_eq!(func.optionals, 1);
    assert_eq!(
        ops(&func)[..4].to_vec(),
        vec![Op::GetLocal, Op::Nil, Op::Equal, Op::JumpIfFalse]
    );
}

#[test]
fn initializer_returns_receiver() {
    let f = compile("class A { fn init() { me.x = 1; } }", "test").unwrap();
    let init = nested(&f, "init");
    let ops = ops(&init);
    assert_eq!(ops[ops.len() - 2..].to_vec(), vec![Op::GetLocal, Op::Return]);
    let code = init.chunk.code();
    assert_eq!(code[code.len() - 2], 0);
}

#[test]
fn for_loop_lowers_to_index_loop() {
    let f = compile("{ for x in [1, 2] do print x; }", "test").unwrap();
    let ops = ops(&f);
    assert!(ops.contains(&Op::Length));
    assert!(ops.contains(&Op::IterItem));
    assert!(ops.contains(&Op::IncLocal));
    assert!(ops.contains(&Op::Loop));
}

#[test]
fn where_calls_filter() {
    let f = compile("const l = [1, 2] where x => x > 1;", "test").unwrap();
    let ops = ops(&f);
    let at = ops.iter().position(|&op| op == Op::Swap).unwrap();
    assert_eq!(ops[at - 1], Op::GetGlobal);
    assert_eq!(ops[at + 1], Op::Closure);
    assert_eq!(ops[at + 2], Op::Call);
    let lambda = nested(&f, "lambda");
    assert_eq!(lambda.arity, 1);
}

#[test]
fn globals_must_be_const() {
    assert_eq!(
        errors("var x = 1;"),
        vec!["[line 1] Error at 'x': Global variables must be marked 'const'"]
    );
    assert_eq!(errors("const x = 1;"), Vec::<String>::new());
}

#[test]
fn variables_need_initialiser() {
    assert_eq!(
        errors("{ var x; }"),
        vec!["[line 1] Error at 'x': All variables must be initialised."]
    );
}

#[test]
fn constants_cannot_be_assigned() {
    assert_eq!(
        errors("const x = 1; x = 2;"),
        vec!["[line 1] Error at '=': Can't assign to constant 'x'."]
    );
    assert_eq!(
        errors("{ const y = 1; y++; }"),
        vec!["[line 1] Error at '++': Can't assign to constant 'y'."]
    );
    assert_eq!(errors("{ var y = 1; y++; y += 2; }"), Vec::<String>::new());
}

#[test]
fn invalid_assignment_target() {
    assert_eq!(
        errors("{ var a = 1; var b = 2; a + b = 3; }"),
        vec!["[line 1] Error at '=': Invalid assignment target."]
    );
}

#[test]
fn return_rules() {
    assert_eq!(
        errors("return 1;"),
        vec!["[line 1] Error at 'return': Can't return from top-level code."]
    );
    assert_eq!(
        errors("class A { fn init() { return 1; } }"),
        vec!["[line 1] Error at 'return': Can't return a value from an initializer."]
    );
    assert_eq!(errors("class A { fn init() { return; } }"), Vec::<String>::new());
}

#[test]
fn me_outside_class() {
    assert_eq!(
        errors("print me;"),
        vec!["[line 1] Error at 'me': Can't use 'me' outside of a class."]
    );
    assert_eq!(
        errors("mod M { fn f() { return me; } }"),
        vec!["[line 1] Error at 'me': Can't use 'me' outside of a class."]
    );
}

#[test]
fn duplicate_enum_member() {
    assert_eq!(
        errors("enum E { A, B, A }"),
        vec!["[line 1] Error at 'A': Duplicate enum member 'A'."]
    );
}

#[test]
fn own_initializer() {
    assert_eq!(
        errors("{ var a = 1; { var a = a; } }"),
        vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
    );
}

#[test]
fn redeclared_local() {
    assert_eq!(
        errors("{ var a = 1; var a = 2; }"),
        vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
    );
}

#[test]
fn error_at_end() {
    assert_eq!(
        errors("print 1"),
        vec!["[line 1] Error at end: Expect ';' after value."]
    );
}

#[test]
fn recovers_after_error() {
    let errs = errors("print ;\nprint 1\nconst x = ;");
    assert_eq!(
        errs,
        vec![
            "[line 1] Error at ';': Expect expression.",
            "[line 3] Error at 'const': Expect ';' after value.",
        ]
    );
}

#[test]
fn identical_messages_reported_once() {
    let errs = errors("print ;\nprint ;");
    assert_eq!(errs, vec!["[line 1] Error at ';': Expect expression."]);
}

#[test]
fn scanner_errors_have_no_location() {
    assert_eq!(
        errors("print $;"),
        vec!["[line 1] Error: Unexpected character."]
    );
}
