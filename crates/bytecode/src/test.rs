use expect_test::expect;
use pretty_assertions::assert_eq;

use crate::disasm::Disassembly;
use crate::{Chunk, Constant, Function, Op, Operand};

#[test]
fn test_opcode_round_trip_through_byte() {
    for op in Op::variants() {
        assert_eq!(Op::from_ordinal(op.ordinal()), Some(op));
    }
}

#[test]
fn test_operand_layout() {
    assert_eq!(Op::Return.operand(), Operand::None);
    assert_eq!(Op::GetLocal.operand(), Operand::Byte);
    assert_eq!(Op::Constant.operand(), Operand::Const);
    assert_eq!(Op::JumpIfFalse.operand(), Operand::Jump);
    assert_eq!(Op::Loop.operand(), Operand::Loop);
    assert_eq!(Op::Closure.operand_name(), Some("function"));
    assert_eq!(Op::Add.operand_name(), None);
}

#[test]
fn test_u16_operands_are_big_endian() {
    let mut chunk: Chunk = Chunk::new();
    chunk.write_op(Op::Jump, 3);
    chunk.write_u16(0x1234, 3);
    assert_eq!(&chunk.code()[1..], &[0x12, 0x34]);
    assert_eq!(chunk.lines(), &[3, 3, 3]);

    chunk.patch_u16(1, 0xbeef);
    assert_eq!(chunk.read_u16(1), 0xbeef);
}

#[test]
fn test_constants_are_not_deduplicated() {
    let mut chunk: Chunk = Chunk::new();
    let a = chunk.add_constant(Constant::Number(1.0));
    let b = chunk.add_constant(Constant::Number(1.0));
    assert_ne!(a, b);
}

#[test]
fn test_disassembly() {
    let mut func = Function::new(None);
    let chunk = &mut func.chunk;
    let idx = chunk.add_constant(Constant::Number(1.5));
    chunk.write_op(Op::Constant, 1);
    chunk.write_u16(idx as u16, 1);
    chunk.write_op(Op::Print, 1);
    chunk.write_op(Op::Nil, 2);
    chunk.write_op(Op::Return, 2);

    let actual = Disassembly(&func).to_string();
    expect![[r#"
        == <script> ==
        0000    1 Constant            0 '1.5'
        0003    | Print
        0004    2 Nil
        0005    | Return
    "#]]
    .assert_eq(&actual);
}
