//! Human readable listings of compiled functions.

use std::fmt::{self, Display, Formatter};

use crate::{Chunk, Constant, Function, Op, Operand};

/// Displays a function's bytecode, followed by the listings of every function
/// nested in its constant pool.
pub struct Disassembly<'a>(pub &'a Function);

impl Display for Disassembly<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let func = self.0;
        writeln!(f, "== {} ==", func.display_name())?;
        let mut offset = 0;
        while offset < func.chunk.len() {
            offset = write_instruction(f, &func.chunk, offset)?;
        }
        for constant in func.chunk.constants() {
            if let Constant::Function(inner) = constant {
                writeln!(f)?;
                Disassembly(inner).fmt(f)?;
            }
        }
        Ok(())
    }
}

/// Writes the instruction at `offset` as one or more lines, returning the
/// offset of the next instruction.
pub fn write_instruction(
    f: &mut impl fmt::Write,
    chunk: &Chunk,
    offset: usize,
) -> Result<usize, fmt::Error> {
    write!(f, "{:04} ", offset)?;
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        f.write_str("   | ")?;
    } else {
        write!(f, "{:4} ", line)?;
    }

    let byte = chunk.read_u8(offset);
    let op = match Op::from_ordinal(byte) {
        Some(op) => op,
        None => {
            writeln!(f, "<unknown opcode {}>", byte)?;
            return Ok(offset + 1);
        }
    };

    let operand_at = offset + 1;
    let next = operand_at + op.operand().width();
    match op.operand() {
        Operand::None => writeln!(f, "{}", op)?,
        Operand::Byte => writeln!(f, "{:<16} {:4}", op, chunk.read_u8(operand_at))?,
        Operand::Const => {
            let idx = chunk.read_u16(operand_at) as usize;
            writeln!(f, "{:<16} {:4} '{}'", op, idx, chunk.constant(idx))?
        }
        Operand::Jump => {
            let distance = chunk.read_u16(operand_at) as usize;
            writeln!(f, "{:<16} {:4} -> {}", op, offset, next + distance)?
        }
        Operand::Loop => {
            let distance = chunk.read_u16(operand_at) as usize;
            writeln!(f, "{:<16} {:4} -> {}", op, offset, next.saturating_sub(distance))?
        }
        Operand::Closure => {
            let idx = chunk.read_u16(operand_at) as usize;
            let constant = chunk.constant(idx);
            writeln!(f, "{:<16} {:4} {}", op, idx, constant)?;
            let upvalues = match constant {
                Constant::Function(func) => func.upvalue_count,
                _ => 0,
            };
            let mut at = next;
            for _ in 0..upvalues {
                let is_local = chunk.read_u8(at) != 0;
                let index = chunk.read_u8(at + 1);
                writeln!(
                    f,
                    "{:04}    |                     {} {}",
                    at,
                    if is_local { "local" } else { "upvalue" },
                    index
                )?;
                at += 2;
            }
            return Ok(at);
        }
    }
    Ok(next)
}
