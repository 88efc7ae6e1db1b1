use mal_bytecode::{Constant, Function, Op};
use smol_str::SmolStr;

use crate::error::CodegenError;
use crate::scope::{FunctionKind, ScopeBuilder};

/// The context used when building a function
#[derive(Debug)]
pub struct FunctionCompileCtx<'src> {
    pub function: Function,
    pub kind: FunctionKind,
    pub scope: ScopeBuilder<'src>,
}

impl<'src> FunctionCompileCtx<'src> {
    pub fn new(kind: FunctionKind, name: Option<SmolStr>) -> Self {
        FunctionCompileCtx {
            function: Function::new(name),
            kind,
            scope: ScopeBuilder::new(kind),
        }
    }

    /// Current end of the code, i.e. the offset of the next emitted byte
    pub fn offset(&self) -> usize {
        self.function.chunk.len()
    }

    pub fn emit(&mut self, op: Op, line: u32) {
        self.function.chunk.write_op(op, line)
    }

    pub fn emit_byte(&mut self, byte: u8, line: u32) {
        self.function.chunk.write(byte, line)
    }

    pub fn emit_p8(&mut self, op: Op, param: u8, line: u32) {
        self.emit(op, line);
        self.emit_byte(param, line);
    }

    pub fn emit_p16(&mut self, op: Op, param: u16, line: u32) {
        self.emit(op, line);
        self.function.chunk.write_u16(param, line);
    }

    pub fn add_constant(&mut self, value: Constant) -> Result<u16, CodegenError> {
        let idx = self.function.chunk.add_constant(value);
        u16::try_from(idx).map_err(|_| CodegenError::TooManyConstants)
    }

    /// Emits a jump with a placeholder distance. Returns the offset of the
    /// operand, to be handed to [`Self::patch_jump`].
    pub fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        self.emit_p16(op, u16::MAX, line);
        self.offset() - 2
    }

    /// Points the jump whose operand is at `at` to the current end of code.
    pub fn patch_jump(&mut self, at: usize) -> Result<(), CodegenError> {
        let distance = self.offset() - at - 2;
        let distance = u16::try_from(distance).map_err(|_| CodegenError::JumpTooLarge)?;
        self.function.chunk.patch_u16(at, distance);
        Ok(())
    }

    /// Emits a backward jump to `start`.
    pub fn emit_loop(&mut self, start: usize, line: u32) -> Result<(), CodegenError> {
        self.emit(Op::Loop, line);
        let distance = self.offset() - start + 2;
        let distance = u16::try_from(distance).map_err(|_| CodegenError::LoopTooLarge)?;
        self.function.chunk.write_u16(distance, line);
        Ok(())
    }

    /// The return emitted when control reaches the end of the body
    pub fn emit_return(&mut self, line: u32) {
        if self.kind == FunctionKind::Initializer {
            self.emit_p8(Op::GetLocal, 0, line);
        } else {
            self.emit(Op::Nil, line);
        }
        self.emit(Op::Return, line);
    }

    pub fn finish(mut self) -> Function {
        self.function.upvalue_count = self.scope.upvalues().len();
        self.function
    }
}
