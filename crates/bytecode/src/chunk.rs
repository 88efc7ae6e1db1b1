use bytes::{Buf, BufMut};

use crate::{Constant, Op};

/// Bytecode of one function body.
///
/// `lines` runs parallel to `code`, one entry per byte. The constant pool is
/// generic so that the VM can keep the same layout after loading constants
/// into its own value type.
#[derive(Debug, Clone)]
pub struct Chunk<C = Constant> {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<C>,
}

impl<C> Default for Chunk<C> {
    fn default() -> Self {
        Chunk {
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
        }
    }
}

impl<C> Chunk<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.put_u8(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: Op, line: u32) {
        self.write(op.ordinal(), line)
    }

    /// Writes a big-endian 16-bit operand
    pub fn write_u16(&mut self, value: u16, line: u32) {
        self.code.put_u16(value);
        self.lines.extend([line, line]);
    }

    /// Overwrites a previously written 16-bit operand
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.code[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.code[offset]
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        (&self.code[offset..]).get_u16()
    }

    /// Adds a constant and returns its index. No deduplication is done.
    pub fn add_constant(&mut self, value: C) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn constants(&self) -> &[C] {
        &self.constants
    }

    pub fn constant(&self, idx: usize) -> &C {
        &self.constants[idx]
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Rebuilds the chunk with every constant converted by `f`, keeping the
    /// code and line table.
    pub fn map_constants<D>(self, f: impl FnMut(C) -> D) -> Chunk<D> {
        Chunk {
            code: self.code,
            lines: self.lines,
            constants: self.constants.into_iter().map(f).collect(),
        }
    }

    /// Approximate heap footprint, used for GC accounting
    pub fn heap_size(&self) -> usize {
        self.code.capacity()
            + self.lines.capacity() * std::mem::size_of::<u32>()
            + self.constants.capacity() * std::mem::size_of::<C>()
    }
}
