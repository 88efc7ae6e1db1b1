mod chunk;
pub mod disasm;
pub mod inst;

#[cfg(test)]
mod test;

use std::fmt::Display;

use smol_str::SmolStr;

pub use chunk::Chunk;
pub use inst::{Op, Operand};

/// A compiled function body, before it is loaded into a VM heap.
#[derive(Debug)]
pub struct Function {
    /// `None` for the top-level script
    pub name: Option<SmolStr>,
    pub arity: u8,
    /// How many of the trailing parameters may be omitted by the caller
    pub optionals: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl Function {
    pub fn new(name: Option<SmolStr>) -> Self {
        Function {
            name,
            arity: 0,
            optionals: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
        }
    }

    /// Name used in diagnostics
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<script>")
    }
}

/// Compile-time constants. String constants have their escapes already
/// processed.
#[derive(Debug)]
pub enum Constant {
    Number(f64),
    String(SmolStr),
    Function(Box<Function>),
}

impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Number(n) => write!(f, "{}", n),
            Constant::String(s) => write!(f, "{:?}", s.as_str()),
            Constant::Function(func) => match &func.name {
                Some(name) => write!(f, "<fn {}>", name),
                None => f.write_str("<script>"),
            },
        }
    }
}
