use std::fmt::{self, Display, Formatter};

use mal_codegen::CompileErrors;
use thiserror::Error;

/// One line of a runtime stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the top-level script
    pub function: Option<String>,
}

impl Display for TraceFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// An error raised while executing bytecode. Aborts the whole
/// [`interpret`](crate::Vm::interpret) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    /// Innermost frame first
    pub trace: Vec<TraceFrame>,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for frame in &self.trace {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("{0}")]
    Compile(#[from] CompileErrors),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

impl InterpretError {
    /// Process exit code a script runner reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }
}

/// Outcome of [`Vm::interpret`](crate::Vm::interpret) without the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl<T> From<&Result<T, InterpretError>> for InterpretResult {
    fn from(result: &Result<T, InterpretError>) -> Self {
        match result {
            Ok(_) => InterpretResult::Ok,
            Err(InterpretError::Compile(_)) => InterpretResult::CompileError,
            Err(InterpretError::Runtime(_)) => InterpretResult::RuntimeError,
        }
    }
}
