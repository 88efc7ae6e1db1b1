use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use thiserror::Error;

/// Where in the source a [`CompileError`] was reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// At a token, whose lexeme is kept
    Token(String),
    /// At the end of input
    End,
    /// Reported by the scanner, which has no meaningful lexeme
    Scanner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub location: ErrorLocation,
    pub message: Cow<'static, str>,
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            ErrorLocation::Token(lexeme) => write!(f, " at '{}'", lexeme)?,
            ErrorLocation::End => f.write_str(" at end")?,
            ErrorLocation::Scanner => {}
        }
        write!(f, ": {}", self.message)
    }
}

/// Every error reported while compiling one source, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileErrors {
    pub errors: Vec<CompileError>,
}

impl CompileErrors {
    /// Messages only, without location. Handy for tests.
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_ref()).collect()
    }
}

impl Display for CompileErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.iter().format("\n"))
    }
}

impl std::error::Error for CompileErrors {}

/// Limits and scoping rules violated while emitting code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    #[error("Too much code to jump over.")]
    JumpTooLarge,
    #[error("Loop body too large.")]
    LoopTooLarge,
    #[error("Too many local variables in function.")]
    TooManyLocals,
    #[error("Too many closure variables in function.")]
    TooManyUpvalues,
    #[error("Already a variable with this name in this scope.")]
    AlreadyDeclared,
}
