//! Single pass compiler from source text to [`mal_bytecode::Function`]
//! prototypes.

mod compiler;
pub mod error;
mod func;
mod rules;
mod scope;

#[cfg(test)]
mod test;

use mal_bytecode::Function;

pub use error::{CompileError, CompileErrors, ErrorLocation};

/// Compiles `source` into the prototype of its top-level script. `name`
/// identifies the source in logs.
///
/// Every error found is reported, not only the first one.
pub fn compile(source: &str, name: &str) -> Result<Function, CompileErrors> {
    let _span = tracing::debug_span!("compile", name).entered();
    let result = compiler::Compiler::new(source).compile();
    if let Err(errors) = &result {
        tracing::debug!(count = errors.errors.len(), "compile failed");
    }
    result
}
