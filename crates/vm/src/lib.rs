//! Runtime of the language: values, the garbage collected heap and the
//! bytecode interpreter.

pub mod config;
pub mod error;
pub mod gc;
pub mod native;
pub mod object;
pub mod table;
pub mod value;
pub mod vm;

#[cfg(test)]
mod test;

pub use config::VmOptions;
pub use error::{InterpretError, InterpretResult, RuntimeError, TraceFrame};
pub use gc::{CollectStats, Heap, ObjRef};
pub use value::Value;
pub use vm::Vm;
