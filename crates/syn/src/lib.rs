//! Lexical analysis for the `mal` language.
//!
//! The [`Scanner`] hands out one [`Token`] per call. Regular tokens and keywords
//! come from a [`logos`] generated automaton; string literals (with their escape,
//! raw and interpolation modes) are scanned by hand on top of it.

mod scanner;
mod token;

#[cfg(test)]
mod test;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
