use crate::error::CodegenError;

/// Most locals a single function can hold; slots are addressed by one byte.
pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// The top-level code of a source
    Script,
    Function,
    /// A function inside a class body. Slot 0 holds the receiver, `me`.
    Method,
    /// The `init` method of a class. Returns the receiver implicitly.
    Initializer,
    /// A function expression, including the lambdas of `where` and `select`
    Anonymous,
}

impl FunctionKind {
    pub fn has_receiver(self) -> bool {
        matches!(self, FunctionKind::Method | FunctionKind::Initializer)
    }
}

/// How a resolved name is accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeVariable {
    /// A local variable at the given stack slot
    Local(u8),
    /// An upvalue at the given slot of the current closure
    Upvalue(u8),
    /// A global named by the given constant
    Global(u16),
}

#[derive(Debug)]
pub struct Local<'src> {
    pub name: &'src str,
    /// `None` between the declaration and the end of the initializer
    pub depth: Option<u32>,
    pub is_captured: bool,
    pub is_const: bool,
}

/// One entry of a closure's upvalue list, as emitted after `Closure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueCapture {
    /// `true` if this captures a local of the directly enclosing function,
    /// `false` if it copies one of that function's own upvalues
    pub is_local: bool,
    pub index: u8,
    pub is_const: bool,
}

/// A local found by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLocal {
    pub slot: u8,
    pub is_const: bool,
    pub is_initialized: bool,
}

/// Locals and upvalues of one function being compiled.
#[derive(Debug)]
pub struct ScopeBuilder<'src> {
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueCapture>,
    depth: u32,
}

impl<'src> ScopeBuilder<'src> {
    pub fn new(kind: FunctionKind) -> Self {
        // Slot 0 holds the callee, or the receiver for methods. Only the
        // receiver can be named.
        let reserved = Local {
            name: if kind.has_receiver() { "me" } else { "" },
            depth: Some(0),
            is_captured: false,
            is_const: true,
        };
        ScopeBuilder {
            locals: vec![reserved],
            upvalues: Vec::new(),
            depth: 0,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn upvalues(&self) -> &[UpvalueCapture] {
        &self.upvalues
    }

    /// Slot of the most recently declared local
    pub fn last_slot(&self) -> u8 {
        (self.locals.len() - 1) as u8
    }

    pub fn begin_scope(&mut self) {
        self.depth += 1;
    }

    /// Leaves the innermost scope, returning for each local that goes out of
    /// scope (innermost first) whether it was captured by a closure.
    pub fn end_scope(&mut self) -> Vec<bool> {
        self.depth -= 1;
        let mut popped = Vec::new();
        while let Some(local) = self.locals.last() {
            match local.depth {
                Some(d) if d <= self.depth => break,
                _ => {}
            }
            popped.push(local.is_captured);
            self.locals.pop();
        }
        popped
    }

    /// Declares a local in the innermost scope. It stays uninitialized until
    /// [`Self::mark_initialized`] is called.
    pub fn declare(&mut self, name: &'src str, is_const: bool) -> Result<(), CodegenError> {
        let duplicate = self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.map_or(true, |d| d >= self.depth))
            .any(|l| l.name == name);
        if duplicate {
            return Err(CodegenError::AlreadyDeclared);
        }
        if self.locals.len() >= MAX_LOCALS {
            return Err(CodegenError::TooManyLocals);
        }
        self.locals.push(Local {
            name,
            depth: None,
            is_captured: false,
            is_const,
        });
        Ok(())
    }

    pub fn mark_initialized(&mut self) {
        if self.depth == 0 {
            return;
        }
        let depth = self.depth;
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    pub fn resolve_local(&self, name: &str) -> Option<ResolvedLocal> {
        self.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| !l.name.is_empty() && l.name == name)
            .map(|(slot, l)| ResolvedLocal {
                slot: slot as u8,
                is_const: l.is_const,
                is_initialized: l.depth.is_some(),
            })
    }

    pub fn set_captured_local_variable(&mut self, slot: u8) {
        self.locals[slot as usize].is_captured = true;
    }

    /// Registers an upvalue, reusing an existing entry for the same source.
    pub fn add_upvalue(&mut self, capture: UpvalueCapture) -> Result<u8, CodegenError> {
        if let Some(idx) = self
            .upvalues
            .iter()
            .position(|u| u.is_local == capture.is_local && u.index == capture.index)
        {
            return Ok(idx as u8);
        }
        if self.upvalues.len() >= MAX_UPVALUES {
            return Err(CodegenError::TooManyUpvalues);
        }
        self.upvalues.push(capture);
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Names the compiler declares for its own bookkeeping. They contain `@`,
/// which the scanner never puts in an identifier.
pub mod hidden {
    pub const SEQUENCE: &str = "@seq";
    pub const INDEX: &str = "@index";
    pub const COUNT: &str = "@count";
}

/// Name given to function expressions
pub const LAMBDA_NAME: &str = "lambda";
