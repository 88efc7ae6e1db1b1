use std::borrow::Cow;

use fnv::FnvHashSet;
use mal_bytecode::disasm::Disassembly;
use mal_bytecode::{Constant, Function, Op};
use mal_syn::{Scanner, Token, TokenKind};
use smol_str::SmolStr;
use vec1::Vec1;

use crate::error::{CodegenError, CompileError, CompileErrors, ErrorLocation};
use crate::func::FunctionCompileCtx;
use crate::rules::{rule, Precedence};
use crate::scope::{hidden, FunctionKind, ScopeVariable, UpvalueCapture, LAMBDA_NAME};

/// Single pass compiler: parses tokens and emits bytecode for them right
/// away.
///
/// One [`FunctionCompileCtx`] is kept per function body being compiled; the
/// innermost body is the last one.
pub(crate) struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    panic_mode: bool,
    errors: Vec<CompileError>,
    contexts: Vec1<FunctionCompileCtx<'src>>,
}

/// What kind of variable access to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Get,
    Set,
    Inc,
    Dec,
}

impl<'src> Compiler<'src> {
    pub fn new(source: &'src str) -> Self {
        let eof = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        Compiler {
            scanner: Scanner::new(source),
            current: eof,
            previous: eof,
            panic_mode: false,
            errors: Vec::new(),
            contexts: Vec1::new(FunctionCompileCtx::new(FunctionKind::Script, None)),
        }
    }

    /// Compiles the whole source as a script.
    pub fn compile(mut self) -> Result<Function, CompileErrors> {
        self.advance();
        while !self.matches(TokenKind::Eof) {
            self.declaration();
        }
        let line = self.previous.line;
        self.ctx().emit_return(line);

        if !self.errors.is_empty() {
            return Err(CompileErrors {
                errors: self.errors,
            });
        }
        let (script, _) = self.contexts.split_off_first();
        let script = script.finish();
        tracing::trace!("{}", Disassembly(&script));
        Ok(script)
    }

    // ---- tokens ----

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_owned();
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &'static str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    // ---- errors ----

    fn error_at(&mut self, token: Token<'src>, message: impl Into<Cow<'static, str>>) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let message = message.into();
        if self.errors.iter().any(|e| e.message == message) {
            return;
        }
        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::End,
            TokenKind::Error => ErrorLocation::Scanner,
            _ => ErrorLocation::Token(token.lexeme.to_owned()),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message,
        });
    }

    fn error(&mut self, message: impl Into<Cow<'static, str>>) {
        self.error_at(self.previous, message)
    }

    fn error_at_current(&mut self, message: impl Into<Cow<'static, str>>) {
        self.error_at(self.current, message)
    }

    fn report(&mut self, result: Result<(), CodegenError>) {
        if let Err(e) = result {
            self.error(e.to_string())
        }
    }

    /// Skips tokens until a likely statement boundary.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon || self.current.kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    // ---- emission ----

    fn ctx(&mut self) -> &mut FunctionCompileCtx<'src> {
        self.contexts.last_mut()
    }

    fn emit(&mut self, op: Op) {
        let line = self.previous.line;
        self.ctx().emit(op, line)
    }

    fn emit_p8(&mut self, op: Op, param: u8) {
        let line = self.previous.line;
        self.ctx().emit_p8(op, param, line)
    }

    fn emit_p16(&mut self, op: Op, param: u16) {
        let line = self.previous.line;
        self.ctx().emit_p16(op, param, line)
    }

    fn make_constant(&mut self, value: Constant) -> u16 {
        match self.ctx().add_constant(value) {
            Ok(idx) => idx,
            Err(e) => {
                self.error(e.to_string());
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Constant) {
        let idx = self.make_constant(value);
        self.emit_p16(Op::Constant, idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u16 {
        self.make_constant(Constant::String(name.into()))
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        let line = self.previous.line;
        self.ctx().emit_jump(op, line)
    }

    fn patch_jump(&mut self, at: usize) {
        let result = self.ctx().patch_jump(at);
        self.report(result);
    }

    fn emit_loop(&mut self, start: usize) {
        let line = self.previous.line;
        let result = self.ctx().emit_loop(start, line);
        self.report(result);
    }

    // ---- scopes and variables ----

    fn begin_scope(&mut self) {
        self.ctx().scope.begin_scope();
    }

    fn end_scope(&mut self) {
        let line = self.previous.line;
        let ctx = self.ctx();
        for captured in ctx.scope.end_scope() {
            ctx.emit(if captured { Op::CloseUpvalue } else { Op::Pop }, line);
        }
    }

    fn is_global_scope(&self) -> bool {
        self.contexts.last().scope.depth() == 0
    }

    /// Declares `name` as a local of the current scope. Globals are not
    /// declared, they are defined at runtime.
    fn declare_local(&mut self, name: &'src str, is_const: bool) {
        if self.is_global_scope() {
            return;
        }
        let result = self.ctx().scope.declare(name, is_const);
        self.report(result);
    }

    /// Declares and immediately initializes a local holding the value on top
    /// of the stack.
    fn add_local(&mut self, name: &'src str) -> u8 {
        self.declare_local(name, false);
        self.ctx().scope.mark_initialized();
        self.ctx().scope.last_slot()
    }

    /// Consumes a variable name and declares it. Returns the name constant
    /// for globals.
    fn parse_variable(&mut self, message: &'static str, is_const: bool) -> u16 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme;
        self.declare_local(name, is_const);
        if self.is_global_scope() {
            self.identifier_constant(name)
        } else {
            0
        }
    }

    fn define_variable(&mut self, global: u16) {
        if self.is_global_scope() {
            self.emit_p16(Op::DefineGlobal, global);
        } else {
            self.ctx().scope.mark_initialized();
        }
    }

    fn resolve_local(&mut self, level: usize, name: &str) -> Option<(u8, bool)> {
        let local = self.contexts[level].scope.resolve_local(name)?;
        if !local.is_initialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some((local.slot, local.is_const))
    }

    /// Finds `name` in the functions enclosing the one at `level`, adding an
    /// upvalue to every function in between.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<(u8, bool)> {
        if level == 0 {
            return None;
        }
        let (index, is_local, is_const) = match self.resolve_local(level - 1, name) {
            Some((slot, is_const)) => {
                self.contexts[level - 1]
                    .scope
                    .set_captured_local_variable(slot);
                (slot, true, is_const)
            }
            None => {
                let (index, is_const) = self.resolve_upvalue(level - 1, name)?;
                (index, false, is_const)
            }
        };
        let capture = UpvalueCapture {
            is_local,
            index,
            is_const,
        };
        match self.contexts[level].scope.add_upvalue(capture) {
            Ok(slot) => Some((slot, is_const)),
            Err(e) => {
                self.error(e.to_string());
                Some((0, is_const))
            }
        }
    }

    fn resolve_variable(&mut self, name: &str) -> (ScopeVariable, bool) {
        let level = self.contexts.len() - 1;
        if let Some((slot, is_const)) = self.resolve_local(level, name) {
            return (ScopeVariable::Local(slot), is_const);
        }
        if let Some((slot, is_const)) = self.resolve_upvalue(level, name) {
            return (ScopeVariable::Upvalue(slot), is_const);
        }
        // Every global is constant
        (ScopeVariable::Global(self.identifier_constant(name)), true)
    }

    fn emit_access(&mut self, access: Access, var: ScopeVariable) {
        match (access, var) {
            (Access::Get, ScopeVariable::Local(s)) => self.emit_p8(Op::GetLocal, s),
            (Access::Set, ScopeVariable::Local(s)) => self.emit_p8(Op::SetLocal, s),
            (Access::Inc, ScopeVariable::Local(s)) => self.emit_p8(Op::IncLocal, s),
            (Access::Dec, ScopeVariable::Local(s)) => self.emit_p8(Op::DecLocal, s),
            (Access::Get, ScopeVariable::Upvalue(s)) => self.emit_p8(Op::GetUpvalue, s),
            (Access::Set, ScopeVariable::Upvalue(s)) => self.emit_p8(Op::SetUpvalue, s),
            (Access::Inc, ScopeVariable::Upvalue(s)) => self.emit_p8(Op::IncUpvalue, s),
            (Access::Dec, ScopeVariable::Upvalue(s)) => self.emit_p8(Op::DecUpvalue, s),
            (Access::Get, ScopeVariable::Global(c)) => self.emit_p16(Op::GetGlobal, c),
            // Writes to globals are rejected before getting here.
            (_, ScopeVariable::Global(_)) => {}
        }
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let (var, is_const) = self.resolve_variable(name);

        let kind = self.current.kind;
        let writes = match kind {
            TokenKind::PlusPlus | TokenKind::MinusMinus => true,
            TokenKind::Equal | TokenKind::PlusEqual | TokenKind::MinusEqual => can_assign,
            _ => false,
        };
        if !writes {
            self.emit_access(Access::Get, var);
            return;
        }
        if is_const {
            self.error_at_current(format!("Can't assign to constant '{}'.", name));
        }
        self.advance();
        match kind {
            TokenKind::PlusPlus => self.emit_access(Access::Inc, var),
            TokenKind::MinusMinus => self.emit_access(Access::Dec, var),
            TokenKind::Equal => {
                self.expression();
                self.emit_access(Access::Set, var);
            }
            _ => {
                self.emit_access(Access::Get, var);
                self.expression();
                self.emit(if kind == TokenKind::PlusEqual {
                    Op::Add
                } else {
                    Op::Subtract
                });
                self.emit_access(Access::Set, var);
            }
        }
    }

    // ---- expressions ----

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match rule(self.previous.kind).prefix {
            Some(prefix) => prefix,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign
            && matches!(
                self.current.kind,
                TokenKind::Equal | TokenKind::PlusEqual | TokenKind::MinusEqual
            )
        {
            self.advance();
            self.error("Invalid assignment target.");
        }
    }

    pub(crate) fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    pub(crate) fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Constant::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    pub(crate) fn string(&mut self, _can_assign: bool) {
        let token = self.previous;
        let content = match token.kind {
            TokenKind::RawString => SmolStr::new(token.string_content()),
            _ => unescape(token.string_content()),
        };
        self.emit_constant(Constant::String(content));
    }

    /// `"a %{x} b"` compiles to `"a " + str(x) + " b"`. The head segment is
    /// the previous token; the scanner hands out one more segment after each
    /// embedded expression.
    pub(crate) fn interpolation(&mut self, _can_assign: bool) {
        let head = unescape(self.previous.string_content());
        self.emit_constant(Constant::String(head));
        loop {
            self.expression();
            self.emit(Op::Stringify);
            self.emit(Op::Add);

            let more = self.matches(TokenKind::Interpolation);
            if !more {
                self.consume(TokenKind::String, "Expect end of string interpolation.");
            }
            let segment = unescape(self.previous.string_content());
            if !segment.is_empty() {
                self.emit_constant(Constant::String(segment));
                self.emit(Op::Add);
            }
            if !more {
                break;
            }
        }
    }

    pub(crate) fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit(Op::False),
            TokenKind::True => self.emit(Op::True),
            TokenKind::Nil => self.emit(Op::Nil),
            _ => unreachable!("literal rule registered for a non literal token"),
        }
    }

    pub(crate) fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    pub(crate) fn me(&mut self, _can_assign: bool) {
        if !self.contexts.iter().any(|c| c.kind.has_receiver()) {
            self.error("Can't use 'me' outside of a class.");
            return;
        }
        self.named_variable("me", false);
    }

    pub(crate) fn unary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit(Op::Negate),
            TokenKind::Bang => self.emit(Op::Not),
            _ => unreachable!("unary rule registered for a non unary token"),
        }
    }

    pub(crate) fn binary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        self.parse_precedence(rule(kind).precedence.next());
        match kind {
            TokenKind::BangEqual => {
                self.emit(Op::Equal);
                self.emit(Op::Not);
            }
            TokenKind::EqualEqual => self.emit(Op::Equal),
            TokenKind::Greater => self.emit(Op::Greater),
            TokenKind::GreaterEqual => {
                self.emit(Op::Less);
                self.emit(Op::Not);
            }
            TokenKind::Less => self.emit(Op::Less),
            TokenKind::LessEqual => {
                self.emit(Op::Greater);
                self.emit(Op::Not);
            }
            TokenKind::Plus => self.emit(Op::Add),
            TokenKind::Minus => self.emit(Op::Subtract),
            TokenKind::Star => self.emit(Op::Multiply),
            TokenKind::Slash => self.emit(Op::Divide),
            TokenKind::Percent => self.emit(Op::Modulo),
            TokenKind::DotDot => self.emit(Op::Range),
            _ => unreachable!("binary rule registered for a non binary token"),
        }
    }

    pub(crate) fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    pub(crate) fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(Op::JumpIfFalse);
        let end_jump = self.emit_jump(Op::Jump);
        self.patch_jump(else_jump);
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    pub(crate) fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_p8(Op::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc = 0usize;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc.min(255) as u8
    }

    pub(crate) fn list(&mut self, _can_assign: bool) {
        self.emit(Op::NewList);
        while !self.check(TokenKind::RightBracket) && !self.check(TokenKind::Eof) {
            self.expression();
            self.emit(Op::ListAdd);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list elements.");
    }

    pub(crate) fn table(&mut self, _can_assign: bool) {
        self.emit(Op::NewTable);
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.expression();
            self.consume(TokenKind::Colon, "Expect ':' after table key.");
            self.expression();
            self.emit(Op::TableAdd);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after table entries.");
    }

    /// `a[i]`, `a[i:j]` and the assignment forms of `a[i]`
    pub(crate) fn subscript(&mut self, can_assign: bool) {
        if self.matches(TokenKind::Colon) {
            self.emit(Op::Nil);
            self.slice_end();
            return;
        }
        self.expression();
        if self.matches(TokenKind::Colon) {
            self.slice_end();
            return;
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(Op::SetSubscript);
        } else if self.matches(TokenKind::PlusPlus) {
            self.emit(Op::IncSubscript);
        } else if self.matches(TokenKind::MinusMinus) {
            self.emit(Op::DecSubscript);
        } else if can_assign && self.matches(TokenKind::PlusEqual) {
            self.expression();
            self.emit(Op::AddSubscript);
        } else if can_assign && self.matches(TokenKind::MinusEqual) {
            self.expression();
            self.emit(Op::Negate);
            self.emit(Op::AddSubscript);
        } else {
            self.emit(Op::GetSubscript);
        }
    }

    fn slice_end(&mut self) {
        if self.check(TokenKind::RightBracket) {
            self.emit(Op::Nil);
        } else {
            self.expression();
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after slice.");
        self.emit(Op::Slice);
    }

    pub(crate) fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_p16(Op::SetProperty, name);
        } else if self.matches(TokenKind::PlusPlus) {
            self.emit_p16(Op::IncProperty, name);
        } else if self.matches(TokenKind::MinusMinus) {
            self.emit_p16(Op::DecProperty, name);
        } else if can_assign && self.matches(TokenKind::PlusEqual) {
            self.expression();
            self.emit_p16(Op::AddProperty, name);
        } else if can_assign && self.matches(TokenKind::MinusEqual) {
            self.expression();
            self.emit(Op::Negate);
            self.emit_p16(Op::AddProperty, name);
        } else {
            self.emit_p16(Op::GetProperty, name);
        }
    }

    pub(crate) fn lambda(&mut self, _can_assign: bool) {
        self.function(FunctionKind::Anonymous, SmolStr::new(LAMBDA_NAME));
    }

    /// `list where x => cond` becomes `filter(list, fn (x) => cond)`, and
    /// `select` likewise becomes `map`. The helper is looked up as a global
    /// when the expression runs.
    pub(crate) fn pipe(&mut self, _can_assign: bool) {
        let helper = match self.previous.kind {
            TokenKind::Where => "filter",
            _ => "map",
        };
        let helper = self.identifier_constant(helper);
        self.emit_p16(Op::GetGlobal, helper);
        self.emit(Op::Swap);

        self.contexts.push(FunctionCompileCtx::new(
            FunctionKind::Anonymous,
            Some(SmolStr::new(LAMBDA_NAME)),
        ));
        self.begin_scope();
        self.consume(TokenKind::Identifier, "Expect parameter name.");
        self.ctx().function.arity = 1;
        self.add_local(self.previous.lexeme);
        self.consume(TokenKind::Arrow, "Expect '=>' after parameter.");
        self.parse_precedence(Precedence::Pipe.next());
        self.emit(Op::Return);
        self.end_function();

        self.emit_p8(Op::Call, 2);
    }

    // ---- functions ----

    /// Compiles a parameter list and body into a new function, then emits the
    /// closure creation in the enclosing function.
    fn function(&mut self, kind: FunctionKind, name: SmolStr) {
        self.contexts.push(FunctionCompileCtx::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        self.parameters();

        if kind == FunctionKind::Anonymous && self.matches(TokenKind::Arrow) {
            self.expression();
            self.emit(Op::Return);
        } else {
            self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
            self.block();
        }
        self.end_function();
    }

    fn parameters(&mut self) {
        if self.matches(TokenKind::RightParen) {
            return;
        }
        loop {
            if self.ctx().function.arity == u8::MAX {
                self.error_at_current("Can't have more than 255 parameters.");
            } else {
                self.ctx().function.arity += 1;
            }
            self.parse_variable("Expect parameter name.", false);
            self.define_variable(0);
            let slot = self.ctx().scope.last_slot();

            if self.matches(TokenKind::Equal) {
                self.ctx().function.optionals += 1;
                self.default_value(slot);
            } else if self.ctx().function.optionals > 0 {
                self.error("Parameters with default values must come last.");
            }

            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
    }

    /// Function prologue replacing a `nil` argument with its default value.
    fn default_value(&mut self, slot: u8) {
        self.emit_p8(Op::GetLocal, slot);
        self.emit(Op::Nil);
        self.emit(Op::Equal);
        let skip = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        self.expression();
        self.emit_p8(Op::SetLocal, slot);
        self.emit(Op::Pop);
        let done = self.emit_jump(Op::Jump);
        self.patch_jump(skip);
        self.emit(Op::Pop);
        self.patch_jump(done);
    }

    fn end_function(&mut self) {
        let line = self.previous.line;
        self.ctx().emit_return(line);

        let ctx = self
            .contexts
            .pop()
            .expect("every nested function pushes its own context");
        let upvalues = ctx.scope.upvalues().to_vec();
        let function = ctx.finish();
        tracing::trace!("{}", Disassembly(&function));

        let idx = self.make_constant(Constant::Function(Box::new(function)));
        self.emit_p16(Op::Closure, idx);
        for upvalue in upvalues {
            let line = self.previous.line;
            let ctx = self.ctx();
            ctx.emit_byte(upvalue.is_local as u8, line);
            ctx.emit_byte(upvalue.index, line);
        }
    }

    // ---- declarations ----

    fn declaration(&mut self) {
        match self.current.kind {
            TokenKind::Class => {
                self.advance();
                self.class_declaration(false);
            }
            TokenKind::Mod => {
                self.advance();
                self.class_declaration(true);
            }
            TokenKind::Enum => {
                self.advance();
                self.enum_declaration();
            }
            TokenKind::Fn => {
                self.advance();
                self.fun_declaration();
            }
            TokenKind::Var => {
                self.advance();
                self.var_declaration(false);
            }
            TokenKind::Const => {
                self.advance();
                self.var_declaration(true);
            }
            _ => self.statement(),
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self, is_const: bool) {
        if !is_const && self.is_global_scope() {
            self.error_at_current("Global variables must be marked 'const'");
        }
        let global = self.parse_variable("Expect variable name.", is_const);

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.error("All variables must be initialised.");
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.", true);
        // A local function may refer to itself
        self.ctx().scope.mark_initialized();
        let name = SmolStr::new(self.previous.lexeme);
        self.function(FunctionKind::Function, name);
        self.define_variable(global);
    }

    /// `class Name { fn m() {...} ... }`, or `mod Name { ... }` when
    /// `is_module` is set.
    fn class_declaration(&mut self, is_module: bool) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name = self.previous.lexeme;
        let name_constant = self.identifier_constant(name);
        self.declare_local(name, true);

        let op = if is_module { Op::Module } else { Op::Class };
        self.emit_p16(op, name_constant);
        self.define_variable(name_constant);

        self.named_variable(name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method(is_module);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(Op::Pop);
    }

    fn method(&mut self, is_module: bool) {
        self.consume(TokenKind::Fn, "Expect 'fn' before method.");
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name);

        let kind = if is_module {
            FunctionKind::Function
        } else if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind, SmolStr::new(name));
        self.emit_p16(Op::Method, constant);
    }

    /// `enum Name { A, B = 10, C }`
    fn enum_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect enum name.");
        let name = self.previous.lexeme;
        let name_constant = self.identifier_constant(name);
        self.declare_local(name, true);
        self.emit_p16(Op::Enum, name_constant);

        self.consume(TokenKind::LeftBrace, "Expect '{' before enum body.");
        let mut members = FnvHashSet::default();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.consume(TokenKind::Identifier, "Expect enum member name.");
            let member = self.previous.lexeme;
            if !members.insert(member) {
                self.error(format!("Duplicate enum member '{}'.", member));
            }
            let member = self.identifier_constant(member);

            if self.matches(TokenKind::Equal) {
                self.expression();
                self.emit_p16(Op::EnumFieldValue, member);
            } else {
                self.emit_p16(Op::EnumField, member);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after enum body.");
        self.define_variable(name_constant);
    }

    // ---- statements ----

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Loop) {
            self.loop_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(Op::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(Op::Pop);
    }

    fn return_statement(&mut self) {
        let kind = self.contexts.last().kind;
        if kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            let line = self.previous.line;
            self.ctx().emit_return(line);
            return;
        }
        if kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit(Op::Return);
    }

    fn if_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Then, "Expect 'then' after condition.");

        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        self.statement();
        let else_jump = self.emit_jump(Op::Jump);

        self.patch_jump(then_jump);
        self.emit(Op::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.ctx().offset();
        self.expression();
        self.consume(TokenKind::Do, "Expect 'do' after condition.");

        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);
    }

    /// `for x in seq do body`, lowered to an index loop over `seq`:
    ///
    /// ```text
    /// { var @seq = seq; var @index = 0;
    ///   while @index < len(@seq) do { var x = item(@seq, @index); body } @index++; }
    /// ```
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::Identifier, "Expect loop variable name after 'for'.");
        let var_name = self.previous.lexeme;
        self.consume(TokenKind::In, "Expect 'in' after loop variable.");

        self.expression();
        let sequence = self.add_local(hidden::SEQUENCE);
        self.emit_constant(Constant::Number(0.0));
        let index = self.add_local(hidden::INDEX);
        self.consume(TokenKind::Do, "Expect 'do' after loop sequence.");

        let loop_start = self.ctx().offset();
        self.emit_p8(Op::GetLocal, index);
        self.emit_p8(Op::GetLocal, sequence);
        self.emit(Op::Length);
        self.emit(Op::Less);
        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);

        self.begin_scope();
        self.emit_p8(Op::GetLocal, sequence);
        self.emit_p8(Op::GetLocal, index);
        self.emit(Op::IterItem);
        self.add_local(var_name);
        self.statement();
        self.end_scope();

        self.emit_p8(Op::IncLocal, index);
        self.emit(Op::Pop);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);
        self.end_scope();
    }

    /// `loop n times body`. `n` is evaluated once; the body sees the counter
    /// as `i`, running from 0 to n - 1.
    fn loop_statement(&mut self) {
        self.begin_scope();
        self.expression();
        let count = self.add_local(hidden::COUNT);
        self.consume(TokenKind::Times, "Expect 'times' after loop count.");

        self.emit_constant(Constant::Number(0.0));
        let counter = self.add_local("i");

        let loop_start = self.ctx().offset();
        self.emit_p8(Op::GetLocal, counter);
        self.emit_p8(Op::GetLocal, count);
        self.emit(Op::Less);
        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);

        self.statement();

        self.emit_p8(Op::IncLocal, counter);
        self.emit(Op::Pop);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);
        self.end_scope();
    }
}

/// Processes the escape sequences of a string literal. Unknown escapes keep
/// their backslash.
fn unescape(raw: &str) -> SmolStr {
    if !raw.contains('\\') {
        return SmolStr::new(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    SmolStr::new(out)
}
