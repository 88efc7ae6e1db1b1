//! Operator precedence table for the Pratt parser.

use mal_syn::TokenKind;

use crate::compiler::Compiler;

/// Binding strength of infix operators, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    /// `=` `+=` `-=`
    Assignment,
    /// `where` `select`
    Pipe,
    Or,
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `..`
    Range,
    /// `+` `-`
    Term,
    /// `*` `/` `%`
    Factor,
    /// `!` `-`
    Unary,
    /// `.` `()` `[]`
    Call,
    Primary,
}

impl Precedence {
    /// The next stronger level. Parsing the right operand at this level makes
    /// binary operators left associative.
    pub fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Pipe,
            Pipe => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Range,
            Range => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

/// A parse handler. The flag tells whether an assignment may follow.
pub type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

pub struct ParseRule<'src> {
    pub prefix: Option<ParseFn<'src>>,
    pub infix: Option<ParseFn<'src>>,
    pub precedence: Precedence,
}

impl<'src> ParseRule<'src> {
    fn new(
        prefix: Option<ParseFn<'src>>,
        infix: Option<ParseFn<'src>>,
        precedence: Precedence,
    ) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

/// The parse rule of a token kind.
pub fn rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use Precedence as P;
    use TokenKind::*;

    let binary: ParseFn<'src> = Compiler::binary;
    match kind {
        LeftParen => ParseRule::new(Some(Compiler::grouping), Some(Compiler::call), P::Call),
        LeftBracket => ParseRule::new(Some(Compiler::list), Some(Compiler::subscript), P::Call),
        LeftBrace => ParseRule::new(Some(Compiler::table), None, P::None),
        Dot => ParseRule::new(None, Some(Compiler::dot), P::Call),
        DotDot => ParseRule::new(None, Some(binary), P::Range),
        Minus => ParseRule::new(Some(Compiler::unary), Some(binary), P::Term),
        Plus => ParseRule::new(None, Some(binary), P::Term),
        Slash | Star | Percent => ParseRule::new(None, Some(binary), P::Factor),
        Bang => ParseRule::new(Some(Compiler::unary), None, P::None),
        BangEqual | EqualEqual => ParseRule::new(None, Some(binary), P::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            ParseRule::new(None, Some(binary), P::Comparison)
        }
        Identifier => ParseRule::new(Some(Compiler::variable), None, P::None),
        String | RawString => ParseRule::new(Some(Compiler::string), None, P::None),
        Interpolation => ParseRule::new(Some(Compiler::interpolation), None, P::None),
        Number => ParseRule::new(Some(Compiler::number), None, P::None),
        And => ParseRule::new(None, Some(Compiler::and), P::And),
        Or => ParseRule::new(None, Some(Compiler::or), P::Or),
        False | True | Nil => ParseRule::new(Some(Compiler::literal), None, P::None),
        Me => ParseRule::new(Some(Compiler::me), None, P::None),
        Fn => ParseRule::new(Some(Compiler::lambda), None, P::None),
        Where | Select => ParseRule::new(None, Some(Compiler::pipe), P::Pipe),
        _ => ParseRule::new(None, None, P::None),
    }
}
