use logos::Logos;

/// A token produced by the [`Scanner`](crate::Scanner).
///
/// `lexeme` borrows the source text. For [`TokenKind::Error`] tokens it holds
/// the error message instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

impl<'src> Token<'src> {
    /// A token that does not come from the source, used for names the compiler
    /// makes up itself.
    pub fn synthetic(lexeme: &'src str, line: u32) -> Self {
        Token {
            kind: TokenKind::Identifier,
            lexeme,
            line,
        }
    }

    /// Text between the delimiters of a string-like token.
    ///
    /// `"abc"` yields `abc`, an interpolation head `"abc%` or continuation
    /// `}abc%` yields `abc`, and `"""abc"""` yields `abc`.
    pub fn string_content(&self) -> &'src str {
        let l = self.lexeme;
        match self.kind {
            TokenKind::RawString if l.len() >= 6 => &l[3..l.len() - 3],
            TokenKind::String | TokenKind::Interpolation if l.len() >= 2 => &l[1..l.len() - 1],
            _ => l,
        }
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Single-character tokens.
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,
    #[token("%")]
    Percent,

    // One or two character tokens.
    #[token("..")]
    DotDot,
    #[token("-")]
    Minus,
    #[token("--")]
    MinusMinus,
    #[token("-=")]
    MinusEqual,
    #[token("+")]
    Plus,
    #[token("++")]
    PlusPlus,
    #[token("+=")]
    PlusEqual,
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token("=>")]
    Arrow,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,

    // Literals.
    #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,
    /// A complete string literal, quotes included.
    String,
    /// A `"""` delimited string literal.
    RawString,
    /// The part of a string literal before a `%{`, or between a `}` and the
    /// next `%{`.
    Interpolation,
    /// Integer part only; the scanner glues the fraction on itself so that
    /// `1..5` is not mistaken for `1.` followed by `.5`.
    #[regex("[0-9]+")]
    Number,

    // Keywords.
    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("const")]
    Const,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("enum")]
    Enum,
    #[token("false")]
    False,
    #[token("fn")]
    Fn,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("in")]
    In,
    #[token("loop")]
    Loop,
    #[token("me")]
    Me,
    #[token("mod")]
    Mod,
    #[token("nil")]
    Nil,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("select")]
    Select,
    #[token("then")]
    Then,
    #[token("times")]
    Times,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("where")]
    Where,
    #[token("while")]
    While,

    /// An opening `"`. Never leaves the scanner, which turns it into one of
    /// the string kinds above.
    #[token("\"")]
    Quote,

    Eof,

    #[error]
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    Error,
}

impl TokenKind {
    /// Tokens that can start a statement. Used for error recovery.
    pub fn starts_statement(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Class | Const | Enum | Fn | For | If | Loop | Mod | Print | Return | Var | While
        )
    }
}
