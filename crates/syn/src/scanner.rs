use logos::Logos;

use crate::token::{Token, TokenKind};

/// A forward-only cursor over the source text.
///
/// Once the input is exhausted every call returns an [`TokenKind::Eof`] token.
pub struct Scanner<'src> {
    lexer: logos::Lexer<'src, TokenKind>,
    source: &'src str,
    line: u32,
    /// Byte offset up to which newlines have been counted into `line`
    counted: usize,
    /// Number of `%{` currently waiting for their `}`
    interpolation: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner {
            lexer: TokenKind::lexer(source),
            source,
            line: 1,
            counted: 0,
            interpolation: 0,
        }
    }

    pub fn next_token(&mut self) -> Token<'src> {
        let kind = match self.lexer.next() {
            Some(kind) => kind,
            None => {
                self.count_lines(self.source.len());
                if self.interpolation > 0 {
                    self.interpolation = 0;
                    return self.error("String interpolation missing '}' at end.");
                }
                return self.make(TokenKind::Eof, self.source.len());
            }
        };

        let start = self.lexer.span().start;
        self.count_lines(start);

        match kind {
            TokenKind::Quote if self.lexer.remainder().starts_with("\"\"") => {
                self.lexer.bump(2);
                self.raw_string(start)
            }
            TokenKind::Quote => self.string(start),
            TokenKind::RightBrace if self.interpolation > 0 => {
                self.interpolation -= 1;
                self.string(start)
            }
            TokenKind::Number => {
                let rest = self.lexer.remainder().as_bytes();
                if rest.len() >= 2 && rest[0] == b'.' && rest[1].is_ascii_digit() {
                    let fraction = rest[1..].iter().take_while(|b| b.is_ascii_digit()).count();
                    self.lexer.bump(1 + fraction);
                }
                self.make(TokenKind::Number, start)
            }
            TokenKind::Error => self.error("Unexpected character."),
            kind => self.make(kind, start),
        }
    }

    fn make(&self, kind: TokenKind, start: usize) -> Token<'src> {
        let end = if kind == TokenKind::Eof {
            start
        } else {
            self.lexer.span().end
        };
        Token {
            kind,
            lexeme: &self.source[start..end],
            line: self.line,
        }
    }

    fn error(&self, message: &'static str) -> Token<'src> {
        tracing::trace!(line = self.line, message, "scan error");
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            line: self.line,
        }
    }

    fn count_lines(&mut self, upto: usize) {
        if upto > self.counted {
            let newlines = self.source.as_bytes()[self.counted..upto]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.line += newlines as u32;
            self.counted = upto;
        }
    }

    /// Scans the body of a string literal up to its closing quote or the next
    /// `%{`. The opening character (`"` or `}`) is already consumed.
    fn string(&mut self, start: usize) -> Token<'src> {
        let rest = self.lexer.remainder().as_bytes();
        let mut escaped = false;
        let mut i = 0;
        while i < rest.len() {
            let c = rest[i];
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                self.lexer.bump(i + 1);
                return self.make(TokenKind::String, start);
            } else if c == b'%' {
                if rest.get(i + 1) != Some(&b'{') {
                    self.lexer.bump(i + 1);
                    return self.error("Expect '{' after '%' in string.");
                }
                // The lexeme ends at the `%`, the `{` is swallowed.
                self.lexer.bump(i + 1);
                let token = self.make(TokenKind::Interpolation, start);
                self.lexer.bump(1);
                self.interpolation += 1;
                return token;
            }
            i += 1;
        }
        self.lexer.bump(rest.len());
        self.error("Unterminated string.")
    }

    /// Scans a raw string. The opening `"""` is already consumed. The literal
    /// ends at the last `"""` of a run of quotes, so `""""a""""` holds `"a"`.
    fn raw_string(&mut self, start: usize) -> Token<'src> {
        let rest = self.lexer.remainder().as_bytes();
        let mut i = 0;
        while i + 3 <= rest.len() {
            if &rest[i..i + 3] == b"\"\"\"" && rest.get(i + 3) != Some(&b'"') {
                self.lexer.bump(i + 3);
                return self.make(TokenKind::RawString, start);
            }
            i += 1;
        }
        self.lexer.bump(rest.len());
        self.error("Unterminated raw string.")
    }
}

impl<'src> Iterator for Scanner<'src> {
    type Item = Token<'src>;

    /// Yields tokens up to, but not including, the end of input.
    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token();
        (token.kind != TokenKind::Eof).then(|| token)
    }
}
