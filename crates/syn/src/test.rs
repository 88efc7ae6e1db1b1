use expect_test::expect;
use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::{Scanner, Token, TokenKind};

fn kinds(src: &str) -> Vec<TokenKind> {
    Scanner::new(src).map(|t| t.kind).collect()
}

fn lexemes(src: &str) -> Vec<&str> {
    Scanner::new(src).map(|t| t.lexeme).collect()
}

#[test]
fn test_simple_statement() {
    let actual = kinds("const answer = 41 + 1;");
    expect![[r#"[Const, Identifier, Equal, Number, Plus, Number, Semicolon]"#]]
        .assert_eq(&format!("{:?}", actual));
}

#[test]
fn test_keywords_and_identifiers() {
    let actual = kinds("fn fnord me mean loop looping times where wherever select");
    assert_eq!(
        actual,
        vec![
            TokenKind::Fn,
            TokenKind::Identifier,
            TokenKind::Me,
            TokenKind::Identifier,
            TokenKind::Loop,
            TokenKind::Identifier,
            TokenKind::Times,
            TokenKind::Where,
            TokenKind::Identifier,
            TokenKind::Select,
        ]
    );
}

#[test]
fn test_operators() {
    let actual = kinds("a++ b-- c += 1 d -= 2 x => y .. : [ ] != == <= >=");
    expect![[r#"[Identifier, PlusPlus, Identifier, MinusMinus, Identifier, PlusEqual, Number, Identifier, MinusEqual, Number, Identifier, Arrow, Identifier, DotDot, Colon, LeftBracket, RightBracket, BangEqual, EqualEqual, LessEqual, GreaterEqual]"#]]
        .assert_eq(&format!("{:?}", actual));
}

#[test]
fn test_numbers_and_ranges() {
    assert_eq!(lexemes("3.25 1..5 7."), vec!["3.25", "1", "..", "5", "7", "."]);
}

#[test]
fn test_comments_and_lines() {
    let tokens: Vec<Token> = Scanner::new("a // comment\n\nb\n  // trailing").collect();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].line, 1);
    assert_eq!(tokens[1].line, 3);
}

#[test]
fn test_eof_repeats() {
    let mut scanner = Scanner::new("x");
    assert_eq!(scanner.next_token().kind, TokenKind::Identifier);
    for _ in 0..3 {
        let token = scanner.next_token();
        assert_eq!(token.kind, TokenKind::Eof);
        assert_eq!(token.lexeme, "");
    }
}

#[test]
fn test_strings() {
    let tokens: Vec<Token> = Scanner::new(r#""hello \"world\"" """raw \n "quoted" text""""#).collect();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].kind, TokenKind::String);
    assert_eq!(tokens[0].string_content(), r#"hello \"world\""#);
    assert_eq!(tokens[1].kind, TokenKind::RawString);
    assert_eq!(tokens[1].string_content(), r#"raw \n "quoted" text"#);
}

#[test]
fn test_interpolation() {
    let tokens: Vec<Token> = Scanner::new(r#""a %{x + 1} b %{"c"} d""#).collect();
    let actual: Vec<_> = tokens.iter().map(|t| (t.kind, t.lexeme)).collect();
    assert_eq!(
        actual,
        vec![
            (TokenKind::Interpolation, "\"a %"),
            (TokenKind::Identifier, "x"),
            (TokenKind::Plus, "+"),
            (TokenKind::Number, "1"),
            (TokenKind::Interpolation, "} b %"),
            (TokenKind::String, "\"c\""),
            (TokenKind::String, "} d\""),
        ]
    );
    assert_eq!(tokens[4].string_content(), " b ");
    assert_eq!(tokens[6].string_content(), " d");
}

#[test]
fn test_braces_outside_interpolation() {
    assert_eq!(
        kinds("{ }"),
        vec![TokenKind::LeftBrace, TokenKind::RightBrace]
    );
}

#[test]
fn test_scan_errors() {
    fn errors(src: &str) -> Vec<&str> {
        Scanner::new(src)
            .filter(|t| t.kind == TokenKind::Error)
            .map(|t| t.lexeme)
            .collect()
    }
    assert_eq!(errors("\"abc"), vec!["Unterminated string."]);
    assert_eq!(errors("\"\"\"abc\"\""), vec!["Unterminated raw string."]);
    // the closing quote then opens another, unterminated, literal
    assert_eq!(errors("\"50% off\"")[0], "Expect '{' after '%' in string.");
    assert_eq!(
        errors("\"a %{x"),
        vec!["String interpolation missing '}' at end."]
    );
    assert_eq!(errors("a # b"), vec!["Unexpected character."]);
}
