// Lexer for eqsim equation sets.
//
// Tokenizes `name = expression : unit` statements. Uses the `logos` crate
// for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Equation-language tokens.
///
/// Numeric literals are unsigned; a leading `-` is always the `Minus`
/// operator so that `x -1` lexes as a subtraction. Identifiers carry no
/// value — use the span to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Operators ──
    #[token("**")]
    Pow,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // ── Punctuation ──
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,

    // ── Literals ──
    /// Numeric literal (int, float, exponent). Always non-negative.
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", parse_number)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (statement terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Pow => write!(f, "**"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Number(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex an equation-set source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn operators() {
        let tokens = lex_ok("+ - * / ** = : ( ) ,");
        assert_eq!(
            tokens,
            vec![
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Pow,
                Token::Equals,
                Token::Colon,
                Token::LParen,
                Token::RParen,
                Token::Comma,
            ]
        );
    }

    #[test]
    fn pow_is_longest_match() {
        let tokens = lex_ok("x**3");
        assert_eq!(tokens, vec![Token::Ident, Token::Pow, Token::Number(3.0)]);
    }

    #[test]
    fn numbers() {
        let tokens = lex_ok("1 0.5 2. .25 1e-3 3E2");
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.0),
                Token::Number(0.5),
                Token::Number(2.0),
                Token::Number(0.25),
                Token::Number(1e-3),
                Token::Number(300.0),
            ]
        );
    }

    #[test]
    fn minus_is_never_part_of_a_number() {
        let tokens = lex_ok("x -1");
        assert_eq!(tokens, vec![Token::Ident, Token::Minus, Token::Number(1.0)]);
    }

    #[test]
    fn equation_line() {
        let tokens = lex_ok("func = sin(variable) : 1");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Equals,
                Token::Ident,
                Token::LParen,
                Token::Ident,
                Token::RParen,
                Token::Colon,
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn newlines_collapse_and_comments_skip() {
        let tokens = lex_ok("a : 1 # state\n\n\nb : 1\r\n");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Colon,
                Token::Number(1.0),
                Token::Newline,
                Token::Ident,
                Token::Colon,
                Token::Number(1.0),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn ident_spans() {
        let result = lex("volt_1 = x");
        let (tok, span) = &result.tokens[0];
        assert_eq!(*tok, Token::Ident);
        assert_eq!(*span, Span { start: 0, end: 6 });
    }

    #[test]
    fn unexpected_character_is_reported_and_lexing_continues() {
        let result = lex("a = b % c");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains('%'));
        assert_eq!(result.tokens.len(), 4);
    }
}
