// Parser for eqsim equation sets.
//
// Parses a token stream (from the lexer) into an `EquationSet`. Uses chumsky
// combinators over the logos token stream.
//
// Grammar (one statement per line):
//   equation := IDENT ('=' expr)? ':' expr
//   expr     := product (('+' | '-') product)*
//   product  := unary (('*' | '/') unary)*
//   unary    := ('-' | '+')* power
//   power    := atom ('**' unary)?
//   atom     := NUMBER | IDENT ('(' args ')')? | '(' expr ')'
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub equations: Option<EquationSet>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an equation-set source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = equations_parser(source);
    let (equations, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        equations,
        errors: all_errors,
    }
}

fn binary(lhs: Expr, (op, rhs): (BinaryOp, Expr)) -> Expr {
    let span: Span = (lhs.span.start..rhs.span.end).into();
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

// ── Main parser builder ──

fn equations_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, EquationSet, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start..span.end].to_string(),
            span,
        }
    });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let number = select! {
            Token::Number(n) = e => Expr { kind: ExprKind::Number(n), span: e.span() },
        };

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let name_or_call = ident
            .clone()
            .then(args.or_not())
            .map_with(|(name, args), e| {
                let kind = match args {
                    Some(args) => ExprKind::Call { name, args },
                    None => ExprKind::Ident(name),
                };
                Expr {
                    kind,
                    span: e.span(),
                }
            });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = number.or(name_or_call).or(parens);

        // `**` binds tighter than unary minus on its left but accepts a
        // signed exponent on its right: `-x ** -2 == -(x ** (-2))`.
        let unary = recursive(|unary| {
            let power = atom
                .clone()
                .then(just(Token::Pow).ignore_then(unary).or_not())
                .map_with(|(base, exponent), e| match exponent {
                    Some(exponent) => Expr {
                        kind: ExprKind::Binary {
                            op: BinaryOp::Pow,
                            lhs: Box::new(base),
                            rhs: Box::new(exponent),
                        },
                        span: e.span(),
                    },
                    None => base,
                });

            let sign = select! {
                Token::Minus => UnaryOp::Neg,
                Token::Plus => UnaryOp::Plus,
            }
            .map_with(|op, e| (op, e.span()));

            sign.repeated()
                .foldr(power, |(op, op_span): (UnaryOp, SimpleSpan), operand: Expr| {
                    let span: Span = (op_span.start..operand.span.end).into();
                    Expr {
                        kind: ExprKind::Unary {
                            op,
                            operand: Box::new(operand),
                        },
                        span,
                    }
                })
        });

        let product_op = select! {
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
        };
        let product = unary
            .clone()
            .foldl(product_op.then(unary.clone()).repeated(), binary);

        let sum_op = select! {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
        };
        product
            .clone()
            .foldl(sum_op.then(product.clone()).repeated(), binary)
    });

    // ── Equation: IDENT ('=' expr)? ':' unit ──

    let equation = ident
        .clone()
        .then(just(Token::Equals).ignore_then(expr.clone()).or_not())
        .then_ignore(just(Token::Colon))
        .then(expr)
        .map_with(|((target, rhs), unit), e| Equation {
            target,
            rhs,
            unit,
            span: e.span(),
        });

    // ── Equation set ──

    nl.clone()
        .ignore_then(
            equation
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(|equations, e| EquationSet {
            equations,
            span: e.span(),
        })
}

// ── Tests ──
