// Definitions are parsed once into a small expression tree which the
// runtime interprets; no source text is synthesized or evaluated at
// runtime.
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, one_of};
use nom::combinator::{map, map_res, opt, recognize};
use nom::multi::{many0, separated_list0};
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated};
use nom::{IResult, Parser};
use nom_locate::LocatedSpan;
use smol_str::SmolStr;
use thiserror::Error;

use crate::number::Number;
use crate::Ident;

type Span<'a> = LocatedSpan<&'a str>;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Unexpected input at offset {offset}: \"{fragment}\"")]
    UnexpectedToken { offset: usize, fragment: String },
    #[error("Unexpected trailing input at offset {offset}: \"{fragment}\"")]
    TrailingInput { offset: usize, fragment: String },
    #[error("Definition ended unexpectedly")]
    UnexpectedEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VectorEntry {
    pub label: Option<SmolStr>,
    pub expr: Expr,
}

/// One parsed definition body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Expr {
    Number(Number),
    Bool(bool),
    String(String),
    /// Reference to a quantity, parameter or fold binder.
    Ref(Ident),
    /// `name @ k`: the value of `name`, `k` steps back in history.
    History(Ident, u64),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Ident, Vec<Expr>),
    Vector(Vec<VectorEntry>),
    /// `#(binder, list, body, combiner)`: evaluate `body` with `binder`
    /// bound to each element of `list`, combining results pairwise.
    Fold {
        binder: Ident,
        list: Box<Expr>,
        body: Box<Expr>,
        combiner: Box<Expr>,
    },
}

/// Parses a definition body into an expression tree.
pub fn parse(definition: &str) -> Result<Expr, ParseError> {
    match terminated(expr, multispace0).parse(Span::new(definition)) {
        Ok((rest, parsed)) if rest.fragment().is_empty() => Ok(parsed),
        Ok((rest, _)) => Err(ParseError::TrailingInput {
            offset: rest.location_offset(),
            fragment: rest.fragment().chars().take(24).collect(),
        }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            if e.input.fragment().is_empty() {
                Err(ParseError::UnexpectedEof)
            } else {
                Err(ParseError::UnexpectedToken {
                    offset: e.input.location_offset(),
                    fragment: e.input.fragment().chars().take(24).collect(),
                })
            }
        }
        Err(nom::Err::Incomplete(_)) => Err(ParseError::UnexpectedEof),
    }
}

fn expr(input: Span) -> IResult<Span, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(preceded(multispace0, one_of("+-")), term)).parse(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn term(input: Span) -> IResult<Span, Expr> {
    let (input, first) = power(input)?;
    let (input, rest) = many0(pair(preceded(multispace0, one_of("*/")), power)).parse(input)?;
    Ok((input, fold_binary(first, rest)))
}

// Right-associative.
fn power(input: Span) -> IResult<Span, Expr> {
    let (input, base) = unary(input)?;
    let (input, exponent) =
        opt(preceded(preceded(multispace0, char('^')), power)).parse(input)?;
    Ok((input, match exponent {
        Some(exponent) => Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
        None => base,
    }))
}

fn unary(input: Span) -> IResult<Span, Expr> {
    preceded(
        multispace0,
        alt((
            map(preceded(char('-'), unary), |inner| Expr::Neg(Box::new(inner))),
            primary,
        )),
    )
    .parse(input)
}

fn fold_binary(first: Expr, rest: Vec<(char, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        let op = match op {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            _ => BinaryOp::Div,
        };
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

fn primary(input: Span) -> IResult<Span, Expr> {
    alt((
        string_literal,
        fold_call,
        vector,
        delimited(
            char('('),
            expr,
            preceded(multispace0, char(')')),
        ),
        name_form,
        map(double, |value| Expr::Number(Number::new(value))),
    ))
    .parse(input)
}

fn identifier(input: Span) -> IResult<Span, Span> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn string_literal(input: Span) -> IResult<Span, Expr> {
    map(
        alt((
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        )),
        |span: Span| Expr::String(span.fragment().to_string()),
    )
    .parse(input)
}

// A bare name, a call, or a history lookup; `true`/`false` are the only
// keywords.
fn name_form(input: Span) -> IResult<Span, Expr> {
    let (input, name) = identifier(input)?;
    let word = *name.fragment();
    if word == "true" {
        return Ok((input, Expr::Bool(true)));
    }
    if word == "false" {
        return Ok((input, Expr::Bool(false)));
    }
    let ident = Ident::new(word);

    let (input, args) = opt(delimited(
        preceded(multispace0, char('(')),
        separated_list0(preceded(multispace0, char(',')), expr),
        preceded(multispace0, char(')')),
    ))
    .parse(input)?;
    if let Some(args) = args {
        return Ok((input, Expr::Call(ident, args)));
    }

    let (input, lag) = opt(preceded(
        preceded(multispace0, char('@')),
        preceded(multispace0, map_res(digit1, |span: Span| span.fragment().parse::<u64>())),
    ))
    .parse(input)?;
    Ok((input, match lag {
        Some(lag) => Expr::History(ident, lag),
        None => Expr::Ref(ident),
    }))
}

fn vector(input: Span) -> IResult<Span, Expr> {
    map(
        delimited(
            char('['),
            separated_list0(preceded(multispace0, char(',')), vector_entry),
            preceded(multispace0, char(']')),
        ),
        Expr::Vector,
    )
    .parse(input)
}

fn vector_entry(input: Span) -> IResult<Span, VectorEntry> {
    alt((
        map(
            separated_pair(
                preceded(multispace0, identifier),
                preceded(multispace0, char(':')),
                expr,
            ),
            |(label, expr)| VectorEntry {
                label: Some(SmolStr::new(label.fragment())),
                expr,
            },
        ),
        map(expr, |expr| VectorEntry { label: None, expr }),
    ))
    .parse(input)
}

fn fold_call(input: Span) -> IResult<Span, Expr> {
    map(
        preceded(
            char('#'),
            delimited(
                preceded(multispace0, char('(')),
                (
                    preceded(multispace0, identifier),
                    preceded(preceded(multispace0, char(',')), expr),
                    preceded(preceded(multispace0, char(',')), expr),
                    preceded(preceded(multispace0, char(',')), expr),
                ),
                preceded(multispace0, char(')')),
            ),
        ),
        |(binder, list, body, combiner)| Expr::Fold {
            binder: Ident::new(binder.fragment()),
            list: Box::new(list),
            body: Box::new(body),
            combiner: Box::new(combiner),
        },
    )
    .parse(input)
}
