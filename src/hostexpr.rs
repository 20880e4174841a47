// src/hostexpr.rs
//! Evaluator for `%`-prefixed final command lines.
//!
//! Lines are integer expressions over literals, `+ - * / %`, parentheses and
//! a fixed set of functions. Nothing reaches the device or the host shell.
use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, one_of},
    combinator::{all_consuming, cut, map, recognize},
    error::{Error as NomError, ErrorKind},
    multi::{many0, many0_count, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for `sleep(...)`.
pub const MAX_SLEEP_SECS: i64 = 600;

/// Deepest nesting of parentheses, unary minus and call arguments.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unexpected character '{0}'")]
    Char(char),
    #[error("unexpected end of expression")]
    End,
    #[error("unexpected token '{0}'")]
    Token(String),
    #[error("expression nested too deeply")]
    TooDeep,
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("function '{0}' is not allowed")]
    NotAllowed(String),
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("sleep() takes 0 to 600 seconds, got {0}")]
    Sleep(i64),
}

/// Value of a line plus the pause it asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub value: i64,
    pub delay: Duration,
}

type HostFn = fn(&[i64], &mut Duration) -> Result<i64, EvalError>;

const ALLOWED: &[(&str, usize, HostFn)] = &[
    ("abs", 1, |a: &[i64], _: &mut Duration| a[0].checked_abs().ok_or(EvalError::Overflow)),
    ("min", 2, |a: &[i64], _: &mut Duration| Ok(a[0].min(a[1]))),
    ("max", 2, |a: &[i64], _: &mut Duration| Ok(a[0].max(a[1]))),
    ("sleep", 1, |a: &[i64], delay: &mut Duration| {
        if !(0..=MAX_SLEEP_SECS).contains(&a[0]) {
            return Err(EvalError::Sleep(a[0]));
        }
        *delay += Duration::from_secs(a[0] as u64);
        Ok(0)
    }),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr<'a> {
    Num(&'a str),
    Neg(Box<Expr<'a>>),
    Call(&'a str, Vec<Expr<'a>>),
    /// Left-associative operator run at one precedence level.
    Chain(Box<Expr<'a>>, Vec<(char, Expr<'a>)>),
}

impl<'a> Expr<'a> {
    fn chain(first: Expr<'a>, rest: Vec<(char, Expr<'a>)>) -> Self {
        if rest.is_empty() {
            first
        } else {
            Expr::Chain(Box::new(first), rest)
        }
    }

    fn eval(&self, delay: &mut Duration) -> Result<i64, EvalError> {
        match self {
            Expr::Num(digits) => digits.parse().map_err(|_| EvalError::Overflow),
            Expr::Neg(inner) => inner.eval(delay)?.checked_neg().ok_or(EvalError::Overflow),
            Expr::Call(name, args) => {
                let Some(&(_, arity, func)) = ALLOWED.iter().find(|(n, _, _)| n == name) else {
                    return Err(EvalError::NotAllowed(name.to_string()));
                };
                if args.len() != arity {
                    return Err(EvalError::Arity {
                        name: name.to_string(),
                        expected: arity,
                        got: args.len(),
                    });
                }
                let values = args
                    .iter()
                    .map(|arg| arg.eval(delay))
                    .collect::<Result<Vec<_>, _>>()?;
                func(&values, delay)
            }
            Expr::Chain(first, rest) => {
                let mut acc = first.eval(delay)?;
                for (op, rhs) in rest {
                    acc = apply(*op, acc, rhs.eval(delay)?)?;
                }
                Ok(acc)
            }
        }
    }
}

fn apply(op: char, lhs: i64, rhs: i64) -> Result<i64, EvalError> {
    if matches!(op, '/' | '%') && rhs == 0 {
        return Err(EvalError::DivisionByZero);
    }
    match op {
        '+' => lhs.checked_add(rhs),
        '-' => lhs.checked_sub(rhs),
        '*' => lhs.checked_mul(rhs),
        '/' => lhs.checked_div(rhs),
        _ => lhs.checked_rem(rhs),
    }
    .ok_or(EvalError::Overflow)
}

type Res<'a, T> = IResult<&'a str, T>;

fn ws<'a, T>(inner: impl FnMut(&'a str) -> Res<'a, T>) -> impl FnMut(&'a str) -> Res<'a, T> {
    delimited(multispace0, inner, multispace0)
}

fn guard(input: &str, depth: usize) -> Result<(), nom::Err<NomError<&str>>> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(NomError::new(input, ErrorKind::TooLarge)));
    }
    Ok(())
}

fn root(input: &str) -> Res<'_, Expr<'_>> {
    expr(input, 0)
}

fn expr<'a>(input: &'a str, depth: usize) -> Res<'a, Expr<'a>> {
    let (input, first) = term(input, depth)?;
    let (input, rest) = many0(pair(ws(one_of("+-")), cut(move |i: &'a str| term(i, depth))))(input)?;
    Ok((input, Expr::chain(first, rest)))
}

fn term<'a>(input: &'a str, depth: usize) -> Res<'a, Expr<'a>> {
    let (input, first) = unary(input, depth)?;
    let (input, rest) = many0(pair(ws(one_of("*/%")), cut(move |i: &'a str| unary(i, depth))))(input)?;
    Ok((input, Expr::chain(first, rest)))
}

fn unary<'a>(input: &'a str, depth: usize) -> Res<'a, Expr<'a>> {
    guard(input, depth)?;
    alt((
        map(
            preceded(ws(char('-')), move |i: &'a str| unary(i, depth + 1)),
            |inner| Expr::Neg(Box::new(inner)),
        ),
        move |i: &'a str| atom(i, depth),
    ))(input)
}

fn atom<'a>(input: &'a str, depth: usize) -> Res<'a, Expr<'a>> {
    ws(alt((
        map(digit1, Expr::Num),
        move |i: &'a str| call(i, depth),
        delimited(
            char('('),
            cut(move |i: &'a str| expr(i, depth + 1)),
            cut(char(')')),
        ),
    )))(input)
}

fn ident(input: &str) -> Res<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn call<'a>(input: &'a str, depth: usize) -> Res<'a, Expr<'a>> {
    let (input, name) = ident(input)?;
    let (input, args) = preceded(
        cut(ws(char('('))),
        cut(terminated(
            separated_list0(char(','), move |i: &'a str| expr(i, depth + 1)),
            char(')'),
        )),
    )(input)?;
    Ok((input, Expr::Call(name, args)))
}

fn syntax_error(e: NomError<&str>) -> EvalError {
    if e.code == ErrorKind::TooLarge {
        return EvalError::TooDeep;
    }
    let rest = e.input.trim_start();
    let word = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>();
    match rest.chars().next() {
        None => EvalError::End,
        Some(_) if !word.is_empty() => EvalError::Token(word),
        Some(c) => EvalError::Char(c),
    }
}

/// Evaluates one host-local line (without the leading `%`).
pub fn eval(src: &str) -> Result<Evaluation, EvalError> {
    let ast = match all_consuming(root)(src) {
        Ok((_, ast)) => ast,
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => return Err(syntax_error(e)),
        Err(nom::Err::Incomplete(_)) => return Err(EvalError::End),
    };
    let mut delay = Duration::ZERO;
    let value = ast.eval(&mut delay)?;
    Ok(Evaluation { value, delay })
}
