//! Script functionals
//!
//! A script is a list of assignments separated by `;` or newlines, each
//! `name = expression` with `+ - * / %`, unary minus, parentheses, numeric
//! literals and attribute names. Reads and writes go through
//! [`BundleLike`], so a script sees the same attributes a native functional
//! would.
//!
//! ```
//! use nirva_engine::script::Script;
//! let s = Script::parse("out = a + b").unwrap();
//! assert_eq!(s.outputs(), vec!["out"]);
//! ```

use crate::error::{TxError, TxOutcome};
use nirva_core::{BundleLike, Error, Result, StrandType, StrandValue};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn from_value(v: &StrandValue) -> Option<Num> {
        match v {
            StrandValue::Int(i) => Some(Num::Int(i64::from(*i))),
            StrandValue::Int64(i) => Some(Num::Int(*i)),
            StrandValue::Uint(u) => Some(Num::Int(i64::from(*u))),
            StrandValue::Uint64(u) => i64::try_from(*u).ok().map(Num::Int),
            StrandValue::Bool(b) => Some(Num::Int(i64::from(*b))),
            StrandValue::Double(d) => Some(Num::Float(*d)),
            _ => None,
        }
    }

    fn into_value(self, stype: StrandType) -> Option<StrandValue> {
        let int = match self {
            Num::Int(i) => Some(i),
            Num::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(f as i64),
            Num::Float(_) => None,
        };
        Some(match stype {
            StrandType::Int => StrandValue::Int(i32::try_from(int?).ok()?),
            StrandType::Int64 => StrandValue::Int64(int?),
            StrandType::Uint => StrandValue::Uint(u32::try_from(int?).ok()?),
            StrandType::Uint64 => StrandValue::Uint64(u64::try_from(int?).ok()?),
            StrandType::Boolean => StrandValue::Bool(int? != 0),
            StrandType::Double => StrandValue::Double(self.as_f64()),
            _ if stype.is_deferred() => match self {
                Num::Int(i) => i32::try_from(i)
                    .map(StrandValue::Int)
                    .unwrap_or(StrandValue::Int64(i)),
                Num::Float(f) => StrandValue::Double(f),
            },
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Num),
    Var(String),
    Neg(Box<Expr>),
    Bin(char, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
struct Assign {
    target: String,
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(Num),
    Ident(String),
    Op(char),
    Sep,
}

fn tokenize(src: &str) -> Result<Vec<Tok>> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            ';' | '\n' => {
                out.push(Tok::Sep);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' | '(' | ')' | '=' => {
                out.push(Tok::Op(c));
                i += 1;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = if text.contains('.') {
                    text.parse().map(Num::Float).ok()
                } else {
                    text.parse().map(Num::Int).ok()
                };
                out.push(Tok::Num(num.ok_or_else(|| {
                    Error::InvalidFormat(format!("bad number '{}'", text))
                })?));
            }
            c if c.is_alphabetic() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                out.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::InvalidFormat(format!(
                    "unexpected '{}' in script",
                    other
                )))
            }
        }
    }
    Ok(out)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Tok::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn program(&mut self) -> Result<Vec<Assign>> {
        let mut stmts = Vec::new();
        while let Some(tok) = self.next() {
            match tok {
                Tok::Sep => continue,
                Tok::Ident(target) => {
                    if !self.eat('=') {
                        return Err(Error::InvalidFormat(format!(
                            "expected '=' after '{}'",
                            target
                        )));
                    }
                    let expr = self.expr()?;
                    match self.next() {
                        None | Some(Tok::Sep) => {}
                        Some(t) => {
                            return Err(Error::InvalidFormat(format!(
                                "unexpected {:?} after expression",
                                t
                            )))
                        }
                    }
                    stmts.push(Assign { target, expr });
                }
                t => {
                    return Err(Error::InvalidFormat(format!(
                        "statement cannot start with {:?}",
                        t
                    )))
                }
            }
        }
        Ok(stmts)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(c @ ('+' | '-'))) => *c,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(c @ ('*' | '/' | '%'))) => *c,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(self.factor()?));
        }
    }

    fn factor(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(Expr::Lit(n)),
            Some(Tok::Ident(name)) => Ok(Expr::Var(name)),
            Some(Tok::Op('-')) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Tok::Op('(')) => {
                let e = self.expr()?;
                if !self.eat(')') {
                    return Err(Error::InvalidFormat("missing ')'".into()));
                }
                Ok(e)
            }
            other => Err(Error::InvalidFormat(format!(
                "expected a value, found {:?}",
                other
            ))),
        }
    }
}

/// Parsed script
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    stmts: Vec<Assign>,
}

impl Script {
    /// Parse script text
    ///
    /// # Errors
    ///
    /// `InvalidFormat` on a syntax error or an empty script.
    pub fn parse(source: &str) -> Result<Self> {
        let stmts = Parser {
            toks: tokenize(source)?,
            pos: 0,
        }
        .program()?;
        if stmts.is_empty() {
            return Err(Error::InvalidFormat("empty script".into()));
        }
        Ok(Self {
            source: source.to_string(),
            stmts,
        })
    }

    /// Source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names assigned, in order, without duplicates
    pub fn outputs(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in &self.stmts {
            if !out.contains(&s.target.as_str()) {
                out.push(&s.target);
            }
        }
        out
    }

    /// Names read before being assigned
    pub fn inputs(&self) -> Vec<&str> {
        fn walk<'a>(e: &'a Expr, assigned: &[&str], out: &mut Vec<&'a str>) {
            match e {
                Expr::Var(v) if !assigned.contains(&v.as_str()) && !out.contains(&v.as_str()) => {
                    out.push(v)
                }
                Expr::Neg(x) => walk(x, assigned, out),
                Expr::Bin(_, a, b) => {
                    walk(a, assigned, out);
                    walk(b, assigned, out);
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        let mut assigned: Vec<&str> = Vec::new();
        for s in &self.stmts {
            walk(&s.expr, &assigned, &mut out);
            assigned.push(&s.target);
        }
        out
    }

    /// Run against `attrs`; `name` labels errors
    pub fn run(&self, name: &str, attrs: &dyn BundleLike) -> TxOutcome<()> {
        for s in &self.stmts {
            let n = eval(name, &s.expr, attrs)?;
            let stype = attrs.strand_type(&s.target)?;
            let value = n.into_value(stype).ok_or_else(|| {
                TxError::Marshal(format!("cannot store {:?} in '{}' ({})", n, s.target, stype))
            })?;
            attrs.set_value(&s.target, value)?;
        }
        Ok(())
    }
}

fn eval(name: &str, e: &Expr, attrs: &dyn BundleLike) -> TxOutcome<Num> {
    Ok(match e {
        Expr::Lit(n) => *n,
        Expr::Var(v) => {
            let value = attrs.get_value(v)?;
            Num::from_value(&value)
                .ok_or_else(|| TxError::Marshal(format!("'{}' is not numeric", v)))?
        }
        Expr::Neg(x) => match eval(name, x, attrs)? {
            Num::Int(i) => Num::Int(-i),
            Num::Float(f) => Num::Float(-f),
        },
        Expr::Bin(op, a, b) => {
            let (a, b) = (eval(name, a, attrs)?, eval(name, b, attrs)?);
            match (a, b) {
                (Num::Int(x), Num::Int(y)) => {
                    let r = match op {
                        '+' => x.checked_add(y),
                        '-' => x.checked_sub(y),
                        '*' => x.checked_mul(y),
                        '/' => x.checked_div(y),
                        _ => x.checked_rem(y),
                    };
                    Num::Int(r.ok_or_else(|| {
                        TxError::functional(name, format!("arithmetic error in {} {} {}", x, op, y))
                    })?)
                }
                (a, b) => {
                    let (x, y) = (a.as_f64(), b.as_f64());
                    Num::Float(match op {
                        '+' => x + y,
                        '-' => x - y,
                        '*' => x * y,
                        '/' => x / y,
                        _ => x % y,
                    })
                }
            }
        }
    })
}
