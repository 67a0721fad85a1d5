//! Selection expressions over record fields.
//!
//! Cut strings use the syntax of the ntuple analysis macros:
//! arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=), boolean
//! operators (&&, ||, !), parentheses and the functions `abs` (also `fabs`
//! and `TMath::Abs`), `sqrt`, `log`, `exp`, `pow`, `min` and `max`.
//! A value is true when it is non-zero.

use crate::event::Record;
use crate::{Error, Result};
use std::fmt;

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into Selection::fields
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        let func = match name {
            "abs" | "fabs" | "TMath::Abs" => Self::Abs,
            "sqrt" | "TMath::Sqrt" => Self::Sqrt,
            "log" | "TMath::Log" => Self::Log,
            "exp" | "TMath::Exp" => Self::Exp,
            "pow" | "TMath::Power" => Self::Pow,
            "min" | "TMath::Min" => Self::Min,
            "max" | "TMath::Max" => Self::Max,
            _ => return None,
        };
        Some(func)
    }

    fn arity(self) -> usize {
        match self {
            Self::Abs | Self::Sqrt | Self::Log | Self::Exp => 1,
            Self::Pow | Self::Min | Self::Max => 2,
        }
    }
}

// ── Compiled selection ─────────────────────────────────────────

/// A compiled boolean selection over record fields.
///
/// An empty cut string compiles to a selection that accepts every record.
#[derive(Debug, Clone)]
pub struct Selection {
    source: String,
    ast: Option<Expr>,
    fields: Vec<String>,
}

impl Selection {
    /// Parses and compiles a cut string.
    ///
    /// # Errors
    /// Returns `Expression` if the string is not a valid expression.
    pub fn parse(input: &str) -> Result<Self> {
        let source = input.trim().to_string();
        if source.is_empty() {
            return Ok(Self::always());
        }
        let tokens = tokenize(&source)?;
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Expression(format!(
                "unexpected token after expression: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let fields = std::mem::take(&mut parser.fields);
        Ok(Self {
            source,
            ast: Some(ast),
            fields,
        })
    }

    /// A selection that accepts every record.
    #[must_use]
    pub fn always() -> Self {
        Self {
            source: String::new(),
            ast: None,
            fields: Vec::new(),
        }
    }

    /// Returns true if this selection accepts every record.
    #[must_use]
    pub fn is_always(&self) -> bool {
        self.ast.is_none()
    }

    /// Returns the cut string this selection was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Field names referenced by this selection, ordered by first occurrence.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns the conjunction of two selections.
    #[must_use]
    pub fn and(&self, other: &Selection) -> Selection {
        match (&self.ast, &other.ast) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some(lhs), Some(rhs)) => {
                let mut fields = self.fields.clone();
                let mut remap = Vec::with_capacity(other.fields.len());
                for name in &other.fields {
                    let idx = if let Some(i) = fields.iter().position(|f| f == name) {
                        i
                    } else {
                        fields.push(name.clone());
                        fields.len() - 1
                    };
                    remap.push(idx);
                }
                let rhs = remap_vars(rhs, &remap);
                Selection {
                    source: format!("({}) && ({})", self.source, other.source),
                    ast: Some(Expr::BinOp(BinOp::And, Box::new(lhs.clone()), Box::new(rhs))),
                    fields,
                }
            }
        }
    }

    /// Evaluates the selection for one record.
    ///
    /// # Errors
    /// Returns `MissingField` if the record lacks a referenced field.
    pub fn matches<R: Record + ?Sized>(&self, record: &R) -> Result<bool> {
        match &self.ast {
            None => Ok(true),
            Some(ast) => Ok(truthy(eval_expr(ast, record, &self.fields)?)),
        }
    }

    /// Evaluates the selection as a number for one record (1.0 or 0.0 for
    /// boolean expressions).
    ///
    /// # Errors
    /// Returns `MissingField` if the record lacks a referenced field.
    pub fn value<R: Record + ?Sized>(&self, record: &R) -> Result<f64> {
        match &self.ast {
            None => Ok(1.0),
            Some(ast) => eval_expr(ast, record, &self.fields),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("<all>")
        } else {
            f.write_str(&self.source)
        }
    }
}

impl std::str::FromStr for Selection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn remap_vars(e: &Expr, remap: &[usize]) -> Expr {
    match e {
        Expr::Number(n) => Expr::Number(*n),
        Expr::Var(i) => Expr::Var(remap[*i]),
        Expr::UnaryNeg(a) => Expr::UnaryNeg(Box::new(remap_vars(a, remap))),
        Expr::UnaryNot(a) => Expr::UnaryNot(Box::new(remap_vars(a, remap))),
        Expr::BinOp(op, a, b) => Expr::BinOp(
            *op,
            Box::new(remap_vars(a, remap)),
            Box::new(remap_vars(b, remap)),
        ),
        Expr::Call(f, args) => Expr::Call(*f, args.iter().map(|a| remap_vars(a, remap)).collect()),
    }
}

// ── Evaluation ─────────────────────────────────────────────────

#[inline]
fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

#[inline]
fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

// Both operands of && and || are evaluated so a missing field is reported
// for every row, not only the rows where the left side decides.
fn eval_expr<R: Record + ?Sized>(e: &Expr, record: &R, fields: &[String]) -> Result<f64> {
    Ok(match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => record.get_f64(&fields[*i])?,
        Expr::UnaryNeg(a) => -eval_expr(a, record, fields)?,
        Expr::UnaryNot(a) => flag(!truthy(eval_expr(a, record, fields)?)),
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, record, fields)?;
            let rhs = eval_expr(b, record, fields)?;
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                #[allow(clippy::float_cmp)]
                BinOp::Eq => flag(lhs == rhs),
                #[allow(clippy::float_cmp)]
                BinOp::Ne => flag(lhs != rhs),
                BinOp::Lt => flag(lhs < rhs),
                BinOp::Le => flag(lhs <= rhs),
                BinOp::Gt => flag(lhs > rhs),
                BinOp::Ge => flag(lhs >= rhs),
                BinOp::And => flag(truthy(lhs) && truthy(rhs)),
                BinOp::Or => flag(truthy(lhs) || truthy(rhs)),
            }
        }
        Expr::Call(f, args) => {
            let a0 = eval_expr(&args[0], record, fields)?;
            match f {
                Func::Abs => a0.abs(),
                Func::Sqrt => a0.sqrt(),
                Func::Log => a0.ln(),
                Func::Exp => a0.exp(),
                Func::Pow => a0.powf(eval_expr(&args[1], record, fields)?),
                Func::Min => a0.min(eval_expr(&args[1], record, fields)?),
                Func::Max => a0.max(eval_expr(&args[1], record, fields)?),
            }
        }
    })
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if let Some(&next) = chars.get(i + 1) {
            let tok = match (c, next) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 = s
                .parse()
                .map_err(|_| Error::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            loop {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                // Namespaced function names such as TMath::Abs
                let namespaced = chars.get(i) == Some(&':')
                    && chars.get(i + 1) == Some(&':')
                    && chars
                        .get(i + 2)
                        .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_');
                if !namespaced {
                    break;
                }
                i += 2;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Expression(format!("unexpected character: '{c}'")));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    fields: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            fields: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!(
                "expected {expected:?}, got {other:?}"
            ))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.fields.iter().position(|f| f == name) {
            i
        } else {
            self.fields.push(name.to_string());
            self.fields.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance(); // consume '('
                    let func = Func::lookup(&name).ok_or_else(|| {
                        Error::Expression(format!("unknown function: '{name}'"))
                    })?;
                    let mut args = vec![self.parse_or()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(Error::Expression(format!(
                            "function '{name}' takes {} argument(s), got {}",
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(func, args))
                } else if name.contains("::") {
                    Err(Error::Expression(format!(
                        "'{name}' is only valid as a function call"
                    )))
                } else {
                    let idx = self.resolve_var(&name);
                    Ok(Expr::Var(idx))
                }
            }
            other => Err(Error::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::event::FieldValue;
    use std::collections::HashMap;

    fn record(pairs: &[(&str, f64)]) -> HashMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), FieldValue::Double(*v)))
            .collect()
    }

    #[test]
    fn empty_cut_accepts_everything() {
        let s = Selection::parse("  ").unwrap();
        assert!(s.is_always());
        assert!(s.matches(&record(&[])).unwrap());
        assert_eq!(s.to_string(), "<all>");
    }

    #[test]
    fn comparison_and_boolean() {
        let s = Selection::parse("K_dr < 2 && K_nVXDHits > 0").unwrap();
        assert_eq!(s.fields(), ["K_dr", "K_nVXDHits"]);
        assert!(s.matches(&record(&[("K_dr", 0.4), ("K_nVXDHits", 3.0)])).unwrap());
        assert!(!s.matches(&record(&[("K_dr", 2.4), ("K_nVXDHits", 3.0)])).unwrap());
        assert!(!s.matches(&record(&[("K_dr", 0.4), ("K_nVXDHits", 0.0)])).unwrap());
    }

    #[test]
    fn tmath_functions() {
        let s = Selection::parse("TMath::Abs(Dst_M_preFit-2.01026) < 0.1").unwrap();
        assert_eq!(s.fields(), ["Dst_M_preFit"]);
        assert!(s.matches(&record(&[("Dst_M_preFit", 2.05)])).unwrap());
        assert!(!s.matches(&record(&[("Dst_M_preFit", 2.2)])).unwrap());

        let s = Selection::parse("abs(K_genMotherPDG)==413").unwrap();
        assert!(s.matches(&record(&[("K_genMotherPDG", -413.0)])).unwrap());
    }

    #[test]
    fn arithmetic_values() {
        let s = Selection::parse("pow(x, 2) + sqrt(y) * -1").unwrap();
        let v = s.value(&record(&[("x", 3.0), ("y", 16.0)])).unwrap();
        assert_relative_eq!(v, 5.0);

        let s = Selection::parse("1.5e2 + 3.0E-1").unwrap();
        assert_relative_eq!(s.value(&record(&[])).unwrap(), 150.3, epsilon = 1e-10);
    }

    #[test]
    fn equality_is_exact() {
        let eq = Selection::parse("x == 2e-20").unwrap();
        let ne = Selection::parse("x != 2e-20").unwrap();
        let tiny = record(&[("x", 1e-20)]);
        assert!(!eq.matches(&tiny).unwrap());
        assert!(ne.matches(&tiny).unwrap());

        let exact = record(&[("x", 2e-20)]);
        assert!(eq.matches(&exact).unwrap());
        assert!(!ne.matches(&exact).unwrap());

        let rank = Selection::parse("B0_M_rank==1").unwrap();
        assert!(rank.matches(&record(&[("B0_M_rank", 1.0)])).unwrap());
        assert!(!rank.matches(&record(&[("B0_M_rank", 1.0 + 1e-15)])).unwrap());
    }

    #[test]
    fn logical_not_and_or() {
        let s = Selection::parse("!(x > 3) || y == 1").unwrap();
        assert!(s.matches(&record(&[("x", 2.0), ("y", 0.0)])).unwrap());
        assert!(s.matches(&record(&[("x", 5.0), ("y", 1.0)])).unwrap());
        assert!(!s.matches(&record(&[("x", 5.0), ("y", 0.0)])).unwrap());
    }

    #[test]
    fn missing_field_is_reported() {
        let s = Selection::parse("x > 0 || y > 0").unwrap();
        assert_eq!(
            s.matches(&record(&[("x", 1.0)])),
            Err(Error::missing_field("y"))
        );
    }

    #[test]
    fn conjunction_shares_fields() {
        let common = Selection::parse("a > 0 && b > 0").unwrap();
        let rank = Selection::parse("b == 1 && c < 5").unwrap();
        let both = common.and(&rank);
        assert_eq!(both.fields(), ["a", "b", "c"]);
        assert_eq!(both.as_str(), "(a > 0 && b > 0) && (b == 1 && c < 5)");
        assert!(both.matches(&record(&[("a", 1.0), ("b", 1.0), ("c", 2.0)])).unwrap());
        assert!(!both.matches(&record(&[("a", 1.0), ("b", 2.0), ("c", 2.0)])).unwrap());

        let all = Selection::always();
        assert_eq!(all.and(&rank).as_str(), rank.as_str());
        assert_eq!(rank.and(&all).as_str(), rank.as_str());
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(Selection::parse("x >"), Err(Error::Expression(_))));
        assert!(matches!(Selection::parse("x $ 2"), Err(Error::Expression(_))));
        assert!(matches!(Selection::parse("foo(x)"), Err(Error::Expression(_))));
        assert!(matches!(Selection::parse("pow(x)"), Err(Error::Expression(_))));
        assert!(matches!(Selection::parse("(x > 1"), Err(Error::Expression(_))));
        assert!(matches!(Selection::parse("TMath::Pi"), Err(Error::Expression(_))));
    }
}
