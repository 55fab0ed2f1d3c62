//! Field conditions (`depends_on`, `mandatory_depends_on`).
//!
//! Two forms are accepted:
//! - a bare field name (`enable_ebics`), true when that field is truthy;
//! - `eval:` followed by an expression over `doc`, e.g.
//!   `eval:doc.enabled && doc.customer_id != ''`.
//!
//! ### Grammar (informal)
//! - **Operands**: `doc.<field>`, `'text'`, `"text"`, `42`, `1.5`, `true`, `false`, `null`
//! - **Operators**: `!`, `&&`, `||`, `==`, `!=`, `===`, `!==`
//! - **Parentheses**: `( ... )` for explicit grouping
//!
//! Truthiness follows the form renderer: `null`, `false`, `0` and `""` are
//! falsy, everything else is truthy.

use std::fmt;

use serde_json::{Number, Value};

use super::Doc;

/// Maximum allowed condition size in bytes.
const MAX_CONDITION_BYTES: usize = 4 * 1024;
/// Maximum supported nesting depth.
const MAX_NESTING: usize = 32;

const EVAL_PREFIX: &str = "eval:";

/// Errors raised while parsing a condition. Positions are byte offsets into
/// the condition as written, including any leading whitespace and `eval:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    EmptyInput,
    InputTooLarge {
        max_bytes: usize,
        actual_bytes: usize,
    },
    NestingTooDeep {
        max_depth: usize,
        position: usize,
    },
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },
    UnterminatedString {
        position: usize,
    },
    UnknownIdentifier {
        name: String,
        position: usize,
    },
    TrailingInput {
        position: usize,
    },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "condition is empty"),
            Self::InputTooLarge {
                max_bytes,
                actual_bytes,
            } => write!(
                f,
                "condition exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            ),
            Self::NestingTooDeep {
                max_depth,
                position,
            } => write!(
                f,
                "nesting deeper than {max_depth} levels at position {position}"
            ),
            Self::UnexpectedToken {
                expected,
                found,
                position,
            } => write!(
                f,
                "expected {expected} but found `{found}` at position {position}"
            ),
            Self::UnterminatedString { position } => {
                write!(f, "unterminated string starting at position {position}")
            }
            Self::UnknownIdentifier { name, position } => {
                write!(f, "unknown identifier `{name}` at position {position}")
            }
            Self::TrailingInput { position } => {
                write!(f, "unexpected trailing input at position {position}")
            }
        }
    }
}

impl std::error::Error for ConditionError {}

impl ConditionError {
    fn shifted(self, by: usize) -> Self {
        match self {
            Self::NestingTooDeep {
                max_depth,
                position,
            } => Self::NestingTooDeep {
                max_depth,
                position: position + by,
            },
            Self::UnexpectedToken {
                expected,
                found,
                position,
            } => Self::UnexpectedToken {
                expected,
                found,
                position: position + by,
            },
            Self::UnterminatedString { position } => Self::UnterminatedString {
                position: position + by,
            },
            Self::UnknownIdentifier { name, position } => Self::UnknownIdentifier {
                name,
                position: position + by,
            },
            Self::TrailingInput { position } => Self::TrailingInput {
                position: position + by,
            },
            other => other,
        }
    }
}

/// A parsed condition, evaluated against the current record.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        if input.len() > MAX_CONDITION_BYTES {
            return Err(ConditionError::InputTooLarge {
                max_bytes: MAX_CONDITION_BYTES,
                actual_bytes: input.len(),
            });
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::EmptyInput);
        }
        let leading = input.len() - input.trim_start().len();

        let expr = match trimmed.strip_prefix(EVAL_PREFIX) {
            Some(body) => Self::parse_expression(body)
                .map_err(|e| e.shifted(leading + EVAL_PREFIX.len()))?,
            None if is_identifier(trimmed) => Expr::Field(trimmed.to_string()),
            None => {
                return Err(ConditionError::UnexpectedToken {
                    expected: "field name or `eval:` expression",
                    found: trimmed.to_string(),
                    position: leading,
                });
            }
        };

        Ok(Self {
            source: input.to_string(),
            expr,
        })
    }

    fn parse_expression(body: &str) -> Result<Expr, ConditionError> {
        let tokens = Lexer::new(body).lex()?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expression()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, doc: &Doc) -> bool {
        truthy(&self.expr.eval(doc))
    }

    /// Field names the condition reads.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.expr.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Truthiness as applied by the form layer.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(String),
    Literal(Value),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
}

impl Expr {
    fn eval(&self, doc: &Doc) -> Value {
        match self {
            Expr::Field(name) => doc.get(name).cloned().unwrap_or(Value::Null),
            Expr::Literal(v) => v.clone(),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(doc))),
            Expr::And(parts) => Value::Bool(parts.iter().all(|p| truthy(&p.eval(doc)))),
            Expr::Or(parts) => Value::Bool(parts.iter().any(|p| truthy(&p.eval(doc)))),
            Expr::Compare {
                left,
                right,
                negate,
            } => Value::Bool(loose_eq(&left.eval(doc), &right.eval(doc)) != *negate),
        }
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Field(name) => out.push(name.as_str()),
            Expr::Literal(_) => {}
            Expr::Not(inner) => inner.collect_fields(out),
            Expr::And(parts) | Expr::Or(parts) => {
                parts.iter().for_each(|p| p.collect_fields(out));
            }
            Expr::Compare { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
        }
    }
}

/// Equality with numeric coercion, so `doc.enabled == 1` holds for `true`
/// and `doc.amount == '10'` holds for `10`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => false,
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Number(&'a str),
    Str(String),
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Dot,
    LParen,
    RParen,
    Eof,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Number(s) => f.write_str(s),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::Eq => f.write_str("=="),
            Token::NotEq => f.write_str("!="),
            Token::Dot => f.write_str("."),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone)]
struct SpannedToken<'a> {
    token: Token<'a>,
    position: usize,
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    fn lex(&mut self) -> Result<Vec<SpannedToken<'a>>, ConditionError> {
        let mut tokens = Vec::new();
        let bytes = self.input.as_bytes();

        while let Some(&ch) = bytes.get(self.offset) {
            let start = self.offset;
            let token = match ch {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.offset += 1;
                    continue;
                }
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'.' => self.single(Token::Dot),
                b'!' => {
                    if self.peek(bytes, 1) == Some(b'=') {
                        let len = if self.peek(bytes, 2) == Some(b'=') { 3 } else { 2 };
                        self.offset += len;
                        Token::NotEq
                    } else {
                        self.single(Token::Not)
                    }
                }
                b'=' => {
                    if self.peek(bytes, 1) != Some(b'=') {
                        return Err(ConditionError::UnexpectedToken {
                            expected: "==",
                            found: "=".to_string(),
                            position: start,
                        });
                    }
                    let len = if self.peek(bytes, 2) == Some(b'=') { 3 } else { 2 };
                    self.offset += len;
                    Token::Eq
                }
                b'&' => self.pair(bytes, b'&', Token::And, "&&")?,
                b'|' => self.pair(bytes, b'|', Token::Or, "||")?,
                b'\'' | b'"' => Token::Str(self.string(ch)?),
                b'0'..=b'9' => {
                    self.consume_while(bytes, |b| b.is_ascii_digit() || b == b'.');
                    Token::Number(&self.input[start..self.offset])
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    self.consume_while(bytes, |b| b.is_ascii_alphanumeric() || b == b'_');
                    Token::Ident(&self.input[start..self.offset])
                }
                _ => {
                    let found = self.input[start..].chars().next().unwrap_or_default();
                    return Err(ConditionError::UnexpectedToken {
                        expected: "operand or operator",
                        found: found.to_string(),
                        position: start,
                    });
                }
            };
            tokens.push(SpannedToken {
                token,
                position: start,
            });
        }

        if tokens.is_empty() {
            return Err(ConditionError::EmptyInput);
        }
        tokens.push(SpannedToken {
            token: Token::Eof,
            position: self.offset,
        });
        Ok(tokens)
    }

    fn single(&mut self, token: Token<'a>) -> Token<'a> {
        self.offset += 1;
        token
    }

    fn pair(
        &mut self,
        bytes: &[u8],
        second: u8,
        token: Token<'a>,
        expected: &'static str,
    ) -> Result<Token<'a>, ConditionError> {
        if self.peek(bytes, 1) == Some(second) {
            self.offset += 2;
            Ok(token)
        } else {
            Err(ConditionError::UnexpectedToken {
                expected,
                found: char::from(bytes[self.offset]).to_string(),
                position: self.offset,
            })
        }
    }

    fn string(&mut self, quote: u8) -> Result<String, ConditionError> {
        let start = self.offset;
        self.offset += 1;
        let mut out = String::new();
        let mut chars = self.input[self.offset..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                }
                c if c as u32 == quote as u32 => {
                    self.offset += i + 1;
                    return Ok(out);
                }
                c => out.push(c),
            }
        }
        Err(ConditionError::UnterminatedString { position: start })
    }

    fn peek(&self, bytes: &[u8], ahead: usize) -> Option<u8> {
        bytes.get(self.offset + ahead).copied()
    }

    fn consume_while<F>(&mut self, bytes: &[u8], condition: F)
    where
        F: Fn(u8) -> bool,
    {
        while let Some(&b) = bytes.get(self.offset) {
            if !condition(b) {
                break;
            }
            self.offset += 1;
        }
    }
}

// Parser

struct Parser<'a> {
    tokens: Vec<SpannedToken<'a>>,
    index: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<SpannedToken<'a>>) -> Self {
        Self {
            tokens,
            index: 0,
            nesting: 0,
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ConditionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut parts = vec![self.parse_and()?];
        while self.matches(&Token::Or) {
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Or(parts) })
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut parts = vec![self.parse_unary()?];
        while self.matches(&Token::And) {
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::And(parts) })
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.matches(&Token::Not) {
            let inner = self.with_nesting(Self::parse_unary)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_primary()?;
        let negate = match self.current().token {
            Token::Eq => false,
            Token::NotEq => true,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            right: Box::new(right),
            negate,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let SpannedToken { token, position } = self.current().clone();
        match token {
            Token::LParen => {
                self.advance();
                let expr = self.with_nesting(Self::parse_expression)?;
                self.expect(&Token::RParen, ")")?;
                Ok(expr)
            }
            Token::Ident("doc") => {
                self.advance();
                self.expect(&Token::Dot, ".")?;
                let field = match self.current().token {
                    Token::Ident(field) => field,
                    _ => return Err(self.unexpected("field name")),
                };
                self.advance();
                Ok(Expr::Field(field.to_string()))
            }
            Token::Ident("true") => self.literal(Value::Bool(true)),
            Token::Ident("false") => self.literal(Value::Bool(false)),
            Token::Ident("null") | Token::Ident("undefined") => self.literal(Value::Null),
            Token::Ident(name) => Err(ConditionError::UnknownIdentifier {
                name: name.to_string(),
                position,
            }),
            Token::Number(raw) => {
                let value = parse_number(raw).ok_or_else(|| ConditionError::UnexpectedToken {
                    expected: "number",
                    found: raw.to_string(),
                    position,
                })?;
                self.literal(value)
            }
            Token::Str(s) => self.literal(Value::String(s)),
            _ => Err(self.unexpected("operand")),
        }
    }

    fn literal(&mut self, value: Value) -> Result<Expr, ConditionError> {
        self.advance();
        Ok(Expr::Literal(value))
    }

    fn with_nesting<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ConditionError>,
    ) -> Result<T, ConditionError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ConditionError::NestingTooDeep {
                max_depth: MAX_NESTING,
                position: self.current().position,
            });
        }
        let out = f(self);
        self.nesting -= 1;
        out
    }

    fn expect(&mut self, token: &Token<'_>, expected: &'static str) -> Result<(), ConditionError> {
        if self.matches(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_eof(&self) -> Result<(), ConditionError> {
        match self.current().token {
            Token::Eof => Ok(()),
            _ => Err(ConditionError::TrailingInput {
                position: self.current().position,
            }),
        }
    }

    fn matches(&mut self, token: &Token<'_>) -> bool {
        if &self.current().token == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ConditionError {
        let current = self.current();
        ConditionError::UnexpectedToken {
            expected,
            found: current.token.to_string(),
            position: current.position,
        }
    }

    fn current(&self) -> &SpannedToken<'a> {
        // lex() always terminates the stream with Eof and the parser never moves past it
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
