//! Guard expression evaluation.
//!
//! Guards registered as expressions (in a definition's `guards` table or
//! written inline on a transition) are boolean expressions over three roots:
//!
//! - `ctx.field` - context value (truthy check)
//! - `event.field` - field of the event being dispatched
//! - `prop.field` - construction-time prop
//!
//! Paths may be nested (`ctx.order.paid`). Supported operators:
//! `==`, `!=` (strings, numbers, booleans, null), `>`, `>=`, `<`, `<=`
//! (numbers), `!`, `&&` (binds tighter than `||`), `||` and parentheses.
//!
//! Examples:
//! - `ctx.enabled && !prop.disabled`
//! - `event.value == "on" || ctx.count >= 3`

use crate::error::CoreError;
use serde_json::{Map, Value};

/// Root a field path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Root {
    Ctx,
    Event,
    Prop,
}

impl Root {
    const ALL: [(Root, &'static str); 3] = [
        (Root::Ctx, "ctx."),
        (Root::Event, "event."),
        (Root::Prop, "prop."),
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Root::Ctx => "ctx.",
            Root::Event => "event.",
            Root::Prop => "prop.",
        }
    }
}

/// Anything a guard can read fields from.
pub trait FieldSource {
    /// Returns the value at `path` under `root`, `Value::Null` when missing.
    fn field(&self, root: Root, path: &str) -> Value;
}

/// A bare JSON object acts as the `ctx` root; other roots read as null.
impl FieldSource for Value {
    fn field(&self, root: Root, path: &str) -> Value {
        match root {
            Root::Ctx => lookup_path(self, path),
            _ => Value::Null,
        }
    }
}

/// A field reference such as `ctx.order.paid`.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub root: Root,
    pub path: String,
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    Truthy(Field),
    Eq(Field, Value),
    Ne(Field, Value),
    Gt(Field, f64),
    Ge(Field, f64),
    Lt(Field, f64),
    Le(Field, f64),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidGuard {
                reason: "empty guard expression".to_string(),
            });
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < s.len() {
            return Err(CoreError::InvalidGuard {
                reason: format!("unexpected input at '{}'", &s[parser.pos..]),
            });
        }
        Ok(expr)
    }

    /// True when `s` is written as an expression rather than a guard name.
    pub fn looks_like_expression(s: &str) -> bool {
        let s = s.trim_start();
        s.starts_with('!')
            || s.starts_with('(')
            || Root::ALL.iter().any(|(_, prefix)| s.starts_with(prefix))
    }

    /// Evaluates the guard against a field source.
    pub fn evaluate(&self, source: &dyn FieldSource) -> bool {
        let read = |field: &Field| source.field(field.root, &field.path);
        match self {
            GuardExpr::Truthy(field) => is_truthy(&read(field)),
            GuardExpr::Eq(field, expected) => values_equal(&read(field), expected),
            GuardExpr::Ne(field, expected) => !values_equal(&read(field), expected),
            GuardExpr::Gt(field, n) => as_f64(&read(field)).is_some_and(|v| v > *n),
            GuardExpr::Ge(field, n) => as_f64(&read(field)).is_some_and(|v| v >= *n),
            GuardExpr::Lt(field, n) => as_f64(&read(field)).is_some_and(|v| v < *n),
            GuardExpr::Le(field, n) => as_f64(&read(field)).is_some_and(|v| v <= *n),
            GuardExpr::And(left, right) => left.evaluate(source) && right.evaluate(source),
            GuardExpr::Or(left, right) => left.evaluate(source) || right.evaluate(source),
            GuardExpr::Not(inner) => !inner.evaluate(source),
        }
    }
}

/// Walks a dotted path through nested objects.
pub fn lookup_path(value: &Value, path: &str) -> Value {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part).unwrap_or(&Value::Null),
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Walks a dotted path whose first segment is a key of `map`.
pub fn lookup_map(map: &Map<String, Value>, path: &str) -> Value {
    let (key, rest) = match path.split_once('.') {
        Some((key, rest)) => (key, Some(rest)),
        None => (path, None),
    };
    match (map.get(key), rest) {
        (Some(value), Some(rest)) => lookup_path(value, rest),
        (Some(value), None) => value.clone(),
        (None, _) => Value::Null,
    }
}

/// JSON truthiness: null, false, 0, "", [] and {} are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

/// Recursive descent parser.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<GuardExpr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.eat("||") {
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        if self.eat("(") {
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let field = self.parse_field()?;
        self.skip_whitespace();

        // Two-character operators first so `>=` is not read as `>`.
        if self.eat("==") {
            return Ok(GuardExpr::Eq(field, self.parse_value()?));
        }
        if self.eat("!=") {
            return Ok(GuardExpr::Ne(field, self.parse_value()?));
        }
        if self.eat(">=") {
            return Ok(GuardExpr::Ge(field, self.parse_number()?));
        }
        if self.eat("<=") {
            return Ok(GuardExpr::Le(field, self.parse_number()?));
        }
        if self.eat(">") {
            return Ok(GuardExpr::Gt(field, self.parse_number()?));
        }
        if self.eat("<") {
            return Ok(GuardExpr::Lt(field, self.parse_number()?));
        }

        Ok(GuardExpr::Truthy(field))
    }

    fn parse_field(&mut self) -> Result<Field, CoreError> {
        self.skip_whitespace();

        let root = Root::ALL
            .iter()
            .find(|(_, prefix)| self.peek_str(prefix))
            .map(|(root, _)| *root)
            .ok_or_else(|| invalid("field must start with 'ctx.', 'event.' or 'prop.'"))?;
        self.pos += root.prefix().len();

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let path = &self.input[start..self.pos];
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(invalid(format!("empty field name after '{}'", root.prefix())));
        }

        Ok(Field {
            root,
            path: path.to_string(),
        })
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();

        for (literal, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.eat(literal) {
                return Ok(value);
            }
        }

        if self.peek_char() == Some('"') {
            return self.parse_string();
        }

        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("number out of range: {}", num)))
    }

    fn parse_string(&mut self) -> Result<Value, CoreError> {
        self.pos += 1;
        let mut out = String::new();

        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(Value::String(out)),
                '\\' => {
                    let escaped = self
                        .peek_char()
                        .ok_or_else(|| invalid("unterminated string"))?;
                    self.pos += escaped.len_utf8();
                    out.push(escaped);
                }
                _ => out.push(c),
            }
        }

        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        self.skip_digits();
        if self.peek_char() == Some('.') {
            self.pos += 1;
            self.skip_digits();
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| invalid(format!("invalid number: '{}'", num_str)))
    }

    fn skip_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, s: &str) -> bool {
        self.skip_whitespace();
        if self.peek_str(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}
