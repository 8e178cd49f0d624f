//! Dynamic condition expressions.
//!
//! Fields may carry expressions that are re-evaluated against the message
//! being encoded or decoded. The language supports:
//!
//! - `this.field` - a field of the message containing the annotated field
//! - `root.a.b` - a field reached from the top-level message
//! - numbers, `"strings"`, `true`, `false`, `null`
//! - `+ - * /` arithmetic on numbers, unary `-`
//! - `== != > >= < <=` comparisons
//! - `!expr`, `expr && expr`, `expr || expr`
//! - `(expr)` - grouping for precedence control
//!
//! Examples:
//! - `this.depth_max * 2` - a bound derived from a sibling field
//! - `root.header.kind == 3` - omit a field unless the header says otherwise
//! - `!this.has_fix || this.quality < 2`

use crate::error::SchemaError;
use crate::value::Value;

/// Which message a field reference starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// The message containing the field being processed.
    This,
    /// The outermost message of the current run.
    Root,
}

/// Resolves field references during evaluation.
pub trait FieldLookup {
    /// Returns the value at a dotted `path` starting from `anchor`, or `None`
    /// when any step is unset.
    fn lookup(&self, anchor: Anchor, path: &str) -> Option<&Value>;
}

/// The result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Operand {
    pub fn is_truthy(&self) -> bool {
        match self {
            Operand::Null => false,
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0,
            Operand::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn loosely_equals(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Null, Operand::Null) => true,
            (Operand::Bool(a), Operand::Bool(b)) => a == b,
            (Operand::Number(a), Operand::Number(b)) => (a - b).abs() < f64::EPSILON,
            (Operand::Str(a), Operand::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&Value> for Operand {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Operand::Bool(*b),
            Value::Int(i) => Operand::Number(*i as f64),
            Value::UInt(u) => Operand::Number(*u as f64),
            Value::Double(d) => Operand::Number(*d),
            Value::Enum(e) => Operand::Number(*e as f64),
            Value::String(s) => Operand::Str(s.clone()),
            Value::Time(t) => Operand::Number(t.timestamp_micros() as f64 / 1e6),
            Value::Message(m) => Operand::Bool(!m.is_empty()),
            Value::Bytes(_) => Operand::Null,
        }
    }
}

/// Binary operators, loosest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Operand),
    Field(Anchor, String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses an expression from a string.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SchemaError::expression("empty expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < s.len() {
            return Err(SchemaError::expression(format!(
                "unexpected input at offset {}: '{}'",
                parser.pos,
                &s[parser.pos..]
            )));
        }
        Ok(expr)
    }

    pub fn evaluate(&self, scope: &dyn FieldLookup) -> Operand {
        match self {
            Expr::Literal(op) => op.clone(),
            Expr::Field(anchor, path) => scope
                .lookup(*anchor, path)
                .map(Operand::from)
                .unwrap_or(Operand::Null),
            Expr::Neg(inner) => match inner.evaluate(scope) {
                Operand::Number(n) => Operand::Number(-n),
                _ => Operand::Null,
            },
            Expr::Not(inner) => Operand::Bool(!inner.evaluate(scope).is_truthy()),
            Expr::Binary(op, left, right) => evaluate_binary(*op, left, right, scope),
        }
    }

    /// Evaluates to a number; anything else is `None`.
    pub fn evaluate_number(&self, scope: &dyn FieldLookup) -> Option<f64> {
        self.evaluate(scope).as_number().filter(|n| n.is_finite())
    }

    pub fn evaluate_bool(&self, scope: &dyn FieldLookup) -> bool {
        self.evaluate(scope).is_truthy()
    }

    /// Lists every field reference in the expression.
    pub fn references(&self) -> Vec<(Anchor, &str)> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<(Anchor, &'a str)>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field(anchor, path) => out.push((*anchor, path.as_str())),
            Expr::Neg(inner) | Expr::Not(inner) => inner.collect_references(out),
            Expr::Binary(_, left, right) => {
                left.collect_references(out);
                right.collect_references(out);
            }
        }
    }
}

fn evaluate_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &dyn FieldLookup) -> Operand {
    // short circuit the logical operators
    match op {
        BinaryOp::Or => {
            return Operand::Bool(left.evaluate_bool(scope) || right.evaluate_bool(scope))
        }
        BinaryOp::And => {
            return Operand::Bool(left.evaluate_bool(scope) && right.evaluate_bool(scope))
        }
        _ => {}
    }

    let l = left.evaluate(scope);
    let r = right.evaluate(scope);
    let numbers = l.as_number().zip(r.as_number());

    match op {
        BinaryOp::Eq => Operand::Bool(l.loosely_equals(&r)),
        BinaryOp::Ne => Operand::Bool(!l.loosely_equals(&r)),
        BinaryOp::Gt => Operand::Bool(numbers.map(|(a, b)| a > b).unwrap_or(false)),
        BinaryOp::Ge => Operand::Bool(numbers.map(|(a, b)| a >= b).unwrap_or(false)),
        BinaryOp::Lt => Operand::Bool(numbers.map(|(a, b)| a < b).unwrap_or(false)),
        BinaryOp::Le => Operand::Bool(numbers.map(|(a, b)| a <= b).unwrap_or(false)),
        BinaryOp::Add => arithmetic(numbers, |a, b| a + b),
        BinaryOp::Sub => arithmetic(numbers, |a, b| a - b),
        BinaryOp::Mul => arithmetic(numbers, |a, b| a * b),
        BinaryOp::Div => match numbers {
            Some((_, b)) if b == 0.0 => Operand::Null,
            _ => arithmetic(numbers, |a, b| a / b),
        },
        BinaryOp::Or | BinaryOp::And => Operand::Null,
    }
}

fn arithmetic(numbers: Option<(f64, f64)>, f: impl Fn(f64, f64) -> f64) -> Operand {
    numbers
        .map(|(a, b)| Operand::Number(f(a, b)))
        .unwrap_or(Operand::Null)
}

/// Recursive descent parser for expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<Expr, SchemaError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SchemaError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SchemaError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_unary()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SchemaError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SchemaError> {
        let left = self.parse_sum()?;
        self.skip_whitespace();

        let op = if self.peek_str("==") {
            Some((BinaryOp::Eq, 2))
        } else if self.peek_str("!=") {
            Some((BinaryOp::Ne, 2))
        } else if self.peek_str(">=") {
            Some((BinaryOp::Ge, 2))
        } else if self.peek_str("<=") {
            Some((BinaryOp::Le, 2))
        } else if self.peek_char() == Some('>') {
            Some((BinaryOp::Gt, 1))
        } else if self.peek_char() == Some('<') {
            Some((BinaryOp::Lt, 1))
        } else {
            None
        };

        match op {
            Some((op, width)) => {
                self.pos += width;
                let right = self.parse_sum()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, SchemaError> {
        let mut left = self.parse_product()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, SchemaError> {
        let mut left = self.parse_operand()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_operand()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr, SchemaError> {
        self.skip_whitespace();

        match self.peek_char() {
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.skip_whitespace();
                if self.peek_char() != Some(')') {
                    return Err(SchemaError::expression("expected ')'"));
                }
                self.pos += 1;
                Ok(expr)
            }
            Some('-') => {
                self.pos += 1;
                let inner = self.parse_operand()?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some('"') => Ok(Expr::Literal(Operand::Str(self.parse_string()?))),
            Some(c) if c.is_ascii_digit() || c == '.' => {
                Ok(Expr::Literal(Operand::Number(self.parse_number()?)))
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_word(),
            Some(c) => Err(SchemaError::expression(format!(
                "unexpected character '{}'",
                c
            ))),
            None => Err(SchemaError::expression("unexpected end of expression")),
        }
    }

    fn parse_word(&mut self) -> Result<Expr, SchemaError> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let word = &self.input[start..self.pos];

        match word {
            "true" => return Ok(Expr::Literal(Operand::Bool(true))),
            "false" => return Ok(Expr::Literal(Operand::Bool(false))),
            "null" => return Ok(Expr::Literal(Operand::Null)),
            _ => {}
        }

        let (anchor, path) = if let Some(path) = word.strip_prefix("this.") {
            (Anchor::This, path)
        } else if let Some(path) = word.strip_prefix("root.") {
            (Anchor::Root, path)
        } else {
            return Err(SchemaError::expression(format!(
                "field '{}' must start with 'this.' or 'root.'",
                word
            )));
        };

        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(SchemaError::expression(format!(
                "malformed field path '{}'",
                word
            )));
        }

        Ok(Expr::Field(anchor, path.to_string()))
    }

    fn parse_string(&mut self) -> Result<String, SchemaError> {
        // opening quote already peeked
        self.pos += 1;

        let mut out = String::new();
        let mut escaped = false;
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return Ok(out);
            } else {
                out.push(c);
            }
        }

        Err(SchemaError::expression("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, SchemaError> {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.') {
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| SchemaError::expression(format!("invalid number: '{}'", num_str)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}
