//! Key template expressions.
//!
//! A template that does not start with [`SIGIL`] is a literal and is used verbatim.
//! Anything else is parsed as a small expression language over the call context:
//!
//! - `#name` refers to a bound variable: each call argument under its parameter name,
//!   `#args` for the full ordered argument list and `#fullMethodName` for the operation
//! - `.field` reads an object property
//! - `[0]` indexes an array, `['key']` indexes an object
//! - `+` concatenates the string forms of its operands
//! - `'text'` / `"text"` and non-negative integers are literals
//!
//! There is no method invocation, no assignment and no access to anything outside the
//! call context.

mod lexer;
mod parser;

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::CallContext;
use parser::Expr;

/// Leading character that marks a template as an expression.
pub const SIGIL: char = '#';

/// Variable bound to the operation identity.
pub const OPERATION_BINDING: &str = "fullMethodName";

/// Variable bound to the full ordered argument list.
pub const ARGS_BINDING: &str = "args";

/// Errors raised while parsing or evaluating a key template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected token {token} at position {pos}")]
    UnexpectedToken { token: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unterminated string literal starting at position {pos}")]
    UnterminatedString { pos: usize },

    #[error("unbound variable #{name}")]
    UnboundVariable { name: String },

    #[error("no such property '{property}'")]
    NoSuchProperty { property: String },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid index {index}")]
    InvalidIndex { index: String },

    #[error("value of type {kind} cannot be indexed")]
    NotIndexable { kind: &'static str },
}

/// A key template, parsed once when it is built and evaluated per call.
///
/// Building a template never fails. A malformed expression keeps its parse error,
/// which [`parse_error`](Self::parse_error) reports at load time and
/// [`evaluate`](Self::evaluate) returns on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Template {
    source: String,
    kind: Kind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Kind {
    #[default]
    Literal,
    Expression(Expr),
    Invalid(ExpressionError),
}

impl Template {
    /// Build a template, parsing it if it carries the sigil.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let kind = if is_expression(&source) {
            match parser::parse(&source) {
                Ok(expr) => Kind::Expression(expr),
                Err(e) => Kind::Invalid(e),
            }
        } else {
            Kind::Literal
        };

        Self { source, kind }
    }

    /// Parse a template, failing on a malformed expression. Literals always succeed.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let template = Self::new(source);
        match template.parse_error() {
            Some(e) => Err(e.clone()),
            None => Ok(template),
        }
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Whether this template is evaluated rather than used verbatim.
    pub fn is_expression(&self) -> bool {
        is_expression(&self.source)
    }

    /// Whether the sigil appears only after the start, so the text is a literal
    /// even though it reads like an expression (`'user_' + #id`).
    pub fn has_inner_sigil(&self) -> bool {
        !self.is_expression() && self.source.contains(SIGIL)
    }

    /// The syntax error of a malformed expression.
    pub fn parse_error(&self) -> Option<&ExpressionError> {
        match &self.kind {
            Kind::Invalid(e) => Some(e),
            _ => None,
        }
    }

    /// Evaluate the template against a call context.
    pub fn evaluate(&self, ctx: &CallContext) -> Result<String, ExpressionError> {
        match &self.kind {
            Kind::Literal => Ok(self.source.clone()),
            Kind::Expression(expr) => Ok(render(&*eval(expr, ctx)?)),
            Kind::Invalid(e) => Err(e.clone()),
        }
    }
}

impl From<String> for Template {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl From<&str> for Template {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<Template> for String {
    fn from(template: Template) -> Self {
        template.source
    }
}

impl PartialEq<&str> for Template {
    fn eq(&self, other: &&str) -> bool {
        self.source == *other
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Whether a template string carries the expression sigil.
pub fn is_expression(template: &str) -> bool {
    template.starts_with(SIGIL)
}

/// Build and evaluate a template in one step.
pub fn evaluate(template: &str, ctx: &CallContext) -> Result<String, ExpressionError> {
    Template::new(template).evaluate(ctx)
}

/// String form of a value as it appears in a limiter key.
///
/// Strings are used raw, `null` is empty, scalars use their canonical text and
/// arrays/objects are rendered as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn eval<'a>(expr: &Expr, ctx: &'a CallContext) -> Result<Cow<'a, Value>, ExpressionError> {
    match expr {
        Expr::Variable(name) => lookup(name, ctx),
        Expr::Str(value) => Ok(Cow::Owned(Value::String(value.clone()))),
        Expr::Int(value) => Ok(Cow::Owned(Value::from(*value))),
        Expr::Property(target, name) => property(eval(target, ctx)?, name),
        Expr::Index(target, index) => {
            let target = eval(target, ctx)?;
            let selector = Selector::from_value(&*eval(index, ctx)?)?;
            select(target, selector)
        }
        Expr::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&render(&*eval(part, ctx)?));
            }
            Ok(Cow::Owned(Value::String(out)))
        }
    }
}

/// Arguments shadow the built-in bindings.
fn lookup<'a>(name: &str, ctx: &'a CallContext) -> Result<Cow<'a, Value>, ExpressionError> {
    if let Some(value) = ctx.argument(name) {
        return Ok(Cow::Borrowed(value));
    }

    match name {
        ARGS_BINDING => Ok(Cow::Owned(Value::Array(ctx.arguments().to_vec()))),
        OPERATION_BINDING => Ok(Cow::Owned(Value::String(ctx.operation().to_string()))),
        _ => Err(ExpressionError::UnboundVariable {
            name: name.to_string(),
        }),
    }
}

fn property<'a>(target: Cow<'a, Value>, name: &str) -> Result<Cow<'a, Value>, ExpressionError> {
    let found = match target {
        Cow::Borrowed(value) => value
            .as_object()
            .and_then(|map| map.get(name))
            .map(Cow::Borrowed),
        Cow::Owned(Value::Object(mut map)) => map.remove(name).map(Cow::Owned),
        Cow::Owned(_) => None,
    };

    found.ok_or_else(|| ExpressionError::NoSuchProperty {
        property: name.to_string(),
    })
}

enum Selector {
    Position(usize),
    Key(String),
}

impl Selector {
    fn from_value(index: &Value) -> Result<Self, ExpressionError> {
        match index {
            Value::Number(n) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .map(Selector::Position)
                .ok_or_else(|| ExpressionError::InvalidIndex {
                    index: n.to_string(),
                }),
            Value::String(key) => Ok(Selector::Key(key.clone())),
            other => Err(ExpressionError::InvalidIndex {
                index: render(other),
            }),
        }
    }
}

fn select(target: Cow<'_, Value>, selector: Selector) -> Result<Cow<'_, Value>, ExpressionError> {
    match (target, selector) {
        (Cow::Borrowed(Value::Array(items)), Selector::Position(i)) => items
            .get(i)
            .map(Cow::Borrowed)
            .ok_or(ExpressionError::IndexOutOfBounds {
                index: i,
                len: items.len(),
            }),
        (Cow::Owned(Value::Array(mut items)), Selector::Position(i)) => {
            if i < items.len() {
                Ok(Cow::Owned(items.swap_remove(i)))
            } else {
                Err(ExpressionError::IndexOutOfBounds {
                    index: i,
                    len: items.len(),
                })
            }
        }
        (Cow::Borrowed(Value::Object(map)), Selector::Key(key)) => map
            .get(&key)
            .map(Cow::Borrowed)
            .ok_or(ExpressionError::NoSuchProperty { property: key }),
        (Cow::Owned(Value::Object(mut map)), Selector::Key(key)) => map
            .remove(&key)
            .map(Cow::Owned)
            .ok_or(ExpressionError::NoSuchProperty { property: key }),
        (other, _) => Err(ExpressionError::NotIndexable {
            kind: kind_name(&other),
        }),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
