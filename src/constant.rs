//! Compile-time constants: named enum/flag values, bound parameters and the
//! evaluator that folds them.
//!
//! The evaluator answers one question about a front-end expression: is it a
//! value known before any document is seen? `Ok(Some(value))` means yes,
//! `Ok(None)` means the expression reads document data, and `Err` means it
//! looked constant but could not be resolved (an unbound parameter, an
//! unknown enum member, an overflow).

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::syntax::{BinOp, Expr, UnaryOp};
use crate::translate::TranslationError;

/// Errors parsing `Type.Member=value` and `name=json` definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("invalid constant definition '{text}': {reason}")]
    Constant { text: String, reason: String },

    #[error("invalid parameter definition '{text}': {reason}")]
    Parameter { text: String, reason: String },
}

/// Named integer constants such as enum members and flag values.
///
/// # Example
/// ```
/// use stagecraft::constant::ConstantTable;
///
/// let constants = ConstantTable::new().with_enum("E", &[("E1", 1), ("E2", 2), ("E4", 4)]);
/// assert_eq!(constants.get("E", "E4"), Some(4));
/// assert_eq!(constants.get("E", "E8"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantTable {
    entries: BTreeMap<(String, String), i64>,
}

impl ConstantTable {
    pub fn new() -> Self {
        ConstantTable::default()
    }

    pub fn insert(&mut self, ty: &str, member: &str, value: i64) {
        self.entries.insert((ty.to_string(), member.to_string()), value);
    }

    pub fn with_enum(mut self, ty: &str, members: &[(&str, i64)]) -> Self {
        for (member, value) in members {
            self.insert(ty, member, *value);
        }
        self
    }

    pub fn get(&self, ty: &str, member: &str) -> Option<i64> {
        self.entries
            .get(&(ty.to_string(), member.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in `(type, member)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, i64)> {
        self.entries
            .iter()
            .map(|((ty, member), value)| (ty.as_str(), member.as_str(), *value))
    }

    /// Parses and inserts a `Type.Member=value` definition.
    pub fn define(&mut self, text: &str) -> Result<(), DefinitionError> {
        let invalid = |reason: &str| DefinitionError::Constant {
            text: text.to_string(),
            reason: reason.to_string(),
        };
        let (name, value) = text.split_once('=').ok_or_else(|| invalid("expected Type.Member=value"))?;
        let (ty, member) = name
            .trim()
            .split_once('.')
            .ok_or_else(|| invalid("expected Type.Member before '='"))?;
        if !is_identifier(ty) || !is_identifier(member) {
            return Err(invalid("type and member must be identifiers"));
        }
        let value = value
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("value must be an integer"))?;
        self.insert(ty, member, value);
        Ok(())
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Everything a translation may resolve without looking at documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationContext {
    constants: ConstantTable,
    parameters: BTreeMap<String, Value>,
}

impl TranslationContext {
    pub fn new() -> Self {
        TranslationContext::default()
    }

    pub fn with_constants(mut self, constants: ConstantTable) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn bind(&mut self, name: &str, value: impl Into<Value>) {
        self.parameters.insert(name.to_string(), value.into());
    }

    /// Parses and binds a `name=json` definition; a value that is not valid
    /// JSON is bound as a string.
    pub fn define_parameter(&mut self, text: &str) -> Result<(), DefinitionError> {
        let (name, value) = text.split_once('=').ok_or_else(|| DefinitionError::Parameter {
            text: text.to_string(),
            reason: "expected name=value".to_string(),
        })?;
        let name = name.trim().trim_start_matches('$');
        if !is_identifier(name) {
            return Err(DefinitionError::Parameter {
                text: text.to_string(),
                reason: format!("'{}' is not a valid parameter name", name),
            });
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        self.bind(name, value);
        Ok(())
    }

    pub fn constants(&self) -> &ConstantTable {
        &self.constants
    }

    pub fn constants_mut(&mut self) -> &mut ConstantTable {
        &mut self.constants
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Parameters in name order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.parameters.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Folds `expr` to a value if it does not depend on document data.
pub fn try_evaluate(expr: &Expr, context: &TranslationContext) -> Result<Option<Value>, TranslationError> {
    match expr {
        Expr::Integer(n) => Ok(Some(Value::from(*n))),
        Expr::Float(n) => Ok(Some(float(*n, expr)?)),
        Expr::String(s) => Ok(Some(Value::String(s.clone()))),
        Expr::Boolean(b) => Ok(Some(Value::Bool(*b))),
        Expr::Null => Ok(Some(Value::Null)),

        Expr::Param(name) => context
            .parameter(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| TranslationError::unsupported(expr, format!("parameter ${} is not bound", name))),

        Expr::EnumConstant { ty, member } => context
            .constants()
            .get(ty, member)
            .map(|value| Some(Value::from(value)))
            .ok_or_else(|| TranslationError::unsupported(expr, format!("unknown constant {}.{}", ty, member))),

        Expr::UnaryOp { op, operand } => {
            let Some(value) = try_evaluate(operand, context)? else {
                return Ok(None);
            };
            match op {
                UnaryOp::Negate => negate(&value, expr).map(Some),
                UnaryOp::Not => match value {
                    Value::Bool(b) => Ok(Some(Value::Bool(!b))),
                    _ => Err(TranslationError::unsupported(expr, "'not' requires a boolean")),
                },
            }
        }

        Expr::BinaryOp { op, left, right } => {
            let folds = matches!(
                op,
                BinOp::Add
                    | BinOp::Subtract
                    | BinOp::Multiply
                    | BinOp::Divide
                    | BinOp::Modulo
                    | BinOp::BitAnd
                    | BinOp::BitOr
                    | BinOp::NullCoalesce
            );
            if !folds {
                return Ok(None);
            }
            let Some(left) = try_evaluate(left, context)? else {
                return Ok(None);
            };
            let Some(right) = try_evaluate(right, context)? else {
                return Ok(None);
            };
            arithmetic(*op, &left, &right, expr).map(Some)
        }

        Expr::Array(elements) => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                match try_evaluate(element, context)? {
                    Some(value) => values.push(value),
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Array(values)))
        }

        Expr::Object(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                match try_evaluate(value, context)? {
                    Some(value) => {
                        map.insert(key.clone(), value);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Object(map)))
        }

        Expr::Root
        | Expr::LambdaParam
        | Expr::Key(_)
        | Expr::Access { .. }
        | Expr::Filter(_)
        | Expr::MethodCall { .. } => Ok(None),
    }
}

/// Folds `expr` to an integer. Constants of any other type are an error.
pub fn evaluate_integer(expr: &Expr, context: &TranslationContext) -> Result<Option<i64>, TranslationError> {
    match try_evaluate(expr, context)? {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| TranslationError::unsupported(expr, format!("expected an integer constant, got {}", value))),
    }
}

fn float(n: f64, expr: &Expr) -> Result<Value, TranslationError> {
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| TranslationError::unsupported(expr, "result is not a finite number"))
}

fn negate(value: &Value, expr: &Expr) -> Result<Value, TranslationError> {
    if let Some(n) = value.as_i64() {
        return n
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| TranslationError::unsupported(expr, "integer overflow"));
    }
    match value.as_f64() {
        Some(n) => float(-n, expr),
        None => Err(TranslationError::unsupported(expr, "'-' requires a number")),
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value, expr: &Expr) -> Result<Value, TranslationError> {
    if op == BinOp::NullCoalesce {
        return Ok(if left.is_null() { right.clone() } else { left.clone() });
    }
    if let (Value::String(a), Value::String(b), BinOp::Add) = (left, right, op) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let overflow = || TranslationError::unsupported(expr, "integer overflow");
        let result = match op {
            BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
            BinOp::Subtract => a.checked_sub(b).ok_or_else(overflow)?,
            BinOp::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::Modulo => {
                if b == 0 {
                    return Err(TranslationError::unsupported(expr, "modulo by zero"));
                }
                a.checked_rem(b).ok_or_else(overflow)?
            }
            BinOp::Divide => {
                if b == 0 {
                    return Err(TranslationError::unsupported(expr, "division by zero"));
                }
                // Division yields a double unless it is exact
                if a.checked_rem(b) == Some(0) {
                    a.checked_div(b).ok_or_else(overflow)?
                } else {
                    return float(a as f64 / b as f64, expr);
                }
            }
            _ => return Err(TranslationError::unsupported(expr, format!("'{}' cannot be folded", op))),
        };
        return Ok(Value::from(result));
    }

    if matches!(op, BinOp::BitAnd | BinOp::BitOr) {
        return Err(TranslationError::unsupported(
            expr,
            format!("'{}' requires integer operands", op),
        ));
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(TranslationError::unsupported(
            expr,
            format!("'{}' requires numeric operands", op),
        ));
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Subtract => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => a / b,
        BinOp::Modulo => a % b,
        _ => return Err(TranslationError::unsupported(expr, format!("'{}' cannot be folded", op))),
    };
    float(result, expr)
}
