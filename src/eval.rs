//! # Reference evaluator
//!
//! Runs a compiled [`AstPipeline`] over in-memory documents with the
//! server's semantics for the operators this crate emits. It backs the
//! `run` CLI command and lets tests check what a pipeline *selects*, not
//! only what it renders.
//!
//! ```
//! use serde_json::json;
//! use stagecraft::ast::{AstFilter, AstFilterField, AstFilterOperation, AstPipeline, AstStage};
//! use stagecraft::eval::Evaluator;
//!
//! let filter = AstFilter::field_operation(
//!     AstFilterField::path("E").unwrap(),
//!     AstFilterOperation::bits_all_clear(6).unwrap(),
//! );
//! let pipeline = AstPipeline::new(vec![AstStage::match_filter(filter)]);
//! let documents = vec![json!({"E": 1}), json!({"E": 2}), json!({"E": 8})];
//!
//! let selected = Evaluator::new().run(&pipeline, documents).unwrap();
//! assert_eq!(selected, vec![json!({"E": 1}), json!({"E": 8})]);
//! ```
//!
//! Missing fields evaluate to `null` in expressions; `$type` of a missing
//! field is therefore `"null"`, not `"missing"`.

use std::cmp::Ordering;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::{
    AstAccumulatorExpression, AstAccumulatorOperator, AstBinaryOperator, AstComparisonOperator,
    AstExpression, AstFilter, AstFilterField, AstFilterOperation, AstNaryOperator, AstNode,
    AstPipeline, AstProjectStageSpecification, AstSortOrder, AstStage, AstUnaryOperator,
};
use crate::value::{
    as_integer, compare_values, from_decimal, has_type, is_truthy, same_bracket, to_decimal,
    type_name, values_equal,
};

/// Errors raised while evaluating a pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid regular expression /{pattern}/: {reason}")]
    Regex { pattern: String, reason: String },

    #[error("unbound variable $${0}")]
    UnboundVariable(String),
}

/// Variables in scope while evaluating an expression.
#[derive(Debug, Clone)]
struct EvalContext<'a> {
    /// The document being processed (`$$ROOT`)
    root: &'a Value,
    /// Variables bound by `$filter` and `$map`, innermost last
    bindings: Vec<(String, Value)>,
}

impl<'a> EvalContext<'a> {
    fn new(root: &'a Value) -> Self {
        EvalContext {
            root,
            bindings: Vec::new(),
        }
    }

    fn with_binding(&self, name: &str, value: Value) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.push((name.to_string(), value));
        EvalContext {
            root: self.root,
            bindings,
        }
    }

    fn variable(&self, name: &str) -> Result<Value, EvalError> {
        if let Some((_, value)) = self.bindings.iter().rev().find(|(bound, _)| bound == name) {
            return Ok(value.clone());
        }
        match name {
            "ROOT" | "CURRENT" => Ok(self.root.clone()),
            other => Err(EvalError::UnboundVariable(other.to_string())),
        }
    }
}

/// Interprets pipelines, filters and expressions against documents.
#[derive(Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Evaluator
    }

    /// Runs every stage in order and returns the output documents.
    pub fn run(&self, pipeline: &AstPipeline, documents: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let mut current = documents;
        for stage in pipeline.stages() {
            let before = current.len();
            current = self.run_stage(stage, current)?;
            debug!(stage = %stage.node_type(), before, after = current.len(), "evaluated stage");
        }
        Ok(current)
    }

    /// Whether `document` satisfies `filter`.
    pub fn matches(&self, filter: &AstFilter, document: &Value) -> Result<bool, EvalError> {
        match filter {
            AstFilter::FieldOperation(node) => {
                let mut candidates = Vec::new();
                match node.field() {
                    AstFilterField::Path(path) => {
                        let segments: Vec<&str> = path.split('.').collect();
                        lookup(document, &segments, &mut candidates);
                    }
                    AstFilterField::Element => candidates.push(document),
                }
                self.matches_operation(node.operation(), &candidates)
            }
            AstFilter::And(node) => {
                for arg in node.args() {
                    if !self.matches(arg, document)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            AstFilter::Or(node) => {
                for arg in node.args() {
                    if self.matches(arg, document)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            AstFilter::Nor(node) => {
                for arg in node.args() {
                    if self.matches(arg, document)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            AstFilter::Not(node) => Ok(!self.matches(node.filter(), document)?),
            AstFilter::Expr(node) => {
                let value = self.eval(node.expression(), &EvalContext::new(document))?;
                Ok(is_truthy(&value))
            }
        }
    }

    /// Evaluates an aggregation expression with `document` as `$$ROOT`.
    pub fn evaluate(&self, expression: &AstExpression, document: &Value) -> Result<Value, EvalError> {
        self.eval(expression, &EvalContext::new(document))
    }

    fn run_stage(&self, stage: &AstStage, documents: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        match stage {
            AstStage::Match(node) => {
                let mut selected = Vec::with_capacity(documents.len());
                for document in documents {
                    if self.matches(node.filter(), &document)? {
                        selected.push(document);
                    }
                }
                Ok(selected)
            }
            AstStage::Project(node) => documents
                .iter()
                .map(|document| self.project(node.specifications(), document))
                .collect(),
            AstStage::ReplaceRoot(node) => documents
                .iter()
                .map(|document| match self.evaluate(node.expression(), document)? {
                    root @ Value::Object(_) => Ok(root),
                    other => Err(EvalError::Type(format!(
                        "$replaceRoot requires a document, got {}",
                        type_name(&other)
                    ))),
                })
                .collect(),
            AstStage::AddFields(node) => documents
                .iter()
                .map(|document| {
                    let mut output = document.clone();
                    for field in node.fields() {
                        let value = self.evaluate(field.value(), document)?;
                        set_path(&mut output, field.path(), value);
                    }
                    Ok(output)
                })
                .collect(),
            AstStage::Group(node) => self.group(node.id(), node.accumulators(), &documents),
            AstStage::Sort(node) => {
                let mut documents = documents;
                documents.sort_by(|a, b| {
                    node.fields()
                        .iter()
                        .map(|field| {
                            let ordering = compare_values(&field_value(a, field.path()), &field_value(b, field.path()));
                            match field.order() {
                                AstSortOrder::Ascending => ordering,
                                AstSortOrder::Descending => ordering.reverse(),
                            }
                        })
                        .find(|ordering| ordering.is_ne())
                        .unwrap_or(Ordering::Equal)
                });
                Ok(documents)
            }
            AstStage::Skip(node) => {
                let skip = usize::try_from(node.skip()).unwrap_or(usize::MAX);
                Ok(documents.into_iter().skip(skip).collect())
            }
            AstStage::Limit(node) => {
                let limit = usize::try_from(node.limit()).unwrap_or(usize::MAX);
                Ok(documents.into_iter().take(limit).collect())
            }
            AstStage::Unwind(node) => {
                let mut output = Vec::with_capacity(documents.len());
                for document in documents {
                    match field_value(&document, node.path()) {
                        Value::Array(items) if !items.is_empty() => {
                            for item in items {
                                let mut unwound = document.clone();
                                set_path(&mut unwound, node.path(), item);
                                output.push(unwound);
                            }
                        }
                        Value::Array(_) => {
                            if node.preserve_null_and_empty_arrays() {
                                let mut kept = document;
                                remove_path(&mut kept, node.path());
                                output.push(kept);
                            }
                        }
                        Value::Null => {
                            if node.preserve_null_and_empty_arrays() {
                                output.push(document);
                            }
                        }
                        _ => output.push(document),
                    }
                }
                Ok(output)
            }
            AstStage::Count(node) => {
                if documents.is_empty() {
                    return Ok(Vec::new());
                }
                let mut counted = Map::new();
                counted.insert(node.name().to_string(), Value::from(documents.len()));
                Ok(vec![Value::Object(counted)])
            }
        }
    }

    fn project(&self, specifications: &[AstProjectStageSpecification], document: &Value) -> Result<Value, EvalError> {
        let inclusive = specifications.iter().any(|specification| {
            matches!(
                specification,
                AstProjectStageSpecification::Include(_) | AstProjectStageSpecification::Set { .. }
            )
        });

        if !inclusive {
            let mut output = document.clone();
            for specification in specifications {
                remove_path(&mut output, specification.path());
            }
            return Ok(output);
        }

        let mut output = Value::Object(Map::new());
        let keep_id = !specifications
            .iter()
            .any(|specification| matches!(specification, AstProjectStageSpecification::Exclude(path) if path == "_id"));
        if keep_id && let Some(id) = document.get("_id") {
            set_path(&mut output, "_id", id.clone());
        }
        for specification in specifications {
            match specification {
                AstProjectStageSpecification::Include(path) => {
                    let segments: Vec<&str> = path.split('.').collect();
                    if let Some(value) = get_path(document, &segments) {
                        set_path(&mut output, path, value);
                    }
                }
                AstProjectStageSpecification::Exclude(_) => {}
                AstProjectStageSpecification::Set { path, value } => {
                    let value = self.evaluate(value, document)?;
                    set_path(&mut output, path, value);
                }
            }
        }
        Ok(output)
    }

    fn group(
        &self,
        id: &AstExpression,
        accumulators: &[(String, Arc<AstAccumulatorExpression>)],
        documents: &[Value],
    ) -> Result<Vec<Value>, EvalError> {
        // Groups in first-seen order, each with one value list per accumulator
        let mut groups: Vec<(Value, Vec<Vec<Value>>)> = Vec::new();
        for document in documents {
            let key = self.evaluate(id, document)?;
            let index = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
                Some(index) => index,
                None => {
                    groups.push((key, vec![Vec::new(); accumulators.len()]));
                    groups.len() - 1
                }
            };
            for (slot, (_, accumulator)) in accumulators.iter().enumerate() {
                let value = self.evaluate(accumulator.arg(), document)?;
                groups[index].1[slot].push(value);
            }
        }

        groups
            .into_iter()
            .map(|(key, collected)| {
                let mut output = Map::new();
                output.insert("_id".to_string(), key);
                for ((name, accumulator), values) in accumulators.iter().zip(collected) {
                    output.insert(name.clone(), accumulate(accumulator.operator(), values)?);
                }
                Ok(Value::Object(output))
            })
            .collect()
    }

    fn matches_operation(&self, operation: &AstFilterOperation, candidates: &[&Value]) -> Result<bool, EvalError> {
        let result = match operation {
            AstFilterOperation::Comparison(node) => {
                let expected = node.value();
                match node.operator() {
                    AstComparisonOperator::Eq => equals_any(candidates, expected),
                    AstComparisonOperator::Ne => !equals_any(candidates, expected),
                    operator => any_element(candidates, |value| {
                        same_bracket(value, expected) && {
                            let ordering = compare_values(value, expected);
                            match operator {
                                AstComparisonOperator::Gt => ordering.is_gt(),
                                AstComparisonOperator::Gte => ordering.is_ge(),
                                AstComparisonOperator::Lt => ordering.is_lt(),
                                AstComparisonOperator::Lte => ordering.is_le(),
                                AstComparisonOperator::Eq | AstComparisonOperator::Ne => false,
                            }
                        }
                    }),
                }
            }
            AstFilterOperation::BitsAllClear(node) => {
                let mask = node.mask();
                any_element(candidates, |value| as_integer(value).is_some_and(|v| v & mask == 0))
            }
            AstFilterOperation::BitsAllSet(node) => {
                let mask = node.mask();
                any_element(candidates, |value| as_integer(value).is_some_and(|v| v & mask == mask))
            }
            AstFilterOperation::BitsAnyClear(node) => {
                let mask = node.mask();
                any_element(candidates, |value| as_integer(value).is_some_and(|v| v & mask != mask))
            }
            AstFilterOperation::BitsAnySet(node) => {
                let mask = node.mask();
                any_element(candidates, |value| as_integer(value).is_some_and(|v| v & mask != 0))
            }
            AstFilterOperation::In(node) => node.values().iter().any(|value| equals_any(candidates, value)),
            AstFilterOperation::Nin(node) => !node.values().iter().any(|value| equals_any(candidates, value)),
            AstFilterOperation::Exists(node) => candidates.is_empty() != node.exists(),
            AstFilterOperation::Regex(node) => {
                let regex = compile_regex(node.pattern(), node.options())?;
                any_element(candidates, |value| matches!(value, Value::String(s) if regex.is_match(s)))
            }
            AstFilterOperation::Size(node) => candidates.iter().any(|value| {
                matches!(value, Value::Array(items) if i64::try_from(items.len()).is_ok_and(|n| n == node.size()))
            }),
            AstFilterOperation::Type(node) => candidates.iter().any(|value| {
                has_type(value, node.alias())
                    || matches!(value, Value::Array(items) if items.iter().any(|item| has_type(item, node.alias())))
            }),
            AstFilterOperation::Mod(node) => any_element(candidates, |value| {
                let truncated = match value {
                    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
                    _ => None,
                };
                truncated.is_some_and(|v| v % node.divisor() == node.remainder())
            }),
            AstFilterOperation::ElemMatch(node) => {
                let mut matched = false;
                for candidate in candidates {
                    if let Value::Array(items) = candidate {
                        for item in items {
                            if self.matches(node.filter(), item)? {
                                matched = true;
                                break;
                            }
                        }
                    }
                    if matched {
                        break;
                    }
                }
                matched
            }
            AstFilterOperation::Not(node) => !self.matches_operation(node.operation(), candidates)?,
        };
        trace!(operation = %operation.node_type(), candidates = candidates.len(), result, "matched operation");
        Ok(result)
    }

    fn eval(&self, expression: &AstExpression, context: &EvalContext<'_>) -> Result<Value, EvalError> {
        match expression {
            AstExpression::Constant(node) => Ok(node.value().clone()),
            AstExpression::Field(node) => {
                let segments: Vec<&str> = node.path().split('.').collect();
                let base = match node.variable() {
                    None => context.root.clone(),
                    Some(variable) => context.variable(variable)?,
                };
                Ok(get_path(&base, &segments).unwrap_or(Value::Null))
            }
            AstExpression::Variable(node) => context.variable(node.name()),
            AstExpression::Unary(node) => {
                let arg = self.eval(node.arg(), context)?;
                apply_unary(node.operator(), arg)
            }
            AstExpression::Binary(node) => {
                let left = self.eval(node.arg1(), context)?;
                let right = self.eval(node.arg2(), context)?;
                apply_binary(node.operator(), &left, &right)
            }
            AstExpression::Nary(node) => {
                let args = node
                    .args()
                    .iter()
                    .map(|arg| self.eval(arg, context))
                    .collect::<Result<Vec<_>, _>>()?;
                apply_nary(node.operator(), &args)
            }
            AstExpression::ComputedDocument(node) => {
                let mut map = Map::new();
                for (name, value) in node.fields() {
                    map.insert(name.clone(), self.eval(value, context)?);
                }
                Ok(Value::Object(map))
            }
            AstExpression::ComputedArray(node) => node
                .items()
                .iter()
                .map(|item| self.eval(item, context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            AstExpression::GetField(node) => match self.eval(node.input(), context)? {
                Value::Object(map) => Ok(map.get(node.field()).cloned().unwrap_or(Value::Null)),
                _ => Ok(Value::Null),
            },
            AstExpression::ArrayFilter(node) => match self.eval(node.input(), context)? {
                Value::Array(items) => {
                    let mut kept = Vec::new();
                    for item in items {
                        let scope = context.with_binding(node.variable(), item.clone());
                        if is_truthy(&self.eval(node.cond(), &scope)?) {
                            kept.push(item);
                        }
                    }
                    Ok(Value::Array(kept))
                }
                Value::Null => Ok(Value::Null),
                other => Err(EvalError::Type(format!("$filter requires an array, got {}", type_name(&other)))),
            },
            AstExpression::Map(node) => match self.eval(node.input(), context)? {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| self.eval(node.body(), &context.with_binding(node.variable(), item)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                Value::Null => Ok(Value::Null),
                other => Err(EvalError::Type(format!("$map requires an array, got {}", type_name(&other)))),
            },
        }
    }
}

/// Collects the values a match-language path reaches. Arrays along the way
/// are traversed element-wise, and a numeric segment also indexes them.
fn lookup<'v>(value: &'v Value, segments: &[&str], out: &mut Vec<&'v Value>) {
    let Some((first, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*first) {
                lookup(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = first.parse::<usize>()
                && let Some(item) = items.get(index)
            {
                lookup(item, rest, out);
            }
            for item in items {
                if item.is_object() {
                    lookup(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// Aggregation path resolution: arrays of documents yield the array of
/// their field values.
fn get_path(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => map.get(*first).and_then(|child| get_path(child, rest)),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| item.is_object() || item.is_array())
                .filter_map(|item| get_path(item, segments))
                .collect(),
        )),
        _ => None,
    }
}

fn field_value(document: &Value, path: &str) -> Value {
    let segments: Vec<&str> = path.split('.').collect();
    get_path(document, &segments).unwrap_or(Value::Null)
}

fn set_path(document: &mut Value, path: &str, value: Value) {
    let mut current = document;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn remove_path(document: &mut Value, path: &str) {
    match path.split_once('.') {
        None => {
            if let Value::Object(map) = document {
                map.shift_remove(path);
            }
        }
        Some((first, rest)) => match document {
            Value::Object(map) => {
                if let Some(child) = map.get_mut(first) {
                    remove_path(child, rest);
                }
            }
            Value::Array(items) => {
                for item in items {
                    remove_path(item, path);
                }
            }
            _ => {}
        },
    }
}

/// Applies `test` to each candidate and, for array candidates, to each of
/// their elements.
fn any_element(candidates: &[&Value], test: impl Fn(&Value) -> bool) -> bool {
    candidates.iter().any(|value| match value {
        Value::Array(items) => test(value) || items.iter().any(&test),
        value => test(value),
    })
}

fn equals_any(candidates: &[&Value], expected: &Value) -> bool {
    if candidates.is_empty() {
        return expected.is_null();
    }
    any_element(candidates, |value| values_equal(value, expected))
}

fn compile_regex(pattern: &str, options: &str) -> Result<Regex, EvalError> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|error| EvalError::Regex {
            pattern: pattern.to_string(),
            reason: error.to_string(),
        })
}

fn numbers(values: &[Value]) -> Vec<Decimal> {
    values
        .iter()
        .filter_map(|value| match value {
            Value::Number(n) => to_decimal(n),
            _ => None,
        })
        .collect()
}

fn sum(values: &[Value]) -> Result<Value, EvalError> {
    numbers(values)
        .into_iter()
        .try_fold(Decimal::ZERO, |total, n| total.checked_add(n))
        .map(from_decimal)
        .ok_or_else(|| EvalError::Type("$sum overflowed".to_string()))
}

fn avg(values: &[Value]) -> Result<Value, EvalError> {
    let numbers = numbers(values);
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    let total = numbers
        .iter()
        .try_fold(Decimal::ZERO, |total, n| total.checked_add(*n))
        .ok_or_else(|| EvalError::Type("$avg overflowed".to_string()))?;
    Ok(from_decimal(total / Decimal::from(numbers.len())))
}

fn extreme(values: &[Value], wanted: Ordering) -> Value {
    values
        .iter()
        .filter(|value| !value.is_null())
        .fold(None, |best: Option<&Value>, value| match best {
            Some(best) if compare_values(value, best) != wanted => Some(best),
            _ => Some(value),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn accumulate(operator: AstAccumulatorOperator, values: Vec<Value>) -> Result<Value, EvalError> {
    Ok(match operator {
        AstAccumulatorOperator::Sum => sum(&values)?,
        AstAccumulatorOperator::Avg => avg(&values)?,
        AstAccumulatorOperator::Min => extreme(&values, Ordering::Less),
        AstAccumulatorOperator::Max => extreme(&values, Ordering::Greater),
        AstAccumulatorOperator::First => values.into_iter().next().unwrap_or(Value::Null),
        AstAccumulatorOperator::Last => values.into_iter().last().unwrap_or(Value::Null),
        AstAccumulatorOperator::Push => Value::Array(values),
        AstAccumulatorOperator::AddToSet => {
            let mut unique: Vec<Value> = Vec::new();
            for value in values {
                if !unique.iter().any(|existing| values_equal(existing, &value)) {
                    unique.push(value);
                }
            }
            Value::Array(unique)
        }
    })
}

fn apply_unary(operator: AstUnaryOperator, arg: Value) -> Result<Value, EvalError> {
    let name = operator.operator_name();
    match operator {
        AstUnaryOperator::Abs => match &arg {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => to_decimal(n)
                .map(|d| from_decimal(d.abs()))
                .ok_or_else(|| EvalError::Type(format!("{} argument out of range", name))),
            other => Err(EvalError::Type(format!("{} requires a number, got {}", name, type_name(other)))),
        },
        AstUnaryOperator::AllElementsTrue | AstUnaryOperator::AnyElementTrue => match &arg {
            Value::Array(items) => Ok(Value::Bool(if operator == AstUnaryOperator::AllElementsTrue {
                items.iter().all(is_truthy)
            } else {
                items.iter().any(is_truthy)
            })),
            other => Err(EvalError::Type(format!("{} requires an array, got {}", name, type_name(other)))),
        },
        AstUnaryOperator::Sum | AstUnaryOperator::Avg | AstUnaryOperator::Min | AstUnaryOperator::Max => {
            let values = match arg {
                Value::Array(items) => items,
                other => vec![other],
            };
            match operator {
                AstUnaryOperator::Sum => sum(&values),
                AstUnaryOperator::Avg => avg(&values),
                AstUnaryOperator::Min => Ok(extreme(&values, Ordering::Less)),
                _ => Ok(extreme(&values, Ordering::Greater)),
            }
        }
        AstUnaryOperator::First | AstUnaryOperator::Last => match arg {
            Value::Array(items) => {
                let picked = if operator == AstUnaryOperator::First {
                    items.into_iter().next()
                } else {
                    items.into_iter().last()
                };
                Ok(picked.unwrap_or(Value::Null))
            }
            Value::Null => Ok(Value::Null),
            other => Err(EvalError::Type(format!("{} requires an array, got {}", name, type_name(&other)))),
        },
        AstUnaryOperator::Not => Ok(Value::Bool(!is_truthy(&arg))),
        AstUnaryOperator::Size => match &arg {
            Value::Array(items) => Ok(Value::from(items.len())),
            other => Err(EvalError::Type(format!("{} requires an array, got {}", name, type_name(other)))),
        },
        AstUnaryOperator::ToLower | AstUnaryOperator::ToUpper => match &arg {
            Value::Null => Ok(Value::String(String::new())),
            Value::String(s) => Ok(Value::String(if operator == AstUnaryOperator::ToLower {
                s.to_lowercase()
            } else {
                s.to_uppercase()
            })),
            other => Err(EvalError::Type(format!("{} requires a string, got {}", name, type_name(other)))),
        },
        AstUnaryOperator::Trim => match &arg {
            Value::Null => Ok(Value::Null),
            Value::String(s) => Ok(Value::String(s.trim().to_string())),
            other => Err(EvalError::Type(format!("{} requires a string, got {}", name, type_name(other)))),
        },
        AstUnaryOperator::Type => Ok(Value::String(type_name(&arg).to_string())),
    }
}

fn arithmetic(
    name: &str,
    left: &Value,
    right: &Value,
    apply: fn(Decimal, Decimal) -> Option<Decimal>,
) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (to_decimal(a), to_decimal(b)) else {
                return Err(EvalError::Type(format!("{} argument out of range", name)));
            };
            apply(a, b)
                .map(from_decimal)
                .ok_or_else(|| EvalError::Type(format!("{} overflowed", name)))
        }
        (a, b) => Err(EvalError::Type(format!(
            "{} requires numbers, got {} and {}",
            name,
            type_name(a),
            type_name(b)
        ))),
    }
}

fn is_zero(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.as_f64() == Some(0.0))
}

fn apply_binary(operator: AstBinaryOperator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let name = operator.operator_name();
    match operator {
        AstBinaryOperator::ArrayElemAt => match (left, as_integer(right)) {
            (Value::Array(items), Some(index)) => {
                let position = if index < 0 {
                    items.len().checked_sub(index.unsigned_abs() as usize)
                } else {
                    usize::try_from(index).ok()
                };
                Ok(position.and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null))
            }
            (Value::Null, _) => Ok(Value::Null),
            (other, _) => Err(EvalError::Type(format!("{} requires an array and an integer, got {}", name, type_name(other)))),
        },
        AstBinaryOperator::Divide => {
            if is_zero(right) {
                return Err(EvalError::DivisionByZero);
            }
            arithmetic(name, left, right, Decimal::checked_div)
        }
        AstBinaryOperator::Mod => {
            if is_zero(right) {
                return Err(EvalError::DivisionByZero);
            }
            arithmetic(name, left, right, Decimal::checked_rem)
        }
        AstBinaryOperator::Subtract => arithmetic(name, left, right, Decimal::checked_sub),
        AstBinaryOperator::Eq => Ok(Value::Bool(compare_values(left, right).is_eq())),
        AstBinaryOperator::Ne => Ok(Value::Bool(compare_values(left, right).is_ne())),
        AstBinaryOperator::Gt => Ok(Value::Bool(compare_values(left, right).is_gt())),
        AstBinaryOperator::Gte => Ok(Value::Bool(compare_values(left, right).is_ge())),
        AstBinaryOperator::Lt => Ok(Value::Bool(compare_values(left, right).is_lt())),
        AstBinaryOperator::Lte => Ok(Value::Bool(compare_values(left, right).is_le())),
        AstBinaryOperator::IfNull => Ok(if left.is_null() { right.clone() } else { left.clone() }),
        AstBinaryOperator::In => match right {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|item| values_equal(item, left)))),
            other => Err(EvalError::Type(format!("{} requires an array, got {}", name, type_name(other)))),
        },
        AstBinaryOperator::Split => match (left, right) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::String(s), Value::String(delimiter)) if !delimiter.is_empty() => Ok(Value::Array(
                s.split(delimiter.as_str()).map(|part| Value::String(part.to_string())).collect(),
            )),
            (a, b) => Err(EvalError::Type(format!(
                "{} requires a string and a non-empty delimiter, got {} and {}",
                name,
                type_name(a),
                type_name(b)
            ))),
        },
    }
}

fn apply_nary(operator: AstNaryOperator, args: &[Value]) -> Result<Value, EvalError> {
    let name = operator.operator_name();
    match operator {
        AstNaryOperator::Add | AstNaryOperator::Multiply => {
            let (init, step): (Decimal, fn(Decimal, Decimal) -> Option<Decimal>) = match operator {
                AstNaryOperator::Add => (Decimal::ZERO, Decimal::checked_add),
                _ => (Decimal::ONE, Decimal::checked_mul),
            };
            let mut total = from_decimal(init);
            for arg in args {
                total = arithmetic(name, &total, arg, step)?;
                if total.is_null() {
                    return Ok(Value::Null);
                }
            }
            Ok(total)
        }
        AstNaryOperator::And => Ok(Value::Bool(args.iter().all(is_truthy))),
        AstNaryOperator::Or => Ok(Value::Bool(args.iter().any(is_truthy))),
        AstNaryOperator::BitAnd | AstNaryOperator::BitOr => {
            let mut total: i64 = if operator == AstNaryOperator::BitAnd { -1 } else { 0 };
            for arg in args {
                if arg.is_null() {
                    return Ok(Value::Null);
                }
                let n = as_integer(arg).ok_or_else(|| {
                    EvalError::Type(format!("{} requires integers, got {}", name, type_name(arg)))
                })?;
                total = if operator == AstNaryOperator::BitAnd { total & n } else { total | n };
            }
            Ok(Value::from(total))
        }
        AstNaryOperator::Concat => {
            let mut joined = String::new();
            for arg in args {
                match arg {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => joined.push_str(s),
                    other => {
                        return Err(EvalError::Type(format!(
                            "{} requires strings, got {}",
                            name,
                            type_name(other)
                        )));
                    }
                }
            }
            Ok(Value::String(joined))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::constant::TranslationContext;
    use crate::parser::{parse_expression, parse_query};
    use crate::translate::{translate_filter, translate_query};

    fn run(source: &str, documents: Vec<Value>) -> Vec<Value> {
        let query = parse_query(source).unwrap();
        let pipeline = translate_query(&query, &TranslationContext::new()).unwrap();
        Evaluator::new().run(&pipeline, documents).unwrap()
    }

    fn selects(source: &str, document: Value) -> bool {
        let filter = translate_filter(&parse_expression(source).unwrap(), &TranslationContext::new()).unwrap();
        Evaluator::new().matches(&filter, &document).unwrap()
    }

    #[test]
    fn paths_traverse_arrays() {
        let document = json!({ "items": [{ "price": 3 }, { "price": 12 }], "tags": ["a", "b"] });
        assert!(selects("$.items.price > 10", document.clone()));
        assert!(selects("$.tags == \"b\"", document.clone()));
        assert!(!selects("$.items.price > 20", document.clone()));
        assert!(selects("$.missing == null", document));
    }

    #[test]
    fn elem_match_tests_one_element() {
        let document = json!({ "items": [{ "price": 3, "qty": 0 }, { "price": 12, "qty": 1 }] });
        assert!(selects("$.items.any(@.price > 10 and @.qty > 0)", document.clone()));
        assert!(!selects("$.items.any(@.price > 10 and @.qty == 0)", document));
    }

    #[test]
    fn range_operators_stay_in_type_bracket() {
        assert!(!selects("$.a > 1", json!({ "a": "zzz" })));
        assert!(selects("$.a > 1", json!({ "a": 1.5 })));
    }

    #[test]
    fn string_methods_and_mod() {
        assert!(selects("$.name.startswith(\"Jo\")", json!({ "name": "John" })));
        assert!(!selects("$.name.endswith(\"a.\")", json!({ "name": "ab" })));
        assert!(selects("($.n % 3) == 1", json!({ "n": 7 })));
    }

    #[test]
    fn group_and_sort() {
        let output = run(
            "$ |> group($.k, {\"total\": $.v.sum(), \"n\": $.count()}) |> sort($.total desc)",
            vec![
                json!({ "k": "a", "v": 1 }),
                json!({ "k": "b", "v": 10 }),
                json!({ "k": "a", "v": 2.5 }),
            ],
        );
        assert_eq!(
            output,
            vec![
                json!({ "_id": "b", "total": 10, "n": 1 }),
                json!({ "_id": "a", "total": 3.5, "n": 2 }),
            ]
        );
    }

    #[test]
    fn projection_and_transforms() {
        let output = run(
            "$ |> ~($.items := ?(@.qty > 0), $.total := $.price * $.qty) |> !({\"items\": $.items, \"total\": $.total})",
            vec![json!({ "_id": 1, "price": 2.5, "qty": 4, "items": [{ "qty": 0 }, { "qty": 2 }] })],
        );
        assert_eq!(output, vec![json!({ "items": [{ "qty": 2 }], "total": 10 })]);
    }

    #[test]
    fn unwind_skip_limit_count() {
        let output = run(
            "$ |> unwind($.tags) |> skip(1) |> limit(2) |> count(\"n\")",
            vec![json!({ "tags": ["a", "b", "c"] }), json!({ "tags": [] }), json!({ "tags": ["d"] })],
        );
        assert_eq!(output, vec![json!({ "n": 2 })]);
        assert!(run("$ |> count(\"n\")", Vec::new()).is_empty());
    }

    #[test]
    fn expression_errors_are_reported() {
        let divide = AstExpression::binary(
            AstBinaryOperator::Divide,
            AstExpression::constant(1),
            AstExpression::constant(0),
        );
        assert_eq!(
            Evaluator::new().evaluate(&divide, &json!({})),
            Err(EvalError::DivisionByZero)
        );
    }
}
