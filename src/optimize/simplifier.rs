use serde_json::Value;

use crate::ast::visitor::{AstRewriter, rebuild_expression, rebuild_filter, rebuild_filter_operation};
use crate::ast::{
    AstBinaryOperator, AstError, AstExpression, AstFilter, AstFilterOperation, AstNaryOperator,
};

/// Local normalizations that never change what a pipeline matches or
/// computes:
///
/// - nested `$and`/`$or` filters are flattened and single-argument ones
///   unwrapped
/// - `not not f` becomes `f`, including a filter-level `not` over a
///   field-level `$not`
/// - `not (a == v)` becomes `a != v` and vice versa, `not (a in vs)`
///   becomes `$nin`
/// - `not (f or g)` becomes `$nor: [f, g]`
/// - nested `$add`, `$multiply`, `$and`, `$or` and `$concat` expressions of
///   the same operator are flattened
/// - `$add`, `$multiply` and `$subtract` over integer constants are folded
pub struct Simplifier;

impl AstRewriter for Simplifier {
    fn rewrite_filter(&mut self, filter: &AstFilter) -> Result<AstFilter, AstError> {
        let filter = rebuild_filter(self, filter)?;
        match &filter {
            AstFilter::And(node) => simplify_compound(&filter, node.args(), AstFilter::and, |f| match f {
                AstFilter::And(inner) => Some(inner.args()),
                _ => None,
            }),
            AstFilter::Or(node) => simplify_compound(&filter, node.args(), AstFilter::or, |f| match f {
                AstFilter::Or(inner) => Some(inner.args()),
                _ => None,
            }),
            AstFilter::Not(node) => match node.filter() {
                AstFilter::Not(inner) => Ok(inner.filter().clone()),
                AstFilter::Or(inner) => AstFilter::nor(inner.args().to_vec()),
                AstFilter::Nor(inner) => AstFilter::or(inner.args().to_vec()),
                AstFilter::FieldOperation(inner) => Ok(match inner.operation() {
                    AstFilterOperation::Not(negated) => {
                        AstFilter::field_operation(inner.field().clone(), negated.operation().clone())
                    }
                    operation => match negate_operation(operation) {
                        Some(operation) => AstFilter::field_operation(inner.field().clone(), operation),
                        None => filter.clone(),
                    },
                }),
                _ => Ok(filter.clone()),
            },
            AstFilter::FieldOperation(_) | AstFilter::Nor(_) | AstFilter::Expr(_) => Ok(filter.clone()),
        }
    }

    fn rewrite_filter_operation(&mut self, operation: &AstFilterOperation) -> Result<AstFilterOperation, AstError> {
        let operation = rebuild_filter_operation(self, operation)?;
        if let AstFilterOperation::Not(node) = &operation {
            if let AstFilterOperation::Not(inner) = node.operation() {
                return Ok(inner.operation().clone());
            }
            if let Some(negated) = negate_operation(node.operation()) {
                return Ok(negated);
            }
        }
        Ok(operation)
    }

    fn rewrite_expression(&mut self, expression: &AstExpression) -> Result<AstExpression, AstError> {
        let expression = rebuild_expression(self, expression)?;
        match &expression {
            AstExpression::Nary(node) => {
                let operator = node.operator();
                let flattenable = matches!(
                    operator,
                    AstNaryOperator::Add
                        | AstNaryOperator::Multiply
                        | AstNaryOperator::And
                        | AstNaryOperator::Or
                        | AstNaryOperator::Concat
                );
                if !flattenable {
                    return Ok(expression.clone());
                }

                let nested = node
                    .args()
                    .iter()
                    .any(|arg| matches!(arg, AstExpression::Nary(inner) if inner.operator() == operator));
                let args = if nested {
                    let mut args = Vec::with_capacity(node.args().len());
                    for arg in node.args() {
                        match arg {
                            AstExpression::Nary(inner) if inner.operator() == operator => {
                                args.extend(inner.args().iter().cloned())
                            }
                            other => args.push(other.clone()),
                        }
                    }
                    args
                } else {
                    node.args().to_vec()
                };

                if let Some(folded) = fold_integers(operator, &args) {
                    return Ok(AstExpression::constant(folded));
                }
                if nested {
                    AstExpression::nary(operator, args)
                } else {
                    Ok(expression.clone())
                }
            }
            AstExpression::Binary(node) if node.operator() == AstBinaryOperator::Subtract => {
                let folded = match (integer(node.arg1()), integer(node.arg2())) {
                    (Some(a), Some(b)) => a.checked_sub(b),
                    _ => None,
                };
                Ok(folded.map(AstExpression::constant).unwrap_or_else(|| expression.clone()))
            }
            _ => Ok(expression.clone()),
        }
    }
}

fn simplify_compound(
    filter: &AstFilter,
    args: &[AstFilter],
    build: fn(Vec<AstFilter>) -> Result<AstFilter, AstError>,
    same_operator: fn(&AstFilter) -> Option<&[AstFilter]>,
) -> Result<AstFilter, AstError> {
    if let [single] = args {
        return Ok(single.clone());
    }
    if !args.iter().any(|arg| same_operator(arg).is_some()) {
        return Ok(filter.clone());
    }
    let mut flattened = Vec::with_capacity(args.len());
    for arg in args {
        match same_operator(arg) {
            Some(inner) => flattened.extend(inner.iter().cloned()),
            None => flattened.push(arg.clone()),
        }
    }
    build(flattened)
}

fn negate_operation(operation: &AstFilterOperation) -> Option<AstFilterOperation> {
    match operation {
        AstFilterOperation::Comparison(node) => {
            let negated = node.operator().negated()?;
            Some(AstFilterOperation::comparison(negated, node.value().clone()))
        }
        AstFilterOperation::In(node) => Some(AstFilterOperation::nin_values(node.values().to_vec())),
        AstFilterOperation::Nin(node) => Some(AstFilterOperation::in_values(node.values().to_vec())),
        _ => None,
    }
}

fn integer(expression: &AstExpression) -> Option<i64> {
    expression.as_constant().and_then(Value::as_i64)
}

fn fold_integers(operator: AstNaryOperator, args: &[AstExpression]) -> Option<i64> {
    let (init, step): (i64, fn(i64, i64) -> Option<i64>) = match operator {
        AstNaryOperator::Add => (0, i64::checked_add),
        AstNaryOperator::Multiply => (1, i64::checked_mul),
        _ => return None,
    };
    args.iter()
        .try_fold(init, |acc, arg| integer(arg).and_then(|n| step(acc, n)))
}
