use std::sync::Arc;

use tracing::debug;

use crate::ast::{
    AstAccumulatorExpression, AstAccumulatorOperator, AstComputedField, AstExpression, AstNode,
    AstPipeline, AstProjectStageSpecification, AstSortField, AstSortOrder, AstStage,
};
use crate::constant::TranslationContext;
use crate::syntax::{Expr, Query, SortDirection, Statement};
use crate::translate::expression::{ELEMENT_VARIABLE, ExpressionTranslator};
use crate::translate::path::{PathBase, PathSegment, extract_path, target_path};
use crate::translate::{TranslationError, translate_filter};

/// Translates a `$ |> ...` query into a pipeline, one stage per statement,
/// in authored order.
pub fn translate_query(query: &Query, context: &TranslationContext) -> Result<AstPipeline, TranslationError> {
    let mut pipeline = AstPipeline::default();
    for statement in &query.statements {
        let stage = translate_statement(statement, context)?;
        debug!(stage = %stage.node_type(), "translated statement");
        pipeline.push(stage);
    }
    Ok(pipeline)
}

pub fn translate_statement(statement: &Statement, context: &TranslationContext) -> Result<AstStage, TranslationError> {
    let expressions = ExpressionTranslator::new(context);
    match statement {
        Statement::Filter(condition) => Ok(AstStage::match_filter(translate_filter(condition, context)?)),

        Statement::Transform(assignments) => {
            let fields = assignments
                .iter()
                .map(|(target, value)| {
                    let path = target_path(target)?;
                    let value = translate_transform_value(&path, value, context)?;
                    Ok(AstComputedField::new(&path, value)?)
                })
                .collect::<Result<Vec<_>, TranslationError>>()?;
            Ok(AstStage::add_fields(fields)?)
        }

        Statement::Output(Expr::Object(pairs)) => {
            let mut specifications = Vec::with_capacity(pairs.len() + 1);
            if !pairs.iter().any(|(key, _)| key == "_id") {
                specifications.push(AstProjectStageSpecification::Exclude("_id".to_string()));
            }
            for (key, value) in pairs {
                specifications.push(if is_same_field(key, value) {
                    AstProjectStageSpecification::Include(key.clone())
                } else {
                    AstProjectStageSpecification::Set {
                        path: key.clone(),
                        value: expressions.translate(value)?,
                    }
                });
            }
            Ok(AstStage::project(specifications)?)
        }
        Statement::Output(value) => Ok(AstStage::replace_root(expressions.translate(value)?)),

        Statement::Sort(keys) => {
            let fields = keys
                .iter()
                .map(|(key, direction)| {
                    let order = match direction {
                        SortDirection::Ascending => AstSortOrder::Ascending,
                        SortDirection::Descending => AstSortOrder::Descending,
                    };
                    Ok(AstSortField::new(&target_path(key)?, order)?)
                })
                .collect::<Result<Vec<_>, TranslationError>>()?;
            Ok(AstStage::sort(fields)?)
        }

        Statement::Skip(n) => Ok(AstStage::skip(*n)?),
        Statement::Limit(n) => Ok(AstStage::limit(*n)?),
        Statement::Unwind {
            path,
            preserve_null_and_empty_arrays,
        } => Ok(AstStage::unwind(&target_path(path)?, *preserve_null_and_empty_arrays)?),
        Statement::Count(name) => Ok(AstStage::count(name)?),

        Statement::Group { key, accumulators } => {
            let id = expressions.translate(key)?;
            let accumulators = accumulators
                .iter()
                .map(|(name, value)| Ok((name.clone(), Arc::new(translate_accumulator(value, &expressions)?))))
                .collect::<Result<Vec<_>, TranslationError>>()?;
            Ok(AstStage::group(id, accumulators)?)
        }
    }
}

/// Transform values are detected by shape:
/// - `?(pred)` filters the target array,
/// - a value using `@` maps over the target array,
/// - anything else replaces the target.
fn translate_transform_value(
    path: &str,
    value: &Expr,
    context: &TranslationContext,
) -> Result<AstExpression, TranslationError> {
    match value {
        Expr::Filter(condition) => {
            let cond = ExpressionTranslator::for_element(context).translate(condition)?;
            Ok(AstExpression::array_filter(AstExpression::field(path)?, ELEMENT_VARIABLE, cond)?)
        }
        value if value.uses_lambda_param() => {
            let body = ExpressionTranslator::for_element(context).translate(value)?;
            Ok(AstExpression::map(AstExpression::field(path)?, ELEMENT_VARIABLE, body)?)
        }
        value => ExpressionTranslator::new(context).translate(value),
    }
}

/// `"name": $.name` keeps the field as is.
fn is_same_field(key: &str, value: &Expr) -> bool {
    match extract_path(value) {
        Some((PathBase::Root, segments)) => {
            segments.len() == 1 && matches!(&segments[0], PathSegment::Field(name) if name == key)
        }
        _ => false,
    }
}

/// `$.amount.sum()` accumulates `$amount` over the group; `$.count()`
/// counts its documents.
fn translate_accumulator(
    value: &Expr,
    expressions: &ExpressionTranslator<'_>,
) -> Result<AstAccumulatorExpression, TranslationError> {
    let Expr::MethodCall {
        object,
        method,
        args,
    } = value
    else {
        return Err(TranslationError::unsupported(
            value,
            "group values must be accumulator calls such as $.amount.sum()",
        ));
    };
    if !args.is_empty() {
        return Err(TranslationError::unsupported(value, "accumulators take no arguments"));
    }
    let operator = match method.as_str() {
        "count" => {
            return Ok(AstAccumulatorExpression::new(
                AstAccumulatorOperator::Sum,
                AstExpression::constant(1),
            ));
        }
        "sum" => AstAccumulatorOperator::Sum,
        "avg" => AstAccumulatorOperator::Avg,
        "min" => AstAccumulatorOperator::Min,
        "max" => AstAccumulatorOperator::Max,
        "first" => AstAccumulatorOperator::First,
        "last" => AstAccumulatorOperator::Last,
        "push" => AstAccumulatorOperator::Push,
        "distinct" => AstAccumulatorOperator::AddToSet,
        other => {
            return Err(TranslationError::unsupported(
                value,
                format!("unknown accumulator {}()", other),
            ));
        }
    };
    Ok(AstAccumulatorExpression::new(operator, expressions.translate(object)?))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::parser::parse_query;

    fn compile(source: &str) -> Result<Value, TranslationError> {
        let query = parse_query(source).unwrap();
        translate_query(&query, &TranslationContext::new()).map(|pipeline| pipeline.render())
    }

    #[test]
    fn transforms_detect_filter_map_and_replace() {
        assert_eq!(
            compile("$ |> ~($.items := ?(@.qty > 0), $.prices := @.price * 2, $.total := $.a + $.b)").unwrap(),
            json!([{ "$addFields": {
                "items": { "$filter": { "input": "$items", "as": "this", "cond": { "$gt": ["$$this.qty", 0] } } },
                "prices": { "$map": { "input": "$prices", "as": "this", "in": { "$multiply": ["$$this.price", 2] } } },
                "total": { "$add": ["$a", "$b"] }
            } }])
        );
    }

    #[test]
    fn object_output_projects_without_id() {
        assert_eq!(
            compile("$ |> !({\"name\": $.name, \"n\": $.items.count()})").unwrap(),
            json!([{ "$project": { "_id": 0, "name": 1, "n": { "$size": "$items" } } }])
        );
    }

    #[test]
    fn other_output_replaces_root() {
        assert_eq!(
            compile("$ |> !($.inner)").unwrap(),
            json!([{ "$replaceRoot": { "newRoot": "$inner" } }])
        );
    }

    #[test]
    fn keyword_stages() {
        assert_eq!(
            compile("$ |> sort($.age desc, $.name) |> skip(5) |> limit(10) |> unwind($.tags) |> count(\"n\")").unwrap(),
            json!([
                { "$sort": { "age": -1, "name": 1 } },
                { "$skip": 5 },
                { "$limit": 10 },
                { "$unwind": "$tags" },
                { "$count": "n" }
            ])
        );
    }

    #[test]
    fn group_accumulators() {
        assert_eq!(
            compile("$ |> group($.category, {\"total\": $.amount.sum(), \"n\": $.count()})").unwrap(),
            json!([{ "$group": {
                "_id": "$category",
                "total": { "$sum": "$amount" },
                "n": { "$sum": 1 }
            } }])
        );
        assert!(compile("$ |> group($.category, {\"total\": $.amount})").is_err());
    }

    #[test]
    fn invalid_stage_arguments_surface_as_ast_errors() {
        assert!(matches!(compile("$ |> limit(0)"), Err(TranslationError::Ast(_))));
        assert!(matches!(compile("$ |> count(\"a.b\")"), Err(TranslationError::Ast(_))));
    }
}
