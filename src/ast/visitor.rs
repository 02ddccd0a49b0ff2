//! Exhaustive traversals over the pipeline AST.
//!
//! [`AstVisitor`] is for analysis and [`AstRewriter`] for rewriting. Both
//! have one method per node category whose default implementation walks the
//! children through the free functions in this module, so an implementor
//! overrides only the categories it cares about and calls the matching
//! `walk_*`/`rebuild_*` function to keep descending.
//!
//! Rebuilding goes children first and reassembles each node through its
//! `update`, so a rewrite that changes nothing returns the original `Arc`s
//! and a rewrite that changes one leaf allocates only that leaf's ancestors.

use std::sync::Arc;

use crate::ast::{
    AstAccumulatorExpression, AstError, AstExpression, AstFilter, AstFilterOperation, AstPipeline,
    AstProjectStageSpecification, AstStage,
};

pub trait AstVisitor {
    fn visit_pipeline(&mut self, pipeline: &AstPipeline) {
        walk_pipeline(self, pipeline);
    }

    fn visit_stage(&mut self, stage: &AstStage) {
        walk_stage(self, stage);
    }

    fn visit_filter(&mut self, filter: &AstFilter) {
        walk_filter(self, filter);
    }

    fn visit_filter_operation(&mut self, operation: &AstFilterOperation) {
        walk_filter_operation(self, operation);
    }

    fn visit_expression(&mut self, expression: &AstExpression) {
        walk_expression(self, expression);
    }

    fn visit_accumulator(&mut self, accumulator: &AstAccumulatorExpression) {
        walk_accumulator(self, accumulator);
    }
}

pub fn walk_pipeline<V: AstVisitor + ?Sized>(visitor: &mut V, pipeline: &AstPipeline) {
    for stage in pipeline.stages() {
        visitor.visit_stage(stage);
    }
}

pub fn walk_stage<V: AstVisitor + ?Sized>(visitor: &mut V, stage: &AstStage) {
    match stage {
        AstStage::Match(node) => visitor.visit_filter(node.filter()),
        AstStage::Project(node) => {
            for specification in node.specifications() {
                match specification {
                    AstProjectStageSpecification::Set { value, .. } => {
                        visitor.visit_expression(value)
                    }
                    AstProjectStageSpecification::Include(_)
                    | AstProjectStageSpecification::Exclude(_) => {}
                }
            }
        }
        AstStage::ReplaceRoot(node) => visitor.visit_expression(node.expression()),
        AstStage::AddFields(node) => {
            for field in node.fields() {
                visitor.visit_expression(field.value());
            }
        }
        AstStage::Group(node) => {
            visitor.visit_expression(node.id());
            for (_, accumulator) in node.accumulators() {
                visitor.visit_accumulator(accumulator);
            }
        }
        AstStage::Sort(_)
        | AstStage::Skip(_)
        | AstStage::Limit(_)
        | AstStage::Unwind(_)
        | AstStage::Count(_) => {}
    }
}

pub fn walk_filter<V: AstVisitor + ?Sized>(visitor: &mut V, filter: &AstFilter) {
    match filter {
        AstFilter::FieldOperation(node) => visitor.visit_filter_operation(node.operation()),
        AstFilter::And(node) | AstFilter::Or(node) | AstFilter::Nor(node) => {
            for arg in node.args() {
                visitor.visit_filter(arg);
            }
        }
        AstFilter::Not(node) => visitor.visit_filter(node.filter()),
        AstFilter::Expr(node) => visitor.visit_expression(node.expression()),
    }
}

pub fn walk_filter_operation<V: AstVisitor + ?Sized>(
    visitor: &mut V,
    operation: &AstFilterOperation,
) {
    match operation {
        AstFilterOperation::ElemMatch(node) => visitor.visit_filter(node.filter()),
        AstFilterOperation::Not(node) => visitor.visit_filter_operation(node.operation()),
        AstFilterOperation::Comparison(_)
        | AstFilterOperation::BitsAllClear(_)
        | AstFilterOperation::BitsAllSet(_)
        | AstFilterOperation::BitsAnyClear(_)
        | AstFilterOperation::BitsAnySet(_)
        | AstFilterOperation::In(_)
        | AstFilterOperation::Nin(_)
        | AstFilterOperation::Exists(_)
        | AstFilterOperation::Regex(_)
        | AstFilterOperation::Size(_)
        | AstFilterOperation::Type(_)
        | AstFilterOperation::Mod(_) => {}
    }
}

pub fn walk_expression<V: AstVisitor + ?Sized>(visitor: &mut V, expression: &AstExpression) {
    match expression {
        AstExpression::Unary(node) => visitor.visit_expression(node.arg()),
        AstExpression::Binary(node) => {
            visitor.visit_expression(node.arg1());
            visitor.visit_expression(node.arg2());
        }
        AstExpression::Nary(node) => {
            for arg in node.args() {
                visitor.visit_expression(arg);
            }
        }
        AstExpression::ComputedDocument(node) => {
            for (_, value) in node.fields() {
                visitor.visit_expression(value);
            }
        }
        AstExpression::ComputedArray(node) => {
            for item in node.items() {
                visitor.visit_expression(item);
            }
        }
        AstExpression::GetField(node) => visitor.visit_expression(node.input()),
        AstExpression::ArrayFilter(node) => {
            visitor.visit_expression(node.input());
            visitor.visit_expression(node.cond());
        }
        AstExpression::Map(node) => {
            visitor.visit_expression(node.input());
            visitor.visit_expression(node.body());
        }
        AstExpression::Constant(_) | AstExpression::Field(_) | AstExpression::Variable(_) => {}
    }
}

pub fn walk_accumulator<V: AstVisitor + ?Sized>(
    visitor: &mut V,
    accumulator: &AstAccumulatorExpression,
) {
    visitor.visit_expression(accumulator.arg());
}

/// Rewrites return a replacement for the node they are given. Returning a
/// clone of the input handle means "unchanged".
pub trait AstRewriter {
    fn rewrite_pipeline(&mut self, pipeline: &Arc<AstPipeline>) -> Result<Arc<AstPipeline>, AstError> {
        rebuild_pipeline(self, pipeline)
    }

    fn rewrite_stage(&mut self, stage: &AstStage) -> Result<AstStage, AstError> {
        rebuild_stage(self, stage)
    }

    fn rewrite_filter(&mut self, filter: &AstFilter) -> Result<AstFilter, AstError> {
        rebuild_filter(self, filter)
    }

    fn rewrite_filter_operation(
        &mut self,
        operation: &AstFilterOperation,
    ) -> Result<AstFilterOperation, AstError> {
        rebuild_filter_operation(self, operation)
    }

    fn rewrite_expression(&mut self, expression: &AstExpression) -> Result<AstExpression, AstError> {
        rebuild_expression(self, expression)
    }

    fn rewrite_accumulator(
        &mut self,
        accumulator: &Arc<AstAccumulatorExpression>,
    ) -> Result<Arc<AstAccumulatorExpression>, AstError> {
        rebuild_accumulator(self, accumulator)
    }
}

pub fn rebuild_pipeline<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    pipeline: &Arc<AstPipeline>,
) -> Result<Arc<AstPipeline>, AstError> {
    let stages = pipeline
        .stages()
        .iter()
        .map(|stage| rewriter.rewrite_stage(stage))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pipeline.update(stages))
}

pub fn rebuild_stage<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    stage: &AstStage,
) -> Result<AstStage, AstError> {
    Ok(match stage {
        AstStage::Match(node) => AstStage::Match(node.update(rewriter.rewrite_filter(node.filter())?)),
        AstStage::Project(node) => {
            let specifications = node
                .specifications()
                .iter()
                .map(|specification| match specification {
                    AstProjectStageSpecification::Set { path, value } => {
                        Ok(AstProjectStageSpecification::Set {
                            path: path.clone(),
                            value: rewriter.rewrite_expression(value)?,
                        })
                    }
                    AstProjectStageSpecification::Include(_)
                    | AstProjectStageSpecification::Exclude(_) => Ok(specification.clone()),
                })
                .collect::<Result<Vec<_>, AstError>>()?;
            AstStage::Project(node.update(specifications)?)
        }
        AstStage::ReplaceRoot(node) => {
            AstStage::ReplaceRoot(node.update(rewriter.rewrite_expression(node.expression())?))
        }
        AstStage::AddFields(node) => {
            let values = node
                .fields()
                .iter()
                .map(|field| rewriter.rewrite_expression(field.value()))
                .collect::<Result<Vec<_>, _>>()?;
            AstStage::AddFields(node.update(values)?)
        }
        AstStage::Group(node) => {
            let id = rewriter.rewrite_expression(node.id())?;
            let accumulators = node
                .accumulators()
                .iter()
                .map(|(_, accumulator)| rewriter.rewrite_accumulator(accumulator))
                .collect::<Result<Vec<_>, _>>()?;
            AstStage::Group(node.update(id, accumulators)?)
        }
        AstStage::Sort(_)
        | AstStage::Skip(_)
        | AstStage::Limit(_)
        | AstStage::Unwind(_)
        | AstStage::Count(_) => stage.clone(),
    })
}

pub fn rebuild_filter<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    filter: &AstFilter,
) -> Result<AstFilter, AstError> {
    Ok(match filter {
        AstFilter::FieldOperation(node) => AstFilter::FieldOperation(
            node.update(rewriter.rewrite_filter_operation(node.operation())?),
        ),
        AstFilter::And(node) => AstFilter::And(node.update(rebuild_filters(rewriter, node.args())?)?),
        AstFilter::Or(node) => AstFilter::Or(node.update(rebuild_filters(rewriter, node.args())?)?),
        AstFilter::Nor(node) => AstFilter::Nor(node.update(rebuild_filters(rewriter, node.args())?)?),
        AstFilter::Not(node) => AstFilter::Not(node.update(rewriter.rewrite_filter(node.filter())?)),
        AstFilter::Expr(node) => {
            AstFilter::Expr(node.update(rewriter.rewrite_expression(node.expression())?))
        }
    })
}

fn rebuild_filters<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    filters: &[AstFilter],
) -> Result<Vec<AstFilter>, AstError> {
    filters
        .iter()
        .map(|filter| rewriter.rewrite_filter(filter))
        .collect()
}

pub fn rebuild_filter_operation<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    operation: &AstFilterOperation,
) -> Result<AstFilterOperation, AstError> {
    Ok(match operation {
        AstFilterOperation::ElemMatch(node) => {
            AstFilterOperation::ElemMatch(node.update(rewriter.rewrite_filter(node.filter())?))
        }
        AstFilterOperation::Not(node) => AstFilterOperation::Not(
            node.update(rewriter.rewrite_filter_operation(node.operation())?),
        ),
        AstFilterOperation::Comparison(_)
        | AstFilterOperation::BitsAllClear(_)
        | AstFilterOperation::BitsAllSet(_)
        | AstFilterOperation::BitsAnyClear(_)
        | AstFilterOperation::BitsAnySet(_)
        | AstFilterOperation::In(_)
        | AstFilterOperation::Nin(_)
        | AstFilterOperation::Exists(_)
        | AstFilterOperation::Regex(_)
        | AstFilterOperation::Size(_)
        | AstFilterOperation::Type(_)
        | AstFilterOperation::Mod(_) => operation.clone(),
    })
}

pub fn rebuild_expression<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    expression: &AstExpression,
) -> Result<AstExpression, AstError> {
    Ok(match expression {
        AstExpression::Unary(node) => {
            AstExpression::Unary(node.update(rewriter.rewrite_expression(node.arg())?))
        }
        AstExpression::Binary(node) => {
            let arg1 = rewriter.rewrite_expression(node.arg1())?;
            let arg2 = rewriter.rewrite_expression(node.arg2())?;
            AstExpression::Binary(node.update(arg1, arg2))
        }
        AstExpression::Nary(node) => {
            AstExpression::Nary(node.update(rebuild_expressions(rewriter, node.args())?)?)
        }
        AstExpression::ComputedDocument(node) => {
            let values = node
                .fields()
                .iter()
                .map(|(_, value)| rewriter.rewrite_expression(value))
                .collect::<Result<Vec<_>, _>>()?;
            AstExpression::ComputedDocument(node.update(values))
        }
        AstExpression::ComputedArray(node) => {
            AstExpression::ComputedArray(node.update(rebuild_expressions(rewriter, node.items())?))
        }
        AstExpression::GetField(node) => {
            AstExpression::GetField(node.update(rewriter.rewrite_expression(node.input())?))
        }
        AstExpression::ArrayFilter(node) => {
            let input = rewriter.rewrite_expression(node.input())?;
            let cond = rewriter.rewrite_expression(node.cond())?;
            AstExpression::ArrayFilter(node.update(input, cond))
        }
        AstExpression::Map(node) => {
            let input = rewriter.rewrite_expression(node.input())?;
            let body = rewriter.rewrite_expression(node.body())?;
            AstExpression::Map(node.update(input, body))
        }
        AstExpression::Constant(_) | AstExpression::Field(_) | AstExpression::Variable(_) => {
            expression.clone()
        }
    })
}

fn rebuild_expressions<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    expressions: &[AstExpression],
) -> Result<Vec<AstExpression>, AstError> {
    expressions
        .iter()
        .map(|expression| rewriter.rewrite_expression(expression))
        .collect()
}

pub fn rebuild_accumulator<R: AstRewriter + ?Sized>(
    rewriter: &mut R,
    accumulator: &Arc<AstAccumulatorExpression>,
) -> Result<Arc<AstAccumulatorExpression>, AstError> {
    Ok(accumulator.update(rewriter.rewrite_expression(accumulator.arg())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBinaryOperator, AstFilterField};

    struct Identity;

    impl AstRewriter for Identity {}

    /// Replaces every `$old` field reference with `$new`.
    struct RenameField;

    impl AstRewriter for RenameField {
        fn rewrite_expression(&mut self, expression: &AstExpression) -> Result<AstExpression, AstError> {
            if let AstExpression::Field(node) = expression {
                if node.path() == "old" {
                    return AstExpression::field("new");
                }
            }
            rebuild_expression(self, expression)
        }
    }

    struct CountNodes(usize);

    impl AstVisitor for CountNodes {
        fn visit_expression(&mut self, expression: &AstExpression) {
            self.0 += 1;
            walk_expression(self, expression);
        }

        fn visit_filter(&mut self, filter: &AstFilter) {
            self.0 += 1;
            walk_filter(self, filter);
        }
    }

    fn sample() -> Arc<AstPipeline> {
        let untouched = AstExpression::binary(
            AstBinaryOperator::Gt,
            AstExpression::field("a").unwrap(),
            AstExpression::constant(1),
        );
        let touched = AstExpression::binary(
            AstBinaryOperator::Lt,
            AstExpression::field("old").unwrap(),
            AstExpression::constant(2),
        );
        Arc::new(AstPipeline::new(vec![
            AstStage::match_filter(AstFilter::expr(untouched)),
            AstStage::match_filter(AstFilter::expr(touched)),
            AstStage::limit(3).unwrap(),
        ]))
    }

    #[test]
    fn identity_rewrite_returns_same_pipeline() {
        let pipeline = sample();
        let rewritten = Identity.rewrite_pipeline(&pipeline).unwrap();
        assert!(Arc::ptr_eq(&pipeline, &rewritten));
    }

    #[test]
    fn partial_rewrite_shares_untouched_stages() {
        let pipeline = sample();
        let rewritten = RenameField.rewrite_pipeline(&pipeline).unwrap();
        assert!(!Arc::ptr_eq(&pipeline, &rewritten));
        assert!(pipeline.stages()[0].ptr_eq(&rewritten.stages()[0]));
        assert!(!pipeline.stages()[1].ptr_eq(&rewritten.stages()[1]));
        assert!(pipeline.stages()[2].ptr_eq(&rewritten.stages()[2]));
    }

    #[test]
    fn visitor_reaches_every_filter_and_expression() {
        let mut counter = CountNodes(0);
        counter.visit_pipeline(&sample());
        // two $expr filters, each holding a binary with two leaves
        assert_eq!(counter.0, 8);

        let mut counter = CountNodes(0);
        counter.visit_filter(&AstFilter::field_operation(
            AstFilterField::Element,
            crate::ast::AstFilterOperation::exists(true),
        ));
        assert_eq!(counter.0, 1);
    }
}
