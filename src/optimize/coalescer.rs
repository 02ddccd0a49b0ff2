use std::sync::Arc;

use crate::ast::visitor::AstRewriter;
use crate::ast::{AstError, AstFilter, AstPipeline, AstStage};

/// Merges runs of adjacent stages that the server would evaluate as one:
///
/// - `$match` then `$match` becomes one `$match` over `$and`
/// - `$skip` then `$skip` becomes one `$skip` of the sum
/// - `$limit` then `$limit` becomes one `$limit` of the minimum
///
/// Other stages, and stages separated by anything else, are kept in place.
pub struct StageCoalescer;

impl AstRewriter for StageCoalescer {
    fn rewrite_pipeline(&mut self, pipeline: &Arc<AstPipeline>) -> Result<Arc<AstPipeline>, AstError> {
        let mut stages: Vec<AstStage> = Vec::with_capacity(pipeline.len());
        for stage in pipeline.stages() {
            let merged = match (stages.last(), stage) {
                (Some(AstStage::Match(previous)), AstStage::Match(current)) => {
                    let mut args = conjuncts(previous.filter());
                    args.extend(conjuncts(current.filter()));
                    Some(AstStage::match_filter(AstFilter::and(args)?))
                }
                (Some(AstStage::Skip(previous)), AstStage::Skip(current)) => {
                    match previous.skip().checked_add(current.skip()) {
                        Some(total) => Some(AstStage::skip(total)?),
                        None => None,
                    }
                }
                (Some(AstStage::Limit(previous)), AstStage::Limit(current)) => {
                    Some(AstStage::limit(previous.limit().min(current.limit()))?)
                }
                _ => None,
            };
            match merged {
                Some(merged) => {
                    stages.pop();
                    stages.push(merged);
                }
                None => stages.push(stage.clone()),
            }
        }
        Ok(pipeline.update(stages))
    }
}

fn conjuncts(filter: &AstFilter) -> Vec<AstFilter> {
    match filter {
        AstFilter::And(node) => node.args().to_vec(),
        other => vec![other.clone()],
    }
}
