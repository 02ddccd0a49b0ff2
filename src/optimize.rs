//! Rewrite and analysis passes over the pipeline AST.
//!
//! - [`Simplifier`] normalizes filters and expressions (flattening,
//!   double-negation removal, integer folding). Enabled by default.
//! - [`StageCoalescer`] merges adjacent `$match`, `$skip` and `$limit`
//!   stages. Only runs when asked for.
//! - [`FieldCollector`] lists the field paths a pipeline reads.
//!
//! Every pass returns the input `Arc` unchanged when it has nothing to do.

use std::sync::Arc;

use tracing::debug;

use crate::ast::visitor::AstRewriter;
use crate::ast::{AstError, AstPipeline};

mod coalescer;
mod fields;
mod simplifier;

pub use coalescer::StageCoalescer;
pub use fields::FieldCollector;
pub use simplifier::Simplifier;

pub fn simplify(pipeline: &Arc<AstPipeline>) -> Result<Arc<AstPipeline>, AstError> {
    let simplified = Simplifier.rewrite_pipeline(pipeline)?;
    debug!(changed = !Arc::ptr_eq(pipeline, &simplified), "simplify pass");
    Ok(simplified)
}

pub fn coalesce_stages(pipeline: &Arc<AstPipeline>) -> Result<Arc<AstPipeline>, AstError> {
    let coalesced = StageCoalescer.rewrite_pipeline(pipeline)?;
    debug!(
        before = pipeline.len(),
        after = coalesced.len(),
        "coalesce pass"
    );
    Ok(coalesced)
}
