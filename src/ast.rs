//! # Pipeline AST
//!
//! The intermediate representation between the front-end syntax tree and the
//! documents sent to the server. Every node is immutable once built and is
//! held behind an [`Arc`](std::sync::Arc), so trees can be shared freely
//! across threads and rewritten without copying untouched subtrees.
//!
//! ## Categories
//!
//! - **[stages]** - pipeline steps (`$match`, `$project`, `$replaceRoot`, ...)
//! - **[filters]** - the match language (`{ E: { $bitsAllClear: 6 } }`) and
//!   the per-field operations it is built from
//! - **[expressions]** - aggregation expressions evaluated per document
//!   (`{ $add: ["$a", 1] }`) and `$group` accumulators
//! - **[pipeline]** - the ordered stage sequence
//! - **[visitor]** - exhaustive analysis and rewrite traversals
//!
//! ## Handles and identity
//!
//! Each category is a closed enum ([`AstStage`], [`AstFilter`],
//! [`AstFilterOperation`], [`AstExpression`]) whose variants hold an `Arc` of
//! the concrete node struct. Cloning a handle is a reference-count bump.
//! `ptr_eq` compares handles by identity, and every node with children has
//! an `update` that returns the very same `Arc` when all replacement
//! children are identical to the current ones:
//!
//! ```
//! use std::sync::Arc;
//! use stagecraft::ast::{AstExpression, AstReplaceRootStage};
//!
//! let stage = Arc::new(AstReplaceRootStage::new(AstExpression::root()));
//! let same = stage.update(stage.expression().clone());
//! assert!(Arc::ptr_eq(&stage, &same));
//! ```
//!
//! ## Rendering
//!
//! [`AstNode::render`] produces the canonical nested-document form as a
//! [`serde_json::Value`]. Mapping keys keep their insertion order, which the
//! server relies on for stage documents and positional operators.

use serde_json::Value;
use thiserror::Error;

pub mod expressions;
pub mod filters;
pub mod node_type;
pub mod pipeline;
pub mod stages;
pub mod visitor;

pub use expressions::{
    AstAccumulatorExpression, AstAccumulatorOperator, AstArrayFilterExpression,
    AstBinaryExpression, AstBinaryOperator, AstComputedArrayExpression,
    AstComputedDocumentExpression, AstConstantExpression, AstExpression, AstFieldExpression,
    AstGetFieldExpression, AstMapExpression, AstNaryExpression, AstNaryOperator,
    AstUnaryExpression, AstUnaryOperator, AstVariableExpression,
};
pub use filters::{
    AstBitsFilterOperation, AstComparisonFilterOperation, AstComparisonOperator,
    AstCompoundFilter, AstElemMatchFilterOperation, AstExistsFilterOperation, AstExprFilter,
    AstFieldOperationFilter, AstFilter, AstFilterField, AstFilterOperation,
    AstInFilterOperation, AstModFilterOperation, AstNotFilter, AstNotFilterOperation,
    AstRegexFilterOperation, AstSizeFilterOperation, AstTypeFilterOperation,
};
pub use node_type::AstNodeType;
pub use pipeline::AstPipeline;
pub use stages::{
    AstAddFieldsStage, AstComputedField, AstCountStage, AstGroupStage, AstLimitStage,
    AstMatchStage, AstProjectStage, AstProjectStageSpecification, AstReplaceRootStage,
    AstSkipStage, AstSortField, AstSortOrder, AstSortStage, AstStage, AstUnwindStage,
};

/// Common contract of every AST node.
pub trait AstNode {
    /// Fixed tag of the concrete node kind.
    fn node_type(&self) -> AstNodeType;

    /// Canonical nested-document form of the node.
    fn render(&self) -> Value;
}

/// Construction-time failures. These are programmer errors: a node was
/// asked to hold an argument it can never render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AstError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
}

pub(crate) fn ensure(condition: bool, name: &'static str, reason: impl FnOnce() -> String) -> Result<(), AstError> {
    if condition {
        Ok(())
    } else {
        Err(AstError::InvalidArgument {
            name,
            reason: reason(),
        })
    }
}

/// Validates a dotted field path such as `a.b.0`.
pub(crate) fn ensure_field_path(name: &'static str, path: &str) -> Result<(), AstError> {
    ensure(!path.is_empty(), name, || "field path must not be empty".to_string())?;
    ensure(!path.starts_with('$'), name, || {
        format!("field path '{}' must not start with '$'", path)
    })?;
    ensure(path.split('.').all(|segment| !segment.is_empty()), name, || {
        format!("field path '{}' contains an empty segment", path)
    })
}

/// Builds a single-key document `{ key: value }`.
pub(crate) fn document(key: impl Into<String>, value: Value) -> Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(key.into(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_paths_are_validated() {
        assert!(ensure_field_path("path", "a.b.0").is_ok());
        assert!(ensure_field_path("path", "").is_err());
        assert!(ensure_field_path("path", "$a").is_err());
        assert!(ensure_field_path("path", "a..b").is_err());
    }

    #[test]
    fn invalid_argument_names_the_argument() {
        let err = ensure_field_path("path", "").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument `path`: field path must not be empty"
        );
    }
}
