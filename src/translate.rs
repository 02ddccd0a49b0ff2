//! # Translation
//!
//! Maps front-end syntax onto the pipeline AST. Two contexts exist because
//! the server has two languages:
//!
//! - **filter context** ([`translate_filter`]) produces match-language
//!   filters. This is where idioms are recognized: `($.E & mask) == 0`
//!   becomes `{ E: { $bitsAllClear: mask } }`, `($.n % 3) == 1` becomes
//!   `{ n: { $mod: [3, 1] } }`, `$.name.startswith("A")` becomes a
//!   `$regex`, and so on.
//! - **expression context** ([`translate_expression`]) produces aggregation
//!   expressions evaluated per document.
//!
//! [`translate_query`] turns a whole `$ |> ...` query into an
//! [`AstPipeline`](crate::ast::AstPipeline), one stage per statement.
//!
//! Translation is all-or-nothing: the first shape that cannot be expressed
//! fails the whole call with [`TranslationError::Unsupported`], quoting the
//! offending sub-expression.

use thiserror::Error;

use crate::ast::AstError;
use crate::syntax::Expr;

mod expression;
mod filter;
mod path;
mod stage;

pub use expression::translate_expression;
pub use filter::translate_filter;
pub use stage::{translate_query, translate_statement};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslationError {
    #[error("unsupported expression `{expression}`: {reason}")]
    Unsupported { expression: String, reason: String },

    #[error(transparent)]
    Ast(#[from] AstError),
}

impl TranslationError {
    pub(crate) fn unsupported(expr: &Expr, reason: impl Into<String>) -> Self {
        TranslationError::Unsupported {
            expression: expr.to_string(),
            reason: reason.into(),
        }
    }
}
