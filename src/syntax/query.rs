use crate::syntax::Statement;

/// Complete query pipeline.
///
/// Statements keep their authored order; each one becomes one stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Pipeline statements
    pub statements: Vec<Statement>,
}
