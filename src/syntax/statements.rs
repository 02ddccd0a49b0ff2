use crate::syntax::Expr;

/// Direction of one `sort(...)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Pipeline statement.
///
/// A query is a sequence of statements; each compiles to exactly one
/// pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Filter operation
    ///
    /// # Example
    /// ```text
    /// ?($.status == "active")
    /// ```
    Filter(Expr),

    /// Transform operation, one or more field assignments
    ///
    /// # Example
    /// ```text
    /// ~($.total := $.price * $.qty, $.items := ?(@.qty > 0))
    /// ```
    Transform(Vec<(Expr, Expr)>),

    /// Output operation, replaces each document with the value
    ///
    /// # Example
    /// ```text
    /// !({"name": $.name})
    /// ```
    Output(Expr),

    /// `sort($.age desc, $.name)`
    Sort(Vec<(Expr, SortDirection)>),

    /// `skip(10)`
    Skip(i64),

    /// `limit(10)`
    Limit(i64),

    /// `unwind($.items)`, or `unwind($.items, true)` to keep documents
    /// whose array is missing, null or empty
    Unwind {
        path: Expr,
        preserve_null_and_empty_arrays: bool,
    },

    /// `count("total")`
    Count(String),

    /// `group($.category, {"total": $.amount.sum()})`
    Group {
        key: Expr,
        accumulators: Vec<(String, Expr)>,
    },
}
