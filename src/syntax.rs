//! # Front-end query language - syntax tree
//!
//! This module defines the syntax tree of the front-end language that
//! stagecraft compiles: a small, explicit expression language over JSON-like
//! documents. The parser produces these nodes; the translator in
//! [`crate::translate`] turns them into pipeline AST nodes.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens produced by the lexer
//! - **[expressions]** - Expression nodes (values, access, operations, literals)
//! - **[operators]** - Binary and unary operators
//! - **[statements]** - Pipeline statements (filter, transform, output, ...)
//! - **[query]** - Complete query structure
//!
//! ## Quick Start
//!
//! ```text
//! $ |> ?(($.flags & Perm.Read) != 0) |> !({"name": $.name})
//! ```
//!
//! This query keeps documents whose `flags` field has the `Read` bit set and
//! returns their names.
//!
//! ## Pipeline Structure
//!
//! Every query starts with `$` (the input document) and chains statements
//! with `|>`:
//!
//! ```text
//! $ |> statement |> statement |> ...
//! ```
//!
//! - **Filter** `?()` - becomes a `$match` stage
//! - **Transform** `~()` - becomes an `$addFields` stage
//! - **Output** `!()` - becomes `$project` or `$replaceRoot`
//! - **Keyword stages** - `sort`, `skip`, `limit`, `unwind`, `count`, `group`
//!
//! A bare expression (no `|>`) is compiled as a find filter.
//!
//! ## Constants
//!
//! Two kinds of names are resolved at compile time and never reach the
//! server as field references:
//!
//! - `$name` - a bound query parameter
//! - `Type.Member` - a named enum or flag constant from the constant table
pub mod tokens;
pub mod expressions;
pub mod operators;
pub mod statements;
pub mod query;

pub use tokens::Token;
pub use expressions::Expr;
pub use operators::{BinOp, UnaryOp};
pub use statements::{SortDirection, Statement};
pub use query::Query;
