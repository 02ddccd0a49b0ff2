pub mod ast;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod command;
pub mod constant;
pub mod eval;
pub mod lexer;
pub mod optimize;
pub mod output;
pub mod parser;
pub mod syntax;
pub mod translate;
pub mod value;

pub use ast::{AstError, AstExpression, AstFilter, AstFilterOperation, AstNode, AstPipeline, AstStage};
pub use cache::{CompileError, CompileOptions, CompiledPipeline, Compiler, QueryShape, TranslationCache};
pub use command::{AggregateCommand, CommandSink, FindCommand};
pub use constant::{ConstantTable, TranslationContext};
pub use eval::{EvalError, Evaluator};
pub use lexer::{LexError, Lexer, Position};
pub use output::{to_json, to_json_pretty, to_shell, to_shell_pretty};
pub use parser::{ParseError, Parser};
pub use syntax::{BinOp, Expr, Query, Statement, Token};
pub use translate::{TranslationError, translate_expression, translate_filter, translate_query};
