//! Compile queries into command documents

use serde_json::Value;
use tracing::debug;

use super::{CliError, build_context};
use crate::cache::{CompileOptions, Compiler};
use crate::command::command_for;
use crate::output::{to_json, to_json_pretty, to_shell, to_shell_pretty};
use crate::parser::{is_pipeline_query, parse_expression, parse_query};

/// Options for the compile command
#[derive(Debug, Clone)]
pub struct CompileCommandOptions {
    /// The query to compile
    pub query: String,
    /// Collection named in the command document
    pub collection: String,
    /// `name=json` parameter bindings
    pub params: Vec<String>,
    /// `Type.Member=int` constant definitions
    pub constants: Vec<String>,
    /// Merge adjacent stages
    pub optimize: bool,
    /// Only validate syntax, don't translate
    pub syntax_only: bool,
}

impl Default for CompileCommandOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            collection: "documents".to_string(),
            params: Vec::new(),
            constants: Vec::new(),
            optimize: false,
            syntax_only: false,
        }
    }
}

/// Result of a compile operation
#[derive(Debug)]
pub enum CompileResult {
    /// Syntax validation passed
    SyntaxValid,
    /// The command document to send
    Success(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Shell,
}

/// Compile a query into an `aggregate` or `find` command document
pub fn execute_compile(options: &CompileCommandOptions) -> Result<CompileResult, CliError> {
    let query = options.query.as_str();

    if options.syntax_only {
        if is_pipeline_query(query) {
            parse_query(query)?;
        } else {
            parse_expression(query)?;
        }
        return Ok(CompileResult::SyntaxValid);
    }

    let context = build_context(&options.params, &options.constants)?;
    let compiler = Compiler::new(
        context,
        CompileOptions {
            coalesce_stages: options.optimize,
            cache: false,
            ..CompileOptions::default()
        },
    );
    let compiled = compiler.compile(query)?;
    debug!(shape = ?compiled.shape(), "compiled from command line");
    Ok(CompileResult::Success(command_for(&options.collection, &compiled)))
}

pub fn format_output(value: &Value, format: OutputFormat, pretty: bool) -> String {
    match (format, pretty) {
        (OutputFormat::Json, false) => to_json(value),
        (OutputFormat::Json, true) => to_json_pretty(value),
        (OutputFormat::Shell, false) => to_shell(value),
        (OutputFormat::Shell, true) => to_shell_pretty(value),
    }
}
