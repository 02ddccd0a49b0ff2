//! Evaluate compiled queries against JSON input

use serde_json::Value;

use super::{CliError, build_context};
use crate::cache::{CompileOptions, Compiler};
use crate::eval::Evaluator;
use crate::value::type_name;

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// The query to run
    pub query: String,
    /// JSON input string: an array of documents or a single document
    pub input: Option<String>,
    /// `name=json` parameter bindings
    pub params: Vec<String>,
    /// `Type.Member=int` constant definitions
    pub constants: Vec<String>,
}

/// Compile the query and run it over the input documents
pub fn execute_run(options: &RunOptions) -> Result<Value, CliError> {
    let json_str = options.input.as_ref().ok_or(CliError::NoInput)?;
    let documents = match serde_json::from_str::<Value>(json_str)? {
        Value::Array(documents) => documents,
        document @ Value::Object(_) => vec![document],
        other => return Err(CliError::NotDocuments(type_name(&other))),
    };

    let context = build_context(&options.params, &options.constants)?;
    let compiled = Compiler::new(
        context,
        CompileOptions {
            cache: false,
            ..CompileOptions::default()
        },
    )
    .compile(&options.query)?;

    let output = Evaluator::new().run(compiled.pipeline(), documents)?;
    Ok(Value::Array(output))
}
