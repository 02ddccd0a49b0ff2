//! CLI support for stagecraft
//!
//! Provides programmatic access to the `stagecraft` commands so they can be
//! embedded in other tools and tested without spawning a process.

mod compile;
mod run;

pub use compile::{CompileCommandOptions, CompileResult, OutputFormat, execute_compile, format_output};
pub use run::{RunOptions, execute_run};

use std::io;

use thiserror::Error;

use crate::cache::CompileError;
use crate::constant::{DefinitionError, TranslationContext};
use crate::eval::EvalError;
use crate::parser::ParseError;

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No input provided. Use --input or pipe a JSON array of documents to stdin.")]
    NoInput,

    #[error("Input must be a JSON array of documents or a single document, got {0}")]
    NotDocuments(&'static str),
}

/// Builds a translation context from `--param name=json` and
/// `--constant Type.Member=int` flags.
pub fn build_context(params: &[String], constants: &[String]) -> Result<TranslationContext, CliError> {
    let mut context = TranslationContext::new();
    for definition in constants {
        context.constants_mut().define(definition)?;
    }
    for definition in params {
        context.define_parameter(definition)?;
    }
    Ok(context)
}
