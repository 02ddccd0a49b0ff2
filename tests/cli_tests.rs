// tests/cli_tests.rs
#![cfg(feature = "cli")]

use serde_json::json;
use stagecraft::cli::{
    CliError, CompileCommandOptions, CompileResult, OutputFormat, RunOptions, execute_compile,
    execute_run, format_output,
};

fn compile(query: &str, constants: &[&str]) -> serde_json::Value {
    let options = CompileCommandOptions {
        query: query.to_string(),
        constants: constants.iter().map(|c| c.to_string()).collect(),
        ..CompileCommandOptions::default()
    };
    match execute_compile(&options).unwrap() {
        CompileResult::Success(command) => command,
        CompileResult::SyntaxValid => panic!("expected a command document"),
    }
}

// ============================================================================
// Compile
// ============================================================================

#[test]
fn test_filter_compiles_to_find() {
    let command = compile("($.E & (E.E2 | E.E4)) == 0", &["E.E2=2", "E.E4=4"]);
    assert_eq!(
        command,
        json!({ "find": "documents", "filter": { "E": { "$bitsAllClear": 6 } } })
    );
    assert_eq!(
        format_output(&command, OutputFormat::Shell, false),
        "{ find : \"documents\", filter : { E : { $bitsAllClear : 6 } } }"
    );
}

#[test]
fn test_pipeline_compiles_to_aggregate() {
    let options = CompileCommandOptions {
        query: "$ |> ?($.qty >= $min) |> limit(5)".to_string(),
        collection: "orders".to_string(),
        params: vec!["min=3".to_string()],
        ..CompileCommandOptions::default()
    };
    let CompileResult::Success(command) = execute_compile(&options).unwrap() else {
        panic!("expected a command document");
    };
    assert_eq!(
        command,
        json!({
            "aggregate": "orders",
            "pipeline": [{ "$match": { "qty": { "$gte": 3 } } }, { "$limit": 5 }],
            "cursor": {}
        })
    );
    assert_eq!(
        format_output(&command, OutputFormat::Json, false),
        r#"{"aggregate":"orders","pipeline":[{"$match":{"qty":{"$gte":3}}},{"$limit":5}],"cursor":{}}"#
    );
}

#[test]
fn test_optimize_flag_coalesces() {
    let options = CompileCommandOptions {
        query: "$ |> skip(2) |> skip(3)".to_string(),
        optimize: true,
        ..CompileCommandOptions::default()
    };
    let CompileResult::Success(command) = execute_compile(&options).unwrap() else {
        panic!("expected a command document");
    };
    assert_eq!(command["pipeline"], json!([{ "$skip": 5 }]));
}

#[test]
fn test_syntax_only() {
    let options = CompileCommandOptions {
        query: "($.E & E.Missing) == 0".to_string(),
        syntax_only: true,
        ..CompileCommandOptions::default()
    };
    // Unknown constants are a translation problem, not a syntax one
    assert!(matches!(execute_compile(&options), Ok(CompileResult::SyntaxValid)));

    let options = CompileCommandOptions {
        query: "$.E = 0".to_string(),
        syntax_only: true,
        ..CompileCommandOptions::default()
    };
    assert!(matches!(execute_compile(&options), Err(CliError::Parse(_))));
}

#[test]
fn test_bad_definitions_are_reported() {
    let options = CompileCommandOptions {
        query: "$.a == 1".to_string(),
        constants: vec!["E2=2".to_string()],
        ..CompileCommandOptions::default()
    };
    assert!(matches!(execute_compile(&options), Err(CliError::Definition(_))));
}

#[test]
fn test_unsupported_shapes_are_compile_errors() {
    let options = CompileCommandOptions {
        query: "($.E & 6) == 3".to_string(),
        ..CompileCommandOptions::default()
    };
    let err = execute_compile(&options).unwrap_err();
    assert!(matches!(err, CliError::Compile(_)));
    assert!(err.to_string().contains("($.E & 6) == 3"), "message: {}", err);
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn test_run_selects_documents() {
    let options = RunOptions {
        query: "($.E & $mask) != 0".to_string(),
        input: Some(r#"[{"E": 1}, {"E": 2}, {"E": 4}, {"E": 6}, {"E": 8}]"#.to_string()),
        params: vec!["mask=6".to_string()],
        constants: Vec::new(),
    };
    assert_eq!(
        execute_run(&options).unwrap(),
        json!([{ "E": 2 }, { "E": 4 }, { "E": 6 }])
    );
}

#[test]
fn test_run_accepts_a_single_document() {
    let options = RunOptions {
        query: "$ |> ~($.total := $.price * $.qty)".to_string(),
        input: Some(r#"{"price": 2.5, "qty": 2}"#.to_string()),
        ..RunOptions::default()
    };
    assert_eq!(
        execute_run(&options).unwrap(),
        json!([{ "price": 2.5, "qty": 2, "total": 5 }])
    );
}

#[test]
fn test_run_input_errors() {
    let missing = RunOptions {
        query: "$.a == 1".to_string(),
        ..RunOptions::default()
    };
    assert!(matches!(execute_run(&missing), Err(CliError::NoInput)));

    let scalar = RunOptions {
        query: "$.a == 1".to_string(),
        input: Some("42".to_string()),
        ..RunOptions::default()
    };
    assert!(matches!(execute_run(&scalar), Err(CliError::NotDocuments("int"))));
}
