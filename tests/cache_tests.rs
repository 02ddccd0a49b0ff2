// tests/cache_tests.rs

use std::sync::Arc;
use std::thread;

use serde_json::json;
use stagecraft::cache::{
    CompileOptions, CompiledPipeline, Compiler, DEFAULT_CACHE_CAPACITY, fingerprint,
};
use stagecraft::constant::{ConstantTable, TranslationContext};

const QUERY: &str = "$ |> ?(($.E & (E.E2 | E.E4)) == 0) |> limit(10)";

fn compiler(options: CompileOptions) -> Compiler {
    let constants = ConstantTable::new().with_enum("E", &[("E2", 2), ("E4", 4)]);
    Compiler::new(TranslationContext::new().with_constants(constants), options)
}

// ============================================================================
// Memoization
// ============================================================================

#[test]
fn test_concurrent_callers_share_one_compilation() {
    let compiler = compiler(CompileOptions::default());

    let results: Vec<Arc<CompiledPipeline>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| compiler.compile(QUERY).unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(compiler.cache().len(), 1);
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
    assert_eq!(
        results[0].render(),
        json!([{ "$match": { "E": { "$bitsAllClear": 6 } } }, { "$limit": 10 }])
    );
}

#[test]
fn test_surrounding_whitespace_shares_an_entry() {
    let compiler = compiler(CompileOptions::default());
    let first = compiler.compile(QUERY).unwrap();
    let second = compiler.compile(&format!("  {}\n", QUERY)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(compiler.cache().len(), 1);
}

#[test]
fn test_distinct_queries_get_distinct_entries() {
    let compiler = compiler(CompileOptions::default());
    compiler.compile("($.E & E.E2) == 0").unwrap();
    compiler.compile("($.E & E.E4) == 0").unwrap();
    assert_eq!(compiler.cache().len(), 2);

    compiler.cache().clear();
    assert!(compiler.cache().is_empty());
}

#[test]
fn test_cache_can_be_disabled() {
    let compiler = compiler(CompileOptions {
        cache: false,
        ..CompileOptions::default()
    });
    let first = compiler.compile(QUERY).unwrap();
    let second = compiler.compile(QUERY).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.render(), second.render());
    assert!(compiler.cache().is_empty());
}

#[test]
fn test_errors_are_returned_every_time() {
    let compiler = compiler(CompileOptions::default());
    assert!(compiler.compile("($.E & E.E2) == 3").is_err());
    assert!(compiler.compile("($.E & E.E2) == 3").is_err());
    assert!(compiler.cache().is_empty());
}

#[test]
fn test_cache_size_is_bounded() {
    let compiler = compiler(CompileOptions {
        cache_capacity: 16,
        ..CompileOptions::default()
    });
    assert_eq!(compiler.cache().capacity(), 16);
    for i in 0..1000 {
        compiler.compile(&format!("$.a == {}", i)).unwrap();
        assert!(compiler.cache().len() <= 16);
    }
    assert_eq!(compiler.cache().len(), 16);

    // The most recent entry survived eviction
    let last = compiler.compile("$.a == 999").unwrap();
    assert!(Arc::ptr_eq(&last, &compiler.compile("$.a == 999").unwrap()));
    assert_eq!(compiler.cache().len(), 16);
}

#[test]
fn test_default_capacity() {
    let compiler = compiler(CompileOptions::default());
    assert_eq!(compiler.cache().capacity(), DEFAULT_CACHE_CAPACITY);
}

// ============================================================================
// Fingerprints
// ============================================================================

#[test]
fn test_fingerprint_depends_on_constants() {
    let options = CompileOptions::default();
    let narrow = TranslationContext::new()
        .with_constants(ConstantTable::new().with_enum("E", &[("E2", 2)]));
    let wide = TranslationContext::new()
        .with_constants(ConstantTable::new().with_enum("E", &[("E2", 3)]));
    assert_ne!(
        fingerprint(QUERY, &narrow, options),
        fingerprint(QUERY, &wide, options)
    );
    assert_eq!(
        fingerprint(QUERY, &narrow, options),
        fingerprint(QUERY, &narrow.clone(), options)
    );
}

#[test]
fn test_fingerprint_depends_on_parameters_and_passes() {
    let context = TranslationContext::new().with_parameter("mask", 6);
    let other = TranslationContext::new().with_parameter("mask", json!([6]));
    let options = CompileOptions::default();
    assert_ne!(
        fingerprint("($.E & $mask) == 0", &context, options),
        fingerprint("($.E & $mask) == 0", &other, options)
    );

    let coalescing = CompileOptions {
        coalesce_stages: true,
        ..options
    };
    assert_ne!(
        fingerprint(QUERY, &context, options),
        fingerprint(QUERY, &context, coalescing)
    );
}

#[test]
fn test_coalescing_is_opt_in() {
    let query = "$ |> ?($.a == 1) |> ?($.b == 2) |> limit(5) |> limit(3)";
    assert_eq!(
        compiler(CompileOptions::default()).compile(query).unwrap().render(),
        json!([
            { "$match": { "a": 1 } },
            { "$match": { "b": 2 } },
            { "$limit": 5 },
            { "$limit": 3 }
        ])
    );
    let coalescing = CompileOptions {
        coalesce_stages: true,
        ..CompileOptions::default()
    };
    assert_eq!(
        compiler(coalescing).compile(query).unwrap().render(),
        json!([{ "$match": { "a": 1, "b": 2 } }, { "$limit": 3 }])
    );
}
