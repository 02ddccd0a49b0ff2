// tests/ast_tests.rs

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use stagecraft::ast::visitor::{AstRewriter, rebuild_filter};
use stagecraft::ast::{
    AstBinaryOperator, AstComparisonOperator, AstComputedField, AstError, AstExpression, AstFilter, AstFilterField,
    AstFilterOperation, AstNaryOperator, AstNode, AstPipeline, AstReplaceRootStage, AstSortField,
    AstSortOrder, AstStage,
};
use stagecraft::output::to_json;

struct Identity;

impl AstRewriter for Identity {}

/// Moves every field operation on `old` to `new`.
struct RenameField;

impl AstRewriter for RenameField {
    fn rewrite_filter(&mut self, filter: &AstFilter) -> Result<AstFilter, AstError> {
        if let AstFilter::FieldOperation(node) = filter {
            if node.field().as_path() == Some("old") {
                return Ok(AstFilter::field_operation(
                    AstFilterField::path("new")?,
                    node.operation().clone(),
                ));
            }
        }
        rebuild_filter(self, filter)
    }
}

fn bits(path: &str, mask: i64) -> AstFilter {
    AstFilter::field_operation(
        AstFilterField::path(path).unwrap(),
        AstFilterOperation::bits_all_clear(mask).unwrap(),
    )
}

// ============================================================================
// Update Identity
// ============================================================================

#[test]
fn test_update_with_same_children_returns_same_node() {
    let expression = AstExpression::binary(
        AstBinaryOperator::Gt,
        AstExpression::field("a").unwrap(),
        AstExpression::constant(1),
    );
    let AstExpression::Binary(node) = &expression else {
        panic!("expected a binary expression, got {:?}", expression);
    };
    let same = node.update(node.arg1().clone(), node.arg2().clone());
    assert!(Arc::ptr_eq(node, &same));
}

#[test]
fn test_update_with_equal_but_distinct_child_allocates() {
    let node = Arc::new(AstReplaceRootStage::new(AstExpression::field("a").unwrap()));
    // Equal value, different instance
    let replaced = node.update(AstExpression::field("a").unwrap());
    assert!(!Arc::ptr_eq(&node, &replaced));
    assert_eq!(
        AstStage::ReplaceRoot(node).render(),
        AstStage::ReplaceRoot(replaced).render()
    );
}

#[test]
fn test_pipeline_update_identity() {
    let pipeline = Arc::new(AstPipeline::new(vec![
        AstStage::match_filter(bits("E", 6)),
        AstStage::limit(5).unwrap(),
    ]));
    let same = pipeline.update(pipeline.stages().to_vec());
    assert!(Arc::ptr_eq(&pipeline, &same));

    let reordered = pipeline.update(pipeline.stages().iter().rev().cloned().collect());
    assert!(!Arc::ptr_eq(&pipeline, &reordered));
}

// ============================================================================
// Rewrites
// ============================================================================

#[test]
fn test_partial_rewrite_shares_untouched_siblings() {
    let untouched = AstFilter::or(vec![bits("a", 1), bits("b", 2)]).unwrap();
    let filter = AstFilter::and(vec![untouched.clone(), bits("old", 4)]).unwrap();

    let rewritten = RenameField.rewrite_filter(&filter).unwrap();
    assert!(!rewritten.ptr_eq(&filter));

    let AstFilter::And(node) = &rewritten else {
        panic!("expected $and, got {:?}", rewritten);
    };
    assert!(node.args()[0].ptr_eq(&untouched));
    assert_eq!(
        rewritten.render(),
        json!({ "$and": [
            { "$or": [{ "a": { "$bitsAllClear": 1 } }, { "b": { "$bitsAllClear": 2 } }] },
            { "new": { "$bitsAllClear": 4 } }
        ] })
    );
}

#[test]
fn test_rewrite_without_matches_returns_input() {
    let filter = AstFilter::and(vec![bits("a", 1), AstFilter::not(bits("b", 2))]).unwrap();
    let rewritten = RenameField.rewrite_filter(&filter).unwrap();
    assert!(rewritten.ptr_eq(&filter));
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_replace_root_renders_new_root() {
    let expression = AstExpression::nary(
        AstNaryOperator::Add,
        vec![AstExpression::field("a").unwrap(), AstExpression::constant(1)],
    )
    .unwrap();
    let stage = AstStage::replace_root(expression.clone());
    assert_eq!(stage.render(), json!({ "$replaceRoot": { "newRoot": expression.render() } }));
    assert_eq!(stage.render(), json!({ "$replaceRoot": { "newRoot": { "$add": ["$a", 1] } } }));
}

#[test]
fn test_assembler_keeps_append_order() {
    let a = AstStage::match_filter(bits("E", 6));
    let b = AstStage::skip(3).unwrap();
    let c = AstStage::replace_root(AstExpression::field("inner").unwrap());

    let mut pipeline = AstPipeline::default();
    pipeline.push(a.clone());
    pipeline.push(b.clone());
    pipeline.push(c.clone());

    assert_eq!(pipeline.render_stages(), vec![a.render(), b.render(), c.render()]);
    assert_eq!(
        to_json(&pipeline.render()),
        r#"[{"$match":{"E":{"$bitsAllClear":6}}},{"$skip":3},{"$replaceRoot":{"newRoot":"$inner"}}]"#
    );
}

#[test]
fn test_and_keeps_element_operators_apart_from_paths() {
    let element = |operator, value: i64| {
        AstFilter::field_operation(
            AstFilterField::Element,
            AstFilterOperation::comparison(operator, json!(value)),
        )
    };
    let path = AstFilter::field_operation(
        AstFilterField::path("x").unwrap(),
        AstFilterOperation::comparison(AstComparisonOperator::Eq, json!(2)),
    );

    let mixed = AstFilter::and(vec![element(AstComparisonOperator::Gt, 1), path]).unwrap();
    assert_eq!(mixed.render(), json!({ "$and": [{ "$gt": 1 }, { "x": 2 }] }));

    let range = AstFilter::and(vec![
        element(AstComparisonOperator::Gt, 1),
        element(AstComparisonOperator::Lt, 5),
    ])
    .unwrap();
    assert_eq!(range.render(), json!({ "$gt": 1, "$lt": 5 }));
}

#[test]
fn test_dollar_strings_render_as_literals() {
    assert_eq!(AstExpression::constant("$price").render(), json!({ "$literal": "$price" }));
    assert_eq!(AstExpression::constant("price").render(), json!("price"));
}

// ============================================================================
// Construction Errors
// ============================================================================

#[test]
fn test_invalid_construction_is_rejected() {
    assert!(AstFilter::and(Vec::new()).is_err());
    assert!(AstStage::skip(-1).is_err());
    assert!(AstStage::limit(0).is_err());
    assert!(AstStage::count("$n").is_err());
    assert!(AstFilterField::path("a..b").is_err());
    assert!(AstFilterOperation::modulo(0, 1).is_err());
    assert!(AstFilterOperation::regex("a", "q").is_err());
    assert!(AstExpression::field("").is_err());
}

#[test]
fn test_duplicate_stage_paths_are_rejected() {
    let added = AstStage::add_fields(vec![
        AstComputedField::new("a", AstExpression::constant(1)).unwrap(),
        AstComputedField::new("a", AstExpression::constant(2)).unwrap(),
    ]);
    assert!(matches!(added, Err(AstError::InvalidArgument { name: "fields", .. })));

    let sorted = AstStage::sort(vec![
        AstSortField::new("a", AstSortOrder::Ascending).unwrap(),
        AstSortField::new("b", AstSortOrder::Descending).unwrap(),
        AstSortField::new("a", AstSortOrder::Descending).unwrap(),
    ]);
    assert!(matches!(sorted, Err(AstError::InvalidArgument { name: "fields", .. })));

    let distinct = AstStage::sort(vec![
        AstSortField::new("a", AstSortOrder::Ascending).unwrap(),
        AstSortField::new("b", AstSortOrder::Descending).unwrap(),
    ])
    .unwrap();
    assert_eq!(distinct.render(), json!({ "$sort": { "a": 1, "b": -1 } }));
}

// ============================================================================
// Properties
// ============================================================================

fn leaf() -> impl Strategy<Value = AstFilter> {
    ("[a-z]{1,6}", 0i64..1024, 0u8..5).prop_map(|(path, n, kind)| {
        let field = AstFilterField::path(&path).unwrap();
        let operation = match kind {
            0 => AstFilterOperation::bits_all_clear(n).unwrap(),
            1 => AstFilterOperation::bits_any_set(n).unwrap(),
            2 => AstFilterOperation::modulo(n + 1, 0).unwrap(),
            3 => AstFilterOperation::in_values(vec![json!(n), json!(path.clone())]),
            _ => AstFilterOperation::exists(n % 2 == 0),
        };
        AstFilter::field_operation(field, operation)
    })
}

fn filter() -> impl Strategy<Value = AstFilter> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(|args| AstFilter::and(args).unwrap()),
            prop::collection::vec(inner.clone(), 1..4).prop_map(|args| AstFilter::or(args).unwrap()),
            inner.prop_map(AstFilter::not),
        ]
    })
}

proptest! {
    #[test]
    fn prop_rendering_is_deterministic(filter in filter()) {
        let first = filter.render();
        let second = filter.render();
        prop_assert_eq!(to_json(&first), to_json(&second));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_identity_rewrite_returns_same_filter(filter in filter()) {
        let rewritten = Identity.rewrite_filter(&filter).unwrap();
        prop_assert!(rewritten.ptr_eq(&filter));
    }

    #[test]
    fn prop_identity_rewrite_returns_same_pipeline(filters in prop::collection::vec(filter(), 0..5)) {
        let pipeline: Arc<AstPipeline> = Arc::new(filters.into_iter().map(AstStage::match_filter).collect());
        let rewritten = Identity.rewrite_pipeline(&pipeline).unwrap();
        prop_assert!(Arc::ptr_eq(&pipeline, &rewritten));
    }
}
