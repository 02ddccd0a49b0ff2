// tests/parser_tests.rs

use stagecraft::lexer::Position;
use stagecraft::parser::{ParseError, is_pipeline_query, parse_expression, parse_query};
use stagecraft::syntax::{BinOp, Expr, SortDirection, Statement, Token, UnaryOp};

fn field(name: &str) -> Expr {
    Expr::access(Expr::Root, name)
}

fn constant(ty: &str, member: &str) -> Expr {
    Expr::EnumConstant {
        ty: ty.to_string(),
        member: member.to_string(),
    }
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn test_bitmask_shape() {
    let expr = parse_expression("($.E & (E.E2 | E.E4)) == 0").unwrap();
    assert_eq!(
        expr,
        Expr::binary(
            BinOp::Equal,
            Expr::binary(
                BinOp::BitAnd,
                field("E"),
                Expr::binary(BinOp::BitOr, constant("E", "E2"), constant("E", "E4")),
            ),
            Expr::Integer(0),
        )
    );
}

#[test]
fn test_bit_and_binds_tighter_than_bit_or() {
    let expr = parse_expression("$.a | $.b & 4").unwrap();
    assert_eq!(
        expr,
        Expr::binary(
            BinOp::BitOr,
            field("a"),
            Expr::binary(BinOp::BitAnd, field("b"), Expr::Integer(4)),
        )
    );
}

#[test]
fn test_bitwise_binds_tighter_than_comparison() {
    // Unlike C, `$.E & 6 == 0` needs no parentheses
    assert_eq!(
        parse_expression("$.E & 6 == 0").unwrap(),
        parse_expression("($.E & 6) == 0").unwrap()
    );
}

#[test]
fn test_arithmetic_precedence() {
    let expr = parse_expression("$.a + $.b * 2 - 1").unwrap();
    assert_eq!(
        expr,
        Expr::binary(
            BinOp::Subtract,
            Expr::binary(
                BinOp::Add,
                field("a"),
                Expr::binary(BinOp::Multiply, field("b"), Expr::Integer(2)),
            ),
            Expr::Integer(1),
        )
    );
}

#[test]
fn test_logical_precedence() {
    let expr = parse_expression("$.a == 1 or $.b == 2 and not $.c").unwrap();
    assert_eq!(
        expr,
        Expr::binary(
            BinOp::Or,
            Expr::binary(BinOp::Equal, field("a"), Expr::Integer(1)),
            Expr::binary(
                BinOp::And,
                Expr::binary(BinOp::Equal, field("b"), Expr::Integer(2)),
                Expr::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(field("c")),
                },
            ),
        )
    );
}

#[test]
fn test_null_coalesce_sits_below_comparison() {
    let expr = parse_expression("$.a ?? 0 > 5").unwrap();
    assert_eq!(
        expr,
        Expr::binary(
            BinOp::GreaterThan,
            Expr::binary(BinOp::NullCoalesce, field("a"), Expr::Integer(0)),
            Expr::Integer(5),
        )
    );
}

#[test]
fn test_comparisons_do_not_chain() {
    assert!(parse_expression("1 < $.a < 3").is_err());
}

#[test]
fn test_negative_literals_fold() {
    assert_eq!(parse_expression("-1").unwrap(), Expr::Integer(-1));
    assert_eq!(parse_expression("-2.5").unwrap(), Expr::Float(-2.5));
    assert_eq!(
        parse_expression("-$.a").unwrap(),
        Expr::UnaryOp {
            op: UnaryOp::Negate,
            operand: Box::new(field("a")),
        }
    );
}

// ============================================================================
// Access and Calls
// ============================================================================

#[test]
fn test_access_forms() {
    let expected = Expr::access(field("user"), "name");
    assert_eq!(parse_expression("$.user.name").unwrap(), expected);
    assert_eq!(parse_expression("$[user][name]").unwrap(), expected);
    assert_eq!(parse_expression("$[\"user\"].name").unwrap(), expected);
    assert_eq!(
        parse_expression("$.items[0]").unwrap(),
        Expr::Access {
            object: Box::new(field("items")),
            key: Box::new(Expr::Integer(0)),
        }
    );
}

#[test]
fn test_method_calls() {
    assert_eq!(
        parse_expression("$.items.any(@.price > 100)").unwrap(),
        Expr::MethodCall {
            object: Box::new(field("items")),
            method: "any".into(),
            args: vec![Expr::binary(
                BinOp::GreaterThan,
                Expr::access(Expr::LambdaParam, "price"),
                Expr::Integer(100),
            )],
        }
    );
    assert_eq!(
        parse_expression("$.name.matches(\"^a\", \"i\")").unwrap(),
        Expr::MethodCall {
            object: Box::new(field("name")),
            method: "matches".into(),
            args: vec![Expr::String("^a".into()), Expr::String("i".into())],
        }
    );
}

#[test]
fn test_literals_and_parameters() {
    assert_eq!(
        parse_expression("{\"a\": [1, $limit, null], b: true}").unwrap(),
        Expr::Object(vec![
            (
                "a".into(),
                Expr::Array(vec![Expr::Integer(1), Expr::Param("limit".into()), Expr::Null]),
            ),
            ("b".into(), Expr::Boolean(true)),
        ])
    );
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_query_statements_keep_order() {
    let query = parse_query(
        "$ |> ?($.status == \"active\") |> ~($.total := $.price * $.qty) |> sort($.total desc, $.name) |> skip(5) |> limit(10) |> !($.total)",
    )
    .unwrap();
    assert_eq!(query.statements.len(), 6);
    assert!(matches!(query.statements[0], Statement::Filter(_)));
    assert!(matches!(&query.statements[1], Statement::Transform(assignments) if assignments.len() == 1));
    assert_eq!(
        query.statements[2],
        Statement::Sort(vec![
            (field("total"), SortDirection::Descending),
            (field("name"), SortDirection::Ascending),
        ])
    );
    assert_eq!(query.statements[3], Statement::Skip(5));
    assert_eq!(query.statements[4], Statement::Limit(10));
    assert_eq!(query.statements[5], Statement::Output(field("total")));
}

#[test]
fn test_transform_filter_value() {
    let query = parse_query("$ |> ~($.items := ?(@.qty > 0))").unwrap();
    assert_eq!(
        query.statements,
        vec![Statement::Transform(vec![(
            field("items"),
            Expr::Filter(Box::new(Expr::binary(
                BinOp::GreaterThan,
                Expr::access(Expr::LambdaParam, "qty"),
                Expr::Integer(0),
            ))),
        )])]
    );
}

#[test]
fn test_unwind_preserving_empty_arrays() {
    let query = parse_query("$ |> unwind($.tags, true)").unwrap();
    assert_eq!(
        query.statements[0],
        Statement::Unwind {
            path: field("tags"),
            preserve_null_and_empty_arrays: true,
        }
    );
    assert!(matches!(
        parse_query("$ |> unwind($.tags, 1)"),
        Err(ParseError::Expected { .. })
    ));
}

#[test]
fn test_keyword_stages() {
    let query = parse_query(
        "$ |> unwind($.tags) |> group($.tags, {\"n\": $.count()}) |> count(\"total\")",
    )
    .unwrap();
    assert_eq!(
        query.statements[0],
        Statement::Unwind {
            path: field("tags"),
            preserve_null_and_empty_arrays: false,
        }
    );
    assert!(matches!(
        &query.statements[1],
        Statement::Group { key, accumulators } if *key == field("tags") && accumulators.len() == 1
    ));
    assert_eq!(query.statements[2], Statement::Count("total".into()));
}

#[test]
fn test_empty_query() {
    assert!(parse_query("$").unwrap().statements.is_empty());
}

#[test]
fn test_is_pipeline_query() {
    assert!(is_pipeline_query("$ |> limit(1)"));
    assert!(is_pipeline_query("  $|>?($.a)"));
    assert!(!is_pipeline_query("$.a == 1"));
    assert!(!is_pipeline_query("($.E & 6) == 0"));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_bare_identifier() {
    assert_eq!(
        parse_expression("status == 1"),
        Err(ParseError::BareIdentifier("status".into()))
    );
}

#[test]
fn test_unknown_stage() {
    assert_eq!(
        parse_query("$ |> shuffle(1)"),
        Err(ParseError::UnknownStage("shuffle".into()))
    );
}

#[test]
fn test_trailing_tokens_are_rejected() {
    assert_eq!(
        parse_expression("$.a 1"),
        Err(ParseError::Expected {
            expected: "Eof".into(),
            found: Token::Integer(1),
            position: Position(4),
        })
    );
}

#[test]
fn test_skip_needs_an_integer() {
    assert!(matches!(
        parse_query("$ |> skip(\"5\")"),
        Err(ParseError::Expected { found: Token::String(_), .. })
    ));
}

#[test]
fn test_lex_errors_surface() {
    assert!(matches!(parse_expression("$.a = 1"), Err(ParseError::Lex(_))));
}
