use serde_json::Value;
use tracing::trace;

use crate::ast::{AstComparisonOperator, AstFilter, AstFilterField, AstFilterOperation};
use crate::constant::{TranslationContext, evaluate_integer, try_evaluate};
use crate::syntax::{BinOp, Expr, UnaryOp};
use crate::translate::TranslationError;
use crate::translate::expression::ExpressionTranslator;
use crate::translate::path::{PathBase, dotted, extract_path};

/// Translates a boolean front-end expression into a match-language filter.
///
/// # Example
/// ```
/// use serde_json::json;
/// use stagecraft::ast::AstNode;
/// use stagecraft::constant::{ConstantTable, TranslationContext};
/// use stagecraft::parser::parse_expression;
/// use stagecraft::translate::translate_filter;
///
/// let context = TranslationContext::new()
///     .with_constants(ConstantTable::new().with_enum("E", &[("E2", 2), ("E4", 4)]));
/// let expr = parse_expression("($.E & (E.E2 | E.E4)) == 0").unwrap();
/// let filter = translate_filter(&expr, &context).unwrap();
/// assert_eq!(filter.render(), json!({ "E": { "$bitsAllClear": 6 } }));
/// ```
pub fn translate_filter(expr: &Expr, context: &TranslationContext) -> Result<AstFilter, TranslationError> {
    FilterTranslator {
        context,
        scope: Scope::Document,
    }
    .translate(expr)
}

/// What `@` and `$` refer to while translating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Top level: fields are read from the matched document.
    Document,
    /// Inside `$elemMatch`: `@` is the array element being tested.
    Element,
}

struct FilterTranslator<'a> {
    context: &'a TranslationContext,
    scope: Scope,
}

impl FilterTranslator<'_> {
    fn translate(&self, expr: &Expr) -> Result<AstFilter, TranslationError> {
        match expr {
            Expr::BinaryOp {
                op: BinOp::And,
                ..
            } => {
                let mut conjuncts = Vec::new();
                collect_operands(expr, BinOp::And, &mut conjuncts);
                let args = conjuncts
                    .into_iter()
                    .map(|conjunct| self.translate(conjunct))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AstFilter::and(args)?)
            }
            Expr::BinaryOp { op: BinOp::Or, .. } => {
                let mut disjuncts = Vec::new();
                collect_operands(expr, BinOp::Or, &mut disjuncts);
                let args = disjuncts
                    .into_iter()
                    .map(|disjunct| self.translate(disjunct))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AstFilter::or(args)?)
            }
            Expr::UnaryOp {
                op: UnaryOp::Not,
                operand,
            } => Ok(AstFilter::not(self.translate(operand)?)),
            Expr::BinaryOp { op, left, right } if op.is_comparison() => {
                self.translate_comparison(expr, *op, left, right)
            }
            Expr::MethodCall {
                object,
                method,
                args,
            } => self.translate_method(expr, object, method, args),
            _ => match self.resolve_field(expr) {
                // A boolean field on its own
                Some(field) => Ok(AstFilter::field_operation(
                    field,
                    AstFilterOperation::comparison(AstComparisonOperator::Eq, Value::Bool(true)),
                )),
                None => Err(TranslationError::unsupported(expr, "not a filter condition")),
            },
        }
    }

    /// `$.a.b` in document scope; `@` or `@.a` in element scope.
    fn resolve_field(&self, expr: &Expr) -> Option<AstFilterField> {
        let (base, segments) = extract_path(expr)?;
        match (self.scope, base) {
            (Scope::Document, PathBase::Root) | (Scope::Element, PathBase::Element) => {
                if segments.is_empty() {
                    return match base {
                        PathBase::Element => Some(AstFilterField::Element),
                        PathBase::Root => None,
                    };
                }
                dotted(&segments).map(AstFilterField::Path)
            }
            _ => None,
        }
    }

    fn require_field(&self, expr: &Expr, whole: &Expr) -> Result<AstFilterField, TranslationError> {
        self.resolve_field(expr).ok_or_else(|| {
            TranslationError::unsupported(whole, format!("`{}` is not a field reference", expr))
        })
    }

    fn translate_comparison(
        &self,
        expr: &Expr,
        op: BinOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<AstFilter, TranslationError> {
        // Normalize so the interesting shape is on the left
        for (shape, other, op) in [(left, right, op), (right, left, op.mirrored())] {
            match shape {
                Expr::BinaryOp {
                    op: BinOp::BitAnd,
                    left: a,
                    right: b,
                } => return self.translate_bits(expr, op, a, b, other),
                Expr::BinaryOp {
                    op: BinOp::Modulo,
                    left: a,
                    right: b,
                } => return self.translate_mod(expr, op, a, b, other),
                Expr::MethodCall {
                    object,
                    method,
                    args,
                } if args.is_empty() => {
                    if let Some(filter) = self.translate_method_comparison(expr, op, object, method, other)? {
                        return Ok(filter);
                    }
                }
                _ => {}
            }
        }

        for (field, value, op) in [(left, right, op), (right, left, op.mirrored())] {
            if let Some(field) = self.resolve_field(field) {
                if let Some(value) = try_evaluate(value, self.context)? {
                    return Ok(AstFilter::field_operation(
                        field,
                        AstFilterOperation::comparison(comparison_operator(op), value),
                    ));
                }
            }
        }

        self.fallback_to_expr(expr)
    }

    /// `(field & mask) op rhs`, the four bit-test idioms.
    fn translate_bits(
        &self,
        expr: &Expr,
        op: BinOp,
        a: &Expr,
        b: &Expr,
        rhs: &Expr,
    ) -> Result<AstFilter, TranslationError> {
        if !matches!(op, BinOp::Equal | BinOp::NotEqual) {
            return Err(TranslationError::unsupported(
                expr,
                "bit mask tests support only == and !=",
            ));
        }
        let (field, mask_expr) = match (self.resolve_field(a), self.resolve_field(b)) {
            (Some(field), _) => (field, b),
            (None, Some(field)) => (field, a),
            (None, None) => {
                return Err(TranslationError::unsupported(
                    expr,
                    "one operand of '&' must be a field reference",
                ));
            }
        };
        let mask = evaluate_integer(mask_expr, self.context)?.ok_or_else(|| {
            TranslationError::unsupported(expr, "bit mask must be a constant")
        })?;
        if !(0..=i64::from(i32::MAX)).contains(&mask) {
            return Err(TranslationError::unsupported(
                expr,
                format!("bit mask {} is not a non-negative 32-bit integer", mask),
            ));
        }
        let rhs = evaluate_integer(rhs, self.context)?.ok_or_else(|| {
            TranslationError::unsupported(expr, "compared value must be a constant")
        })?;

        trace!(mask, rhs, ?op, "recognized bit mask test");
        // A zero mask matches both checks; zero wins
        let operation = match (op, rhs) {
            (BinOp::Equal, 0) => AstFilterOperation::bits_all_clear(mask)?,
            (BinOp::NotEqual, 0) => AstFilterOperation::bits_any_set(mask)?,
            (BinOp::Equal, rhs) if rhs == mask => AstFilterOperation::bits_all_set(mask)?,
            (BinOp::NotEqual, rhs) if rhs == mask => AstFilterOperation::bits_any_clear(mask)?,
            _ => {
                return Err(TranslationError::unsupported(
                    expr,
                    format!("compared value must be 0 or the mask {}", mask),
                ));
            }
        };
        Ok(AstFilter::field_operation(field, operation))
    }

    /// `(field % divisor) op remainder`
    fn translate_mod(
        &self,
        expr: &Expr,
        op: BinOp,
        a: &Expr,
        b: &Expr,
        rhs: &Expr,
    ) -> Result<AstFilter, TranslationError> {
        if !matches!(op, BinOp::Equal | BinOp::NotEqual) {
            return Err(TranslationError::unsupported(
                expr,
                "modulo tests support only == and !=",
            ));
        }
        let field = self.require_field(a, expr)?;
        let divisor = evaluate_integer(b, self.context)?.ok_or_else(|| {
            TranslationError::unsupported(expr, "divisor must be a constant")
        })?;
        let remainder = evaluate_integer(rhs, self.context)?.ok_or_else(|| {
            TranslationError::unsupported(expr, "remainder must be a constant")
        })?;
        let operation = AstFilterOperation::modulo(divisor, remainder)?;
        Ok(AstFilter::field_operation(
            field,
            match op {
                BinOp::Equal => operation,
                _ => AstFilterOperation::not(operation),
            },
        ))
    }

    /// `field.count() == n`, `field.type() == "string"`. Returns `None` for
    /// shapes that should go through the generic paths instead.
    fn translate_method_comparison(
        &self,
        expr: &Expr,
        op: BinOp,
        object: &Expr,
        method: &str,
        other: &Expr,
    ) -> Result<Option<AstFilter>, TranslationError> {
        if !matches!(op, BinOp::Equal | BinOp::NotEqual) {
            return Ok(None);
        }
        let Some(field) = self.resolve_field(object) else {
            return Ok(None);
        };
        let operation = match method {
            "count" | "length" => match evaluate_integer(other, self.context)? {
                Some(size) => AstFilterOperation::size(size)?,
                None => return Ok(None),
            },
            "type" => match try_evaluate(other, self.context)? {
                Some(Value::String(alias)) => AstFilterOperation::of_type(&alias)?,
                Some(_) => {
                    return Err(TranslationError::unsupported(expr, "type names are strings"));
                }
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(AstFilter::field_operation(
            field,
            match op {
                BinOp::Equal => operation,
                _ => AstFilterOperation::not(operation),
            },
        )))
    }

    fn translate_method(
        &self,
        expr: &Expr,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<AstFilter, TranslationError> {
        if method == "all" {
            return self.fallback_to_expr(expr);
        }
        let field = self.require_field(object, expr)?;
        let operation = match (method, args) {
            ("in", [values]) => match try_evaluate(values, self.context)? {
                Some(Value::Array(values)) => AstFilterOperation::in_values(values),
                _ => {
                    return Err(TranslationError::unsupported(
                        expr,
                        "in() requires a constant array",
                    ));
                }
            },
            ("exists", []) => AstFilterOperation::exists(true),
            ("startswith" | "endswith" | "contains", [arg]) => {
                match self.constant_argument(expr, arg)? {
                    Value::String(text) => {
                        let escaped = regex::escape(&text);
                        let pattern = match method {
                            "startswith" => format!("^{}", escaped),
                            "endswith" => format!("{}$", escaped),
                            _ => escaped,
                        };
                        AstFilterOperation::regex(&pattern, "")?
                    }
                    // Array membership
                    value if method == "contains" => {
                        AstFilterOperation::comparison(AstComparisonOperator::Eq, value)
                    }
                    _ => {
                        return Err(TranslationError::unsupported(
                            expr,
                            format!("{}() requires a string", method),
                        ));
                    }
                }
            }
            ("matches", [pattern]) | ("matches", [pattern, _]) => {
                let pattern = match self.constant_argument(expr, pattern)? {
                    Value::String(pattern) => pattern,
                    _ => return Err(TranslationError::unsupported(expr, "pattern must be a string")),
                };
                let options = match args.get(1) {
                    Some(options) => match self.constant_argument(expr, options)? {
                        Value::String(options) => options,
                        _ => {
                            return Err(TranslationError::unsupported(
                                expr,
                                "regex options must be a string",
                            ));
                        }
                    },
                    None => String::new(),
                };
                AstFilterOperation::regex(&pattern, &options)?
            }
            ("any", []) => {
                let AstFilterField::Path(path) = field else {
                    return Err(TranslationError::unsupported(
                        expr,
                        "any() needs a field path",
                    ));
                };
                return Ok(AstFilter::field_operation(
                    AstFilterField::Path(format!("{}.0", path)),
                    AstFilterOperation::exists(true),
                ));
            }
            ("any", [predicate]) => {
                let element = FilterTranslator {
                    context: self.context,
                    scope: Scope::Element,
                };
                AstFilterOperation::elem_match(element.translate(predicate)?)
            }
            _ => {
                return Err(TranslationError::unsupported(
                    expr,
                    format!("{}() with {} argument(s) is not a filter method", method, args.len()),
                ));
            }
        };
        Ok(AstFilter::field_operation(field, operation))
    }

    fn constant_argument(&self, expr: &Expr, arg: &Expr) -> Result<Value, TranslationError> {
        try_evaluate(arg, self.context)?
            .ok_or_else(|| TranslationError::unsupported(expr, format!("`{}` must be a constant", arg)))
    }

    /// Conditions the match language cannot state directly run as `$expr`.
    fn fallback_to_expr(&self, expr: &Expr) -> Result<AstFilter, TranslationError> {
        if self.scope == Scope::Element {
            return Err(TranslationError::unsupported(
                expr,
                "element conditions must compare a field with a constant",
            ));
        }
        trace!(%expr, "falling back to $expr");
        let expression = ExpressionTranslator::new(self.context).translate(expr)?;
        Ok(AstFilter::expr(expression))
    }
}

/// Flattens `a op (b op c)` into `[a, b, c]`.
fn collect_operands<'e>(expr: &'e Expr, op: BinOp, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::BinaryOp {
            op: inner,
            left,
            right,
        } if *inner == op => {
            collect_operands(left, op, out);
            collect_operands(right, op, out);
        }
        other => out.push(other),
    }
}

fn comparison_operator(op: BinOp) -> AstComparisonOperator {
    match op {
        BinOp::Equal => AstComparisonOperator::Eq,
        BinOp::NotEqual => AstComparisonOperator::Ne,
        BinOp::LessThan => AstComparisonOperator::Lt,
        BinOp::LessEqual => AstComparisonOperator::Lte,
        BinOp::GreaterThan => AstComparisonOperator::Gt,
        _ => AstComparisonOperator::Gte,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ast::AstNode;
    use crate::parser::parse_expression;

    fn translate(source: &str) -> Result<Value, TranslationError> {
        let context = TranslationContext::new().with_parameter("min", 10);
        translate_filter(&parse_expression(source).unwrap(), &context).map(|f| f.render())
    }

    #[test]
    fn constant_on_the_left_mirrors_the_operator() {
        assert_eq!(translate("5 < $.a").unwrap(), json!({ "a": { "$gt": 5 } }));
        assert_eq!(translate("$.a >= $min").unwrap(), json!({ "a": { "$gte": 10 } }));
    }

    #[test]
    fn mask_operands_may_come_in_either_order() {
        assert_eq!(translate("(6 & $.E) != 6").unwrap(), json!({ "E": { "$bitsAnyClear": 6 } }));
        assert_eq!(translate("0 != ($.E & 6)").unwrap(), json!({ "E": { "$bitsAnySet": 6 } }));
    }

    #[test]
    fn zero_mask_prefers_the_zero_checks() {
        assert_eq!(translate("($.E & 0) == 0").unwrap(), json!({ "E": { "$bitsAllClear": 0 } }));
        assert_eq!(translate("($.E & 0) != 0").unwrap(), json!({ "E": { "$bitsAnySet": 0 } }));
    }

    #[test]
    fn out_of_range_masks_are_unsupported() {
        assert!(matches!(
            translate("($.E & 8589934592) == 0"),
            Err(TranslationError::Unsupported { .. })
        ));
        assert!(matches!(translate("($.E & -1) == 0"), Err(TranslationError::Unsupported { .. })));
        assert_eq!(
            translate("($.E & 2147483647) != 0").unwrap(),
            json!({ "E": { "$bitsAnySet": 2147483647 } })
        );
    }

    #[test]
    fn unsupported_mask_shapes_never_fall_back() {
        assert!(matches!(translate("($.E & 6) == 3"), Err(TranslationError::Unsupported { .. })));
        assert!(matches!(translate("($.E & 6) > 0"), Err(TranslationError::Unsupported { .. })));
        assert!(matches!(translate("($.E & $.F) == 0"), Err(TranslationError::Unsupported { .. })));
        assert!(matches!(
            translate("(($.E + 1) & 6) == 0"),
            Err(TranslationError::Unsupported { .. })
        ));
    }

    #[test]
    fn modulo_tests() {
        assert_eq!(translate("($.n % 3) == 1").unwrap(), json!({ "n": { "$mod": [3, 1] } }));
        assert_eq!(
            translate("($.n % 2) != 0").unwrap(),
            json!({ "n": { "$not": { "$mod": [2, 0] } } })
        );
    }

    #[test]
    fn string_methods_become_escaped_regexes() {
        assert_eq!(
            translate("$.name.startswith(\"a.b\")").unwrap(),
            json!({ "name": { "$regex": "^a\\.b" } })
        );
        assert_eq!(
            translate("$.name.matches(\"^x\", \"i\")").unwrap(),
            json!({ "name": { "$regex": "^x", "$options": "i" } })
        );
        assert_eq!(translate("$.tags.contains(3)").unwrap(), json!({ "tags": 3 }));
    }

    #[test]
    fn array_methods() {
        assert_eq!(
            translate("$.items.any(@.price > 5)").unwrap(),
            json!({ "items": { "$elemMatch": { "price": { "$gt": 5 } } } })
        );
        assert_eq!(translate("$.items.any()").unwrap(), json!({ "items.0": { "$exists": true } }));
        assert_eq!(translate("$.items.count() == 2").unwrap(), json!({ "items": { "$size": 2 } }));
        assert_eq!(translate("$.a.type() == \"string\"").unwrap(), json!({ "a": { "$type": "string" } }));
        assert_eq!(translate("$.a.in([1, 2])").unwrap(), json!({ "a": { "$in": [1, 2] } }));
    }

    #[test]
    fn field_against_field_uses_expr() {
        assert_eq!(
            translate("$.a > $.b").unwrap(),
            json!({ "$expr": { "$gt": ["$a", "$b"] } })
        );
    }

    #[test]
    fn logical_operators_flatten() {
        assert_eq!(
            translate("$.a == 1 or $.b == 2 or $.c == 3").unwrap(),
            json!({ "$or": [{ "a": 1 }, { "b": 2 }, { "c": 3 }] })
        );
        assert_eq!(
            translate("$.active and $.deleted == false").unwrap(),
            json!({ "active": true, "deleted": false })
        );
        assert_eq!(
            translate("$.active and not $.deleted").unwrap(),
            json!({ "$and": [{ "active": true }, { "deleted": { "$not": { "$eq": true } } }] })
        );
    }
}
