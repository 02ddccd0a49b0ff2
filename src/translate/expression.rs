use serde_json::Value;

use crate::ast::{AstBinaryOperator, AstExpression, AstNaryOperator, AstUnaryOperator};
use crate::constant::{TranslationContext, try_evaluate};
use crate::syntax::{BinOp, Expr, UnaryOp};
use crate::translate::TranslationError;
use crate::translate::path::is_path_segment;

/// Name bound to the current element by `$filter` and `$map`.
pub(crate) const ELEMENT_VARIABLE: &str = "this";

/// Translates a front-end expression into an aggregation expression.
///
/// # Example
/// ```
/// use serde_json::json;
/// use stagecraft::ast::AstNode;
/// use stagecraft::constant::TranslationContext;
/// use stagecraft::parser::parse_expression;
/// use stagecraft::translate::translate_expression;
///
/// let expr = parse_expression("$.price * ($.qty ?? 1)").unwrap();
/// let ast = translate_expression(&expr, &TranslationContext::new()).unwrap();
/// assert_eq!(ast.render(), json!({ "$multiply": ["$price", { "$ifNull": ["$qty", 1] }] }));
/// ```
pub fn translate_expression(
    expr: &Expr,
    context: &TranslationContext,
) -> Result<AstExpression, TranslationError> {
    ExpressionTranslator::new(context).translate(expr)
}

pub(crate) struct ExpressionTranslator<'a> {
    context: &'a TranslationContext,
    /// True inside an array method body, where `@` is bound.
    in_element: bool,
}

impl<'a> ExpressionTranslator<'a> {
    pub(crate) fn new(context: &'a TranslationContext) -> Self {
        ExpressionTranslator {
            context,
            in_element: false,
        }
    }

    /// A translator for bodies evaluated once per array element.
    pub(crate) fn for_element(context: &'a TranslationContext) -> Self {
        ExpressionTranslator {
            context,
            in_element: true,
        }
    }

    pub(crate) fn translate(&self, expr: &Expr) -> Result<AstExpression, TranslationError> {
        if let Some(value) = try_evaluate(expr, self.context)? {
            return Ok(AstExpression::constant(value));
        }

        match expr {
            Expr::Root => Ok(AstExpression::root()),
            Expr::LambdaParam => {
                if self.in_element {
                    Ok(AstExpression::this())
                } else {
                    Err(TranslationError::unsupported(
                        expr,
                        "`@` is only bound inside array methods and transforms",
                    ))
                }
            }
            Expr::Access { object, key } => self.translate_access(expr, object, key),
            Expr::UnaryOp { op, operand } => {
                let operand = self.translate(operand)?;
                Ok(match op {
                    UnaryOp::Not => AstExpression::unary(AstUnaryOperator::Not, operand),
                    UnaryOp::Negate => AstExpression::binary(
                        AstBinaryOperator::Subtract,
                        AstExpression::constant(0),
                        operand,
                    ),
                })
            }
            Expr::BinaryOp { op, left, right } => self.translate_binary(*op, left, right),
            Expr::MethodCall {
                object,
                method,
                args,
            } => self.translate_method(expr, object, method, args),
            Expr::Object(pairs) => {
                let fields = pairs
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.translate(value)?)))
                    .collect::<Result<Vec<_>, TranslationError>>()?;
                Ok(AstExpression::computed_document(fields)?)
            }
            Expr::Array(elements) => {
                let items = elements
                    .iter()
                    .map(|element| self.translate(element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AstExpression::computed_array(items))
            }
            Expr::Filter(_) => Err(TranslationError::unsupported(
                expr,
                "filter predicates are only valid as transform values",
            )),
            Expr::Key(_) => Err(TranslationError::unsupported(expr, "bare key")),
            // Literals, parameters and enum constants were folded above
            Expr::Integer(_)
            | Expr::Float(_)
            | Expr::String(_)
            | Expr::Boolean(_)
            | Expr::Null
            | Expr::Param(_)
            | Expr::EnumConstant { .. } => Err(TranslationError::unsupported(expr, "unresolved constant")),
        }
    }

    fn translate_access(&self, expr: &Expr, object: &Expr, key: &Expr) -> Result<AstExpression, TranslationError> {
        let input = self.translate(object)?;
        let key = match key {
            Expr::Key(name) => Value::String(name.clone()),
            other => try_evaluate(other, self.context)?.ok_or_else(|| {
                TranslationError::unsupported(expr, "computed keys must be constant")
            })?,
        };
        match key {
            Value::String(name) => Ok(field_of(input, &name)?),
            Value::Number(n) => match n.as_i64() {
                Some(index) => Ok(AstExpression::binary(
                    AstBinaryOperator::ArrayElemAt,
                    input,
                    AstExpression::constant(index),
                )),
                None => Err(TranslationError::unsupported(expr, "array index must be an integer")),
            },
            _ => Err(TranslationError::unsupported(expr, "key must be a string or an integer")),
        }
    }

    fn translate_binary(&self, op: BinOp, left: &Expr, right: &Expr) -> Result<AstExpression, TranslationError> {
        let concat = op == BinOp::Add && (self.is_string_valued(left)? || self.is_string_valued(right)?);
        let left = self.translate(left)?;
        let right = self.translate(right)?;

        let operator = match op {
            BinOp::Equal => AstBinaryOperator::Eq,
            BinOp::NotEqual => AstBinaryOperator::Ne,
            BinOp::LessThan => AstBinaryOperator::Lt,
            BinOp::LessEqual => AstBinaryOperator::Lte,
            BinOp::GreaterThan => AstBinaryOperator::Gt,
            BinOp::GreaterEqual => AstBinaryOperator::Gte,
            BinOp::Subtract => AstBinaryOperator::Subtract,
            BinOp::Divide => AstBinaryOperator::Divide,
            BinOp::Modulo => AstBinaryOperator::Mod,
            BinOp::NullCoalesce => AstBinaryOperator::IfNull,
            BinOp::Add | BinOp::Multiply | BinOp::BitAnd | BinOp::BitOr | BinOp::And | BinOp::Or => {
                let operator = match op {
                    BinOp::Add if concat => AstNaryOperator::Concat,
                    BinOp::Add => AstNaryOperator::Add,
                    BinOp::Multiply => AstNaryOperator::Multiply,
                    BinOp::BitAnd => AstNaryOperator::BitAnd,
                    BinOp::BitOr => AstNaryOperator::BitOr,
                    BinOp::And => AstNaryOperator::And,
                    _ => AstNaryOperator::Or,
                };
                return Ok(AstExpression::nary(operator, vec![left, right])?);
            }
        };
        Ok(AstExpression::binary(operator, left, right))
    }

    /// String constants, and sums or case conversions involving them.
    fn is_string_valued(&self, expr: &Expr) -> Result<bool, TranslationError> {
        if let Some(value) = try_evaluate(expr, self.context)? {
            return Ok(value.is_string());
        }
        match expr {
            Expr::BinaryOp {
                op: BinOp::Add,
                left,
                right,
            } => Ok(self.is_string_valued(left)? || self.is_string_valued(right)?),
            Expr::MethodCall { method, .. } => Ok(matches!(method.as_str(), "upper" | "lower" | "trim")),
            _ => Ok(false),
        }
    }

    fn translate_method(
        &self,
        expr: &Expr,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<AstExpression, TranslationError> {
        let input = self.translate(object)?;

        let unary = match (method, args) {
            ("upper", []) => Some(AstUnaryOperator::ToUpper),
            ("lower", []) => Some(AstUnaryOperator::ToLower),
            ("trim", []) => Some(AstUnaryOperator::Trim),
            ("count" | "length", []) => Some(AstUnaryOperator::Size),
            ("sum", []) => Some(AstUnaryOperator::Sum),
            ("min", []) => Some(AstUnaryOperator::Min),
            ("max", []) => Some(AstUnaryOperator::Max),
            ("avg", []) => Some(AstUnaryOperator::Avg),
            ("first", []) => Some(AstUnaryOperator::First),
            ("last", []) => Some(AstUnaryOperator::Last),
            ("abs", []) => Some(AstUnaryOperator::Abs),
            ("type", []) => Some(AstUnaryOperator::Type),
            _ => None,
        };
        if let Some(operator) = unary {
            return Ok(AstExpression::unary(operator, input));
        }

        match (method, args) {
            ("any", []) => Ok(AstExpression::binary(
                AstBinaryOperator::Gt,
                AstExpression::unary(AstUnaryOperator::Size, input),
                AstExpression::constant(0),
            )),
            ("any", [predicate]) => Ok(AstExpression::unary(
                AstUnaryOperator::AnyElementTrue,
                self.map_elements(input, predicate)?,
            )),
            ("all", [predicate]) => Ok(AstExpression::unary(
                AstUnaryOperator::AllElementsTrue,
                self.map_elements(input, predicate)?,
            )),
            ("filter", [predicate]) => {
                let cond = ExpressionTranslator::for_element(self.context).translate(predicate)?;
                Ok(AstExpression::array_filter(input, ELEMENT_VARIABLE, cond)?)
            }
            ("map", [body]) => self.map_elements(input, body),
            // `xs.contains(v)` is `v in xs`
            ("contains", [arg]) => Ok(AstExpression::binary(AstBinaryOperator::In, self.translate(arg)?, input)),
            ("in", [arg]) => Ok(AstExpression::binary(AstBinaryOperator::In, input, self.translate(arg)?)),
            ("split", [separator]) => Ok(AstExpression::binary(
                AstBinaryOperator::Split,
                input,
                self.translate(separator)?,
            )),
            _ => Err(TranslationError::unsupported(
                expr,
                format!("unknown method {}() with {} argument(s)", method, args.len()),
            )),
        }
    }

    fn map_elements(&self, input: AstExpression, body: &Expr) -> Result<AstExpression, TranslationError> {
        let body = ExpressionTranslator::for_element(self.context).translate(body)?;
        Ok(AstExpression::map(input, ELEMENT_VARIABLE, body)?)
    }
}

/// `input.name`, staying a plain field path while possible.
fn field_of(input: AstExpression, name: &str) -> Result<AstExpression, TranslationError> {
    if !is_path_segment(name) {
        return Ok(AstExpression::get_field(name, input)?);
    }
    let extended = match &input {
        AstExpression::Variable(node) if node.name() == "ROOT" => AstExpression::field(name)?,
        AstExpression::Variable(node) => AstExpression::variable_field(node.name(), name)?,
        AstExpression::Field(node) => {
            let path = format!("{}.{}", node.path(), name);
            match node.variable() {
                None => AstExpression::field(&path)?,
                Some(variable) => AstExpression::variable_field(variable, &path)?,
            }
        }
        _ => AstExpression::get_field(name, input)?,
    };
    Ok(extended)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ast::AstNode;
    use crate::parser::parse_expression;

    fn translate(source: &str) -> Result<Value, TranslationError> {
        let context = TranslationContext::new().with_parameter("rate", 2);
        translate_expression(&parse_expression(source).unwrap(), &context).map(|e| e.render())
    }

    #[test]
    fn constants_are_folded() {
        assert_eq!(translate("$rate * 3 + 1").unwrap(), json!(7));
        assert_eq!(translate("\"$5\"").unwrap(), json!({ "$literal": "$5" }));
    }

    #[test]
    fn references() {
        assert_eq!(translate("$").unwrap(), json!("$$ROOT"));
        assert_eq!(translate("$.a.b").unwrap(), json!("$a.b"));
        assert_eq!(translate("$.items[0]").unwrap(), json!({ "$arrayElemAt": ["$items", 0] }));
        assert_eq!(
            translate("$.items[0].price").unwrap(),
            json!({ "$getField": { "field": "price", "input": { "$arrayElemAt": ["$items", 0] } } })
        );
        assert!(translate("@").is_err());
    }

    #[test]
    fn string_addition_concatenates() {
        assert_eq!(
            translate("$.first + \" \" + $.last").unwrap(),
            json!({ "$concat": [{ "$concat": ["$first", " "] }, "$last"] })
        );
    }

    #[test]
    fn array_methods_bind_this() {
        assert_eq!(
            translate("$.items.filter(@.qty > 0)").unwrap(),
            json!({ "$filter": { "input": "$items", "as": "this", "cond": { "$gt": ["$$this.qty", 0] } } })
        );
        assert_eq!(
            translate("$.items.map(@.price * $rate)").unwrap(),
            json!({ "$map": { "input": "$items", "as": "this", "in": { "$multiply": ["$$this.price", 2] } } })
        );
        assert_eq!(
            translate("$.tags.contains(\"x\")").unwrap(),
            json!({ "$in": ["x", "$tags"] })
        );
    }

    #[test]
    fn bitwise_and_coalescing() {
        assert_eq!(translate("$.E & 6").unwrap(), json!({ "$bitAnd": ["$E", 6] }));
        assert_eq!(translate("$.name ?? \"n/a\"").unwrap(), json!({ "$ifNull": ["$name", "n/a"] }));
        assert_eq!(translate("$.name.trim()").unwrap(), json!({ "$trim": { "input": "$name" } }));
    }

    #[test]
    fn unknown_methods_are_unsupported() {
        let err = translate("$.a.frobnicate()").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported expression `$.a.frobnicate()`: unknown method frobnicate() with 0 argument(s)"
        );
    }
}
