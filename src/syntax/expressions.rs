use std::fmt;

use crate::syntax::{BinOp, UnaryOp};

/// Syntax tree node representing a parsed front-end expression.
///
/// The translator pattern-matches these shapes onto pipeline AST nodes; the
/// [`fmt::Display`] rendering is what unsupported-expression errors quote
/// back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    /// Literal floating point number
    Float(f64),

    /// Literal integer
    Integer(i64),

    /// String literal
    String(String),

    /// Boolean literal
    Boolean(bool),

    /// Null literal
    Null,

    // References
    /// Current document (`$`)
    Root,

    /// Current array element (`@`)
    ///
    /// Only meaningful inside a predicate or projection applied to array
    /// elements: `.any()`, `.all()`, `.filter()`, `.map()` and array
    /// transforms.
    LambdaParam,

    /// Bound query parameter
    ///
    /// # Examples
    /// ```text
    /// $mask       // Param("mask")
    /// $min_price  // Param("min_price")
    /// ```
    Param(String),

    /// Named enum or flag constant
    ///
    /// # Example
    /// ```text
    /// Perm.Read   // EnumConstant { ty: "Perm", member: "Read" }
    /// ```
    EnumConstant { ty: String, member: String },

    /// Field or property name. Only appears as the `key` in `Expr::Access`.
    Key(String),

    // Access
    /// Field or index access
    ///
    /// # Examples
    /// ```text
    /// $.field
    /// $[field]
    /// $.items[0]
    /// ```
    Access {
        object: Box<Expr>,
        key: Box<Expr>,
    },

    /// Filter predicate used as a transform value
    ///
    /// # Example
    /// ```text
    /// ~($.items := ?(@.price > 100))
    /// ```
    Filter(Box<Expr>),

    // Operations
    /// Unary operation (`not`, `-`)
    UnaryOp { op: UnaryOp, operand: Box<Expr> },

    /// Binary operation (arithmetic, bitwise, comparison, logical)
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Method call
    ///
    /// # Examples
    /// ```text
    /// $.items.any(@.price > 100)
    /// $.name.startswith("A")
    /// ```
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },

    // Object and Array Literals
    /// Object literal, keys in authored order
    ///
    /// # Example
    /// ```text
    /// {"name": $.name, "total": $.total}
    /// ```
    Object(Vec<(String, Expr)>),

    /// Array literal
    Array(Vec<Expr>),
}

impl Expr {
    pub fn access(object: Expr, key: &str) -> Expr {
        Expr::Access {
            object: Box::new(object),
            key: Box::new(Expr::Key(key.to_string())),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// True if the expression refers to `@` anywhere.
    pub fn uses_lambda_param(&self) -> bool {
        match self {
            Expr::LambdaParam => true,
            Expr::Access { object, key } => object.uses_lambda_param() || key.uses_lambda_param(),
            Expr::BinaryOp { left, right, .. } => {
                left.uses_lambda_param() || right.uses_lambda_param()
            }
            Expr::UnaryOp { operand, .. } => operand.uses_lambda_param(),
            Expr::Object(pairs) => pairs.iter().any(|(_, value)| value.uses_lambda_param()),
            Expr::Array(elements) => elements.iter().any(Expr::uses_lambda_param),
            Expr::Filter(condition) => condition.uses_lambda_param(),
            // Arguments of a method call bind their own `@`
            Expr::MethodCall { object, .. } => object.uses_lambda_param(),
            Expr::Null
            | Expr::Boolean(_)
            | Expr::Float(_)
            | Expr::Integer(_)
            | Expr::String(_)
            | Expr::Root
            | Expr::Param(_)
            | Expr::EnumConstant { .. }
            | Expr::Key(_) => false,
        }
    }
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &Expr) -> fmt::Result {
    match key {
        Expr::Key(name) if is_plain_identifier(name) => write!(f, ".{}", name),
        Expr::Key(name) => write!(f, "[{:?}]", name),
        other => write!(f, "[{}]", other),
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Float(n) => write!(f, "{:?}", n),
            Expr::Integer(n) => write!(f, "{}", n),
            Expr::String(s) => write!(f, "{:?}", s),
            Expr::Boolean(b) => write!(f, "{}", b),
            Expr::Null => f.write_str("null"),
            Expr::Root => f.write_str("$"),
            Expr::LambdaParam => f.write_str("@"),
            Expr::Param(name) => write!(f, "${}", name),
            Expr::EnumConstant { ty, member } => write!(f, "{}.{}", ty, member),
            Expr::Key(name) => f.write_str(name),
            Expr::Access { object, key } => {
                write!(f, "{}", object)?;
                write_key(f, key)
            }
            Expr::Filter(condition) => write!(f, "?({})", condition),
            Expr::UnaryOp { op, operand } => write!(f, "{}{}", op, operand),
            Expr::BinaryOp { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                write!(f, "{}.{}(", object, method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Object(pairs) => {
                f.write_str("{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Expr::Array(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_the_bitmask_shape() {
        let expr = Expr::binary(
            BinOp::Equal,
            Expr::binary(
                BinOp::BitAnd,
                Expr::access(Expr::Root, "E"),
                Expr::Param("mask".into()),
            ),
            Expr::Integer(3),
        );
        assert_eq!(expr.to_string(), "(($.E & $mask) == 3)");
    }

    #[test]
    fn quoted_keys_are_bracketed() {
        let expr = Expr::access(Expr::Root, "first name");
        assert_eq!(expr.to_string(), "$[\"first name\"]");
    }

    #[test]
    fn method_arguments_do_not_leak_lambda_usage() {
        let expr = Expr::MethodCall {
            object: Box::new(Expr::access(Expr::Root, "items")),
            method: "any".into(),
            args: vec![Expr::access(Expr::LambdaParam, "price")],
        };
        assert!(!expr.uses_lambda_param());
        assert!(Expr::access(Expr::LambdaParam, "price").uses_lambda_param());
    }
}
