//! Helpers over the nested-document value model.
//!
//! Documents are [`serde_json::Value`]s. Integers and floats stay distinct
//! (`Number::is_i64` vs `is_f64`), and mixed arithmetic goes through
//! [`Decimal`] so that `0.1 + 0.2` is `0.3` and `2.5 * 2` is the integer
//! `5`.
//!
//! Ordering follows the server's cross-type order: null, numbers, strings,
//! objects, arrays, booleans.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::{Number, Value};

/// The `$type` alias of a value.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stagecraft::value::type_name;
///
/// assert_eq!(type_name(&json!(1)), "int");
/// assert_eq!(type_name(&json!(5_000_000_000i64)), "long");
/// assert_eq!(type_name(&json!(1.5)), "double");
/// assert_eq!(type_name(&json!([1])), "array");
/// ```
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => "int",
            Some(_) => "long",
            None if n.is_u64() => "long",
            None => "double",
        },
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether `value` has the type named by a `$type` alias. `"number"`
/// matches every numeric type.
pub fn has_type(value: &Value, alias: &str) -> bool {
    match alias {
        "number" => value.is_number(),
        alias => type_name(value) == alias,
    }
}

fn type_order(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 8,
    }
}

/// True when both values fall in the same comparison bracket, which is
/// what match-language range operators require.
pub fn same_bracket(a: &Value, b: &Value) -> bool {
    type_order(a) == type_order(b)
}

pub fn to_decimal(n: &Number) -> Option<Decimal> {
    match n.as_i64() {
        Some(i) => Some(Decimal::from(i)),
        None => n.as_f64().and_then(Decimal::from_f64),
    }
}

/// Integral results come back as integers.
pub fn from_decimal(d: Decimal) -> Value {
    if d.is_integer()
        && let Some(i) = d.to_i64()
    {
        return Value::from(i);
    }
    d.to_f64().map(Value::from).unwrap_or(Value::Null)
}

/// The value as an integer if it is numeric with no fractional part.
pub fn as_integer(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n,
        _ => return None,
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (to_decimal(a), to_decimal(b)) {
        return x.cmp(&y);
    }
    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Total order over values, across types.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (left, right) = (type_order(a), type_order(b));
    if left != right {
        return left.cmp(&right);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_values(x, y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| compare_values(vx, vy)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    }
}

/// Equality with numeric normalization: `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b).is_eq()
}

/// Aggregation truthiness: `false`, `null` and zero are false, everything
/// else (including empty strings and arrays) is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(_) | Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cross_type_order() {
        let mut values = vec![json!(true), json!([1]), json!({"a": 1}), json!("x"), json!(2), json!(null)];
        values.sort_by(compare_values);
        assert_eq!(
            values,
            vec![json!(null), json!(2), json!("x"), json!({"a": 1}), json!([1]), json!(true)]
        );
    }

    #[test]
    fn mixed_numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert_eq!(compare_values(&json!(2), &json!(2.5)), Ordering::Less);
        assert_eq!(compare_values(&json!(0.3), &json!(0.1)), Ordering::Greater);
    }

    #[test]
    fn decimals_keep_integers() {
        let sum = to_decimal(&Number::from_f64(2.5).unwrap()).unwrap() * Decimal::from(2);
        assert_eq!(from_decimal(sum), json!(5));
        assert_eq!(as_integer(&json!(4.0)), Some(4));
        assert_eq!(as_integer(&json!(4.5)), None);
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(null)));
        assert!(is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
    }
}
