//! The match language: filters and the per-field operations they apply.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ast::{AstError, AstExpression, AstNode, AstNodeType, document, ensure, ensure_field_path};

/// Type aliases accepted by `$type`.
pub const TYPE_ALIASES: &[&str] = &[
    "double",
    "string",
    "object",
    "array",
    "binData",
    "undefined",
    "objectId",
    "bool",
    "date",
    "null",
    "regex",
    "dbPointer",
    "javascript",
    "symbol",
    "int",
    "timestamp",
    "long",
    "decimal",
    "minKey",
    "maxKey",
    "number",
];

const REGEX_OPTIONS: &str = "imsxu";

/// What a field operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AstFilterField {
    /// A dotted path in the matched document.
    Path(String),
    /// The array element being tested inside `$elemMatch`.
    Element,
}

impl AstFilterField {
    pub fn path(path: &str) -> Result<Self, AstError> {
        ensure_field_path("path", path)?;
        Ok(AstFilterField::Path(path.to_string()))
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            AstFilterField::Path(path) => Some(path),
            AstFilterField::Element => None,
        }
    }
}

/// Handle to a match-language filter.
#[derive(Debug, Clone, PartialEq)]
pub enum AstFilter {
    FieldOperation(Arc<AstFieldOperationFilter>),
    And(Arc<AstCompoundFilter>),
    Or(Arc<AstCompoundFilter>),
    Nor(Arc<AstCompoundFilter>),
    Not(Arc<AstNotFilter>),
    Expr(Arc<AstExprFilter>),
}

impl AstFilter {
    pub fn field_operation(field: AstFilterField, operation: AstFilterOperation) -> Self {
        AstFilter::FieldOperation(Arc::new(AstFieldOperationFilter { field, operation }))
    }

    pub fn and(args: Vec<AstFilter>) -> Result<Self, AstError> {
        Ok(AstFilter::And(Arc::new(AstCompoundFilter::new("$and", args)?)))
    }

    pub fn or(args: Vec<AstFilter>) -> Result<Self, AstError> {
        Ok(AstFilter::Or(Arc::new(AstCompoundFilter::new("$or", args)?)))
    }

    pub fn nor(args: Vec<AstFilter>) -> Result<Self, AstError> {
        Ok(AstFilter::Nor(Arc::new(AstCompoundFilter::new("$nor", args)?)))
    }

    pub fn not(filter: AstFilter) -> Self {
        AstFilter::Not(Arc::new(AstNotFilter { filter }))
    }

    pub fn expr(expression: AstExpression) -> Self {
        AstFilter::Expr(Arc::new(AstExprFilter { expression }))
    }

    fn as_ptr(&self) -> *const () {
        match self {
            AstFilter::FieldOperation(node) => Arc::as_ptr(node) as *const (),
            AstFilter::And(node) | AstFilter::Or(node) | AstFilter::Nor(node) => {
                Arc::as_ptr(node) as *const ()
            }
            AstFilter::Not(node) => Arc::as_ptr(node) as *const (),
            AstFilter::Expr(node) => Arc::as_ptr(node) as *const (),
        }
    }

    pub fn ptr_eq(&self, other: &AstFilter) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl AstNode for AstFilter {
    fn node_type(&self) -> AstNodeType {
        match self {
            AstFilter::FieldOperation(_) => AstNodeType::FieldOperationFilter,
            AstFilter::And(_) => AstNodeType::AndFilter,
            AstFilter::Or(_) => AstNodeType::OrFilter,
            AstFilter::Nor(_) => AstNodeType::NorFilter,
            AstFilter::Not(_) => AstNodeType::NotFilter,
            AstFilter::Expr(_) => AstNodeType::ExprFilter,
        }
    }

    fn render(&self) -> Value {
        match self {
            AstFilter::FieldOperation(node) => node.render(),
            AstFilter::And(node) => node.render_and(),
            AstFilter::Or(node) | AstFilter::Nor(node) => node.render_positional(),
            AstFilter::Not(node) => node.render(),
            AstFilter::Expr(node) => document("$expr", node.expression.render()),
        }
    }
}

/// `{ field: <operation> }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstFieldOperationFilter {
    field: AstFilterField,
    operation: AstFilterOperation,
}

impl AstFieldOperationFilter {
    pub fn field(&self) -> &AstFilterField {
        &self.field
    }

    pub fn operation(&self) -> &AstFilterOperation {
        &self.operation
    }

    pub fn update(self: &Arc<Self>, operation: AstFilterOperation) -> Arc<Self> {
        if operation.ptr_eq(&self.operation) {
            return Arc::clone(self);
        }
        Arc::new(AstFieldOperationFilter {
            field: self.field.clone(),
            operation,
        })
    }

    fn render(&self) -> Value {
        match &self.field {
            AstFilterField::Path(path) => document(path.clone(), self.operation.render_on_path()),
            AstFilterField::Element => self.operation.render(),
        }
    }
}

/// Argument list shared by `$and`, `$or` and `$nor`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstCompoundFilter {
    operator: &'static str,
    args: Vec<AstFilter>,
}

impl AstCompoundFilter {
    fn new(operator: &'static str, args: Vec<AstFilter>) -> Result<Self, AstError> {
        ensure(!args.is_empty(), "args", || {
            format!("{} requires at least one filter", operator)
        })?;
        Ok(AstCompoundFilter { operator, args })
    }

    pub fn args(&self) -> &[AstFilter] {
        &self.args
    }

    pub fn update(self: &Arc<Self>, args: Vec<AstFilter>) -> Result<Arc<Self>, AstError> {
        let unchanged = args.len() == self.args.len()
            && self.args.iter().zip(&args).all(|(a, b)| a.ptr_eq(b));
        if unchanged {
            return Ok(Arc::clone(self));
        }
        Ok(Arc::new(AstCompoundFilter::new(self.operator, args)?))
    }

    fn render_positional(&self) -> Value {
        document(
            self.operator,
            Value::Array(self.args.iter().map(AstFilter::render).collect()),
        )
    }

    /// Field operations on distinct keys share one document; anything else,
    /// including element operators mixed with field paths, falls back to the
    /// positional `$and` form.
    fn render_and(&self) -> Value {
        let elements = self
            .args
            .iter()
            .filter(|arg| {
                matches!(arg, AstFilter::FieldOperation(node) if node.field == AstFilterField::Element)
            })
            .count();
        if elements > 0 && elements < self.args.len() {
            return self.render_positional();
        }
        let mut merged = Map::with_capacity(self.args.len());
        for arg in &self.args {
            let AstFilter::FieldOperation(node) = arg else {
                return self.render_positional();
            };
            let Value::Object(rendered) = node.render() else {
                return self.render_positional();
            };
            for (key, value) in rendered {
                if merged.contains_key(&key) {
                    return self.render_positional();
                }
                merged.insert(key, value);
            }
        }
        Value::Object(merged)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNotFilter {
    filter: AstFilter,
}

impl AstNotFilter {
    pub fn filter(&self) -> &AstFilter {
        &self.filter
    }

    pub fn update(self: &Arc<Self>, filter: AstFilter) -> Arc<Self> {
        if filter.ptr_eq(&self.filter) {
            return Arc::clone(self);
        }
        Arc::new(AstNotFilter { filter })
    }

    fn render(&self) -> Value {
        match &self.filter {
            AstFilter::FieldOperation(node) => {
                let negated = document("$not", node.operation.render());
                match &node.field {
                    AstFilterField::Path(path) => document(path.clone(), negated),
                    AstFilterField::Element => negated,
                }
            }
            other => document("$nor", Value::Array(vec![other.render()])),
        }
    }
}

/// `{ $expr: <aggregation expression> }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstExprFilter {
    expression: AstExpression,
}

impl AstExprFilter {
    pub fn expression(&self) -> &AstExpression {
        &self.expression
    }

    pub fn update(self: &Arc<Self>, expression: AstExpression) -> Arc<Self> {
        if expression.ptr_eq(&self.expression) {
            return Arc::clone(self);
        }
        Arc::new(AstExprFilter { expression })
    }
}

/// Handle to an operation applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum AstFilterOperation {
    Comparison(Arc<AstComparisonFilterOperation>),
    BitsAllClear(Arc<AstBitsFilterOperation>),
    BitsAllSet(Arc<AstBitsFilterOperation>),
    BitsAnyClear(Arc<AstBitsFilterOperation>),
    BitsAnySet(Arc<AstBitsFilterOperation>),
    In(Arc<AstInFilterOperation>),
    Nin(Arc<AstInFilterOperation>),
    Exists(Arc<AstExistsFilterOperation>),
    Regex(Arc<AstRegexFilterOperation>),
    Size(Arc<AstSizeFilterOperation>),
    Type(Arc<AstTypeFilterOperation>),
    Mod(Arc<AstModFilterOperation>),
    ElemMatch(Arc<AstElemMatchFilterOperation>),
    Not(Arc<AstNotFilterOperation>),
}

impl AstFilterOperation {
    pub fn comparison(operator: AstComparisonOperator, value: Value) -> Self {
        AstFilterOperation::Comparison(Arc::new(AstComparisonFilterOperation { operator, value }))
    }

    pub fn bits_all_clear(mask: i64) -> Result<Self, AstError> {
        Ok(AstFilterOperation::BitsAllClear(Arc::new(AstBitsFilterOperation::new(mask)?)))
    }

    pub fn bits_all_set(mask: i64) -> Result<Self, AstError> {
        Ok(AstFilterOperation::BitsAllSet(Arc::new(AstBitsFilterOperation::new(mask)?)))
    }

    pub fn bits_any_clear(mask: i64) -> Result<Self, AstError> {
        Ok(AstFilterOperation::BitsAnyClear(Arc::new(AstBitsFilterOperation::new(mask)?)))
    }

    pub fn bits_any_set(mask: i64) -> Result<Self, AstError> {
        Ok(AstFilterOperation::BitsAnySet(Arc::new(AstBitsFilterOperation::new(mask)?)))
    }

    pub fn in_values(values: Vec<Value>) -> Self {
        AstFilterOperation::In(Arc::new(AstInFilterOperation { values }))
    }

    pub fn nin_values(values: Vec<Value>) -> Self {
        AstFilterOperation::Nin(Arc::new(AstInFilterOperation { values }))
    }

    pub fn exists(exists: bool) -> Self {
        AstFilterOperation::Exists(Arc::new(AstExistsFilterOperation { exists }))
    }

    pub fn regex(pattern: &str, options: &str) -> Result<Self, AstError> {
        Ok(AstFilterOperation::Regex(Arc::new(AstRegexFilterOperation::new(
            pattern, options,
        )?)))
    }

    pub fn size(size: i64) -> Result<Self, AstError> {
        ensure(size >= 0, "size", || format!("size must not be negative, got {}", size))?;
        Ok(AstFilterOperation::Size(Arc::new(AstSizeFilterOperation { size })))
    }

    pub fn of_type(alias: &str) -> Result<Self, AstError> {
        ensure(TYPE_ALIASES.contains(&alias), "alias", || {
            format!("'{}' is not a known type alias", alias)
        })?;
        Ok(AstFilterOperation::Type(Arc::new(AstTypeFilterOperation {
            alias: alias.to_string(),
        })))
    }

    pub fn modulo(divisor: i64, remainder: i64) -> Result<Self, AstError> {
        ensure(divisor > 0, "divisor", || {
            format!("divisor must be positive, got {}", divisor)
        })?;
        Ok(AstFilterOperation::Mod(Arc::new(AstModFilterOperation {
            divisor,
            remainder,
        })))
    }

    pub fn elem_match(filter: AstFilter) -> Self {
        AstFilterOperation::ElemMatch(Arc::new(AstElemMatchFilterOperation { filter }))
    }

    pub fn not(operation: AstFilterOperation) -> Self {
        AstFilterOperation::Not(Arc::new(AstNotFilterOperation { operation }))
    }

    fn as_ptr(&self) -> *const () {
        match self {
            AstFilterOperation::Comparison(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::BitsAllClear(node)
            | AstFilterOperation::BitsAllSet(node)
            | AstFilterOperation::BitsAnyClear(node)
            | AstFilterOperation::BitsAnySet(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::In(node) | AstFilterOperation::Nin(node) => {
                Arc::as_ptr(node) as *const ()
            }
            AstFilterOperation::Exists(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::Regex(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::Size(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::Type(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::Mod(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::ElemMatch(node) => Arc::as_ptr(node) as *const (),
            AstFilterOperation::Not(node) => Arc::as_ptr(node) as *const (),
        }
    }

    pub fn ptr_eq(&self, other: &AstFilterOperation) -> bool {
        self.as_ptr() == other.as_ptr()
    }

    /// `$eq` against a plain value collapses to the value itself.
    fn render_on_path(&self) -> Value {
        if let AstFilterOperation::Comparison(node) = self {
            if node.operator == AstComparisonOperator::Eq && !is_operator_document(&node.value) {
                return node.value.clone();
            }
        }
        self.render()
    }
}

fn is_operator_document(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.keys().any(|key| key.starts_with('$')))
}

impl AstNode for AstFilterOperation {
    fn node_type(&self) -> AstNodeType {
        match self {
            AstFilterOperation::Comparison(_) => AstNodeType::ComparisonFilterOperation,
            AstFilterOperation::BitsAllClear(_) => AstNodeType::BitsAllClearFilterOperation,
            AstFilterOperation::BitsAllSet(_) => AstNodeType::BitsAllSetFilterOperation,
            AstFilterOperation::BitsAnyClear(_) => AstNodeType::BitsAnyClearFilterOperation,
            AstFilterOperation::BitsAnySet(_) => AstNodeType::BitsAnySetFilterOperation,
            AstFilterOperation::In(_) => AstNodeType::InFilterOperation,
            AstFilterOperation::Nin(_) => AstNodeType::NinFilterOperation,
            AstFilterOperation::Exists(_) => AstNodeType::ExistsFilterOperation,
            AstFilterOperation::Regex(_) => AstNodeType::RegexFilterOperation,
            AstFilterOperation::Size(_) => AstNodeType::SizeFilterOperation,
            AstFilterOperation::Type(_) => AstNodeType::TypeFilterOperation,
            AstFilterOperation::Mod(_) => AstNodeType::ModFilterOperation,
            AstFilterOperation::ElemMatch(_) => AstNodeType::ElemMatchFilterOperation,
            AstFilterOperation::Not(_) => AstNodeType::NotFilterOperation,
        }
    }

    fn render(&self) -> Value {
        match self {
            AstFilterOperation::Comparison(node) => {
                document(node.operator.operator_name(), node.value.clone())
            }
            AstFilterOperation::BitsAllClear(node) => document("$bitsAllClear", node.mask.into()),
            AstFilterOperation::BitsAllSet(node) => document("$bitsAllSet", node.mask.into()),
            AstFilterOperation::BitsAnyClear(node) => document("$bitsAnyClear", node.mask.into()),
            AstFilterOperation::BitsAnySet(node) => document("$bitsAnySet", node.mask.into()),
            AstFilterOperation::In(node) => document("$in", Value::Array(node.values.clone())),
            AstFilterOperation::Nin(node) => document("$nin", Value::Array(node.values.clone())),
            AstFilterOperation::Exists(node) => document("$exists", Value::Bool(node.exists)),
            AstFilterOperation::Regex(node) => {
                let mut map = Map::with_capacity(2);
                map.insert("$regex".to_string(), Value::String(node.pattern.clone()));
                if !node.options.is_empty() {
                    map.insert("$options".to_string(), Value::String(node.options.clone()));
                }
                Value::Object(map)
            }
            AstFilterOperation::Size(node) => document("$size", node.size.into()),
            AstFilterOperation::Type(node) => document("$type", Value::String(node.alias.clone())),
            AstFilterOperation::Mod(node) => document(
                "$mod",
                Value::Array(vec![node.divisor.into(), node.remainder.into()]),
            ),
            AstFilterOperation::ElemMatch(node) => document("$elemMatch", node.filter.render()),
            AstFilterOperation::Not(node) => document("$not", node.operation.render()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl AstComparisonOperator {
    pub fn operator_name(self) -> &'static str {
        match self {
            AstComparisonOperator::Eq => "$eq",
            AstComparisonOperator::Ne => "$ne",
            AstComparisonOperator::Gt => "$gt",
            AstComparisonOperator::Gte => "$gte",
            AstComparisonOperator::Lt => "$lt",
            AstComparisonOperator::Lte => "$lte",
        }
    }

    /// The operator matching exactly the documents this one rejects, when
    /// one exists. Range operators have none: a missing field fails both
    /// `$lt` and `$gte`.
    pub fn negated(self) -> Option<AstComparisonOperator> {
        match self {
            AstComparisonOperator::Eq => Some(AstComparisonOperator::Ne),
            AstComparisonOperator::Ne => Some(AstComparisonOperator::Eq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstComparisonFilterOperation {
    operator: AstComparisonOperator,
    value: Value,
}

impl AstComparisonFilterOperation {
    pub fn operator(&self) -> AstComparisonOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Mask shared by the four bit-test operations.
#[derive(Debug, Clone, PartialEq)]
pub struct AstBitsFilterOperation {
    mask: i64,
}

impl AstBitsFilterOperation {
    fn new(mask: i64) -> Result<Self, AstError> {
        ensure(mask >= 0, "mask", || format!("bit mask must not be negative, got {}", mask))?;
        ensure(mask <= i64::from(i32::MAX), "mask", || {
            format!("bit mask must fit in 32 bits, got {}", mask)
        })?;
        Ok(AstBitsFilterOperation { mask })
    }

    pub fn mask(&self) -> i64 {
        self.mask
    }
}

/// Value list shared by `$in` and `$nin`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstInFilterOperation {
    values: Vec<Value>,
}

impl AstInFilterOperation {
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstExistsFilterOperation {
    exists: bool,
}

impl AstExistsFilterOperation {
    pub fn exists(&self) -> bool {
        self.exists
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstRegexFilterOperation {
    pattern: String,
    options: String,
}

impl AstRegexFilterOperation {
    fn new(pattern: &str, options: &str) -> Result<Self, AstError> {
        for (i, option) in options.char_indices() {
            ensure(REGEX_OPTIONS.contains(option), "options", || {
                format!("unknown regex option '{}'", option)
            })?;
            ensure(!options[..i].contains(option), "options", || {
                format!("duplicate regex option '{}'", option)
            })?;
        }
        Ok(AstRegexFilterOperation {
            pattern: pattern.to_string(),
            options: options.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> &str {
        &self.options
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstSizeFilterOperation {
    size: i64,
}

impl AstSizeFilterOperation {
    pub fn size(&self) -> i64 {
        self.size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstTypeFilterOperation {
    alias: String,
}

impl AstTypeFilterOperation {
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstModFilterOperation {
    divisor: i64,
    remainder: i64,
}

impl AstModFilterOperation {
    pub fn divisor(&self) -> i64 {
        self.divisor
    }

    pub fn remainder(&self) -> i64 {
        self.remainder
    }
}

/// `{ $elemMatch: <filter> }`; element tests inside use
/// [`AstFilterField::Element`].
#[derive(Debug, Clone, PartialEq)]
pub struct AstElemMatchFilterOperation {
    filter: AstFilter,
}

impl AstElemMatchFilterOperation {
    pub fn filter(&self) -> &AstFilter {
        &self.filter
    }

    pub fn update(self: &Arc<Self>, filter: AstFilter) -> Arc<Self> {
        if filter.ptr_eq(&self.filter) {
            return Arc::clone(self);
        }
        Arc::new(AstElemMatchFilterOperation { filter })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNotFilterOperation {
    operation: AstFilterOperation,
}

impl AstNotFilterOperation {
    pub fn operation(&self) -> &AstFilterOperation {
        &self.operation
    }

    pub fn update(self: &Arc<Self>, operation: AstFilterOperation) -> Arc<Self> {
        if operation.ptr_eq(&self.operation) {
            return Arc::clone(self);
        }
        Arc::new(AstNotFilterOperation { operation })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn on(path: &str, operation: AstFilterOperation) -> AstFilter {
        AstFilter::field_operation(AstFilterField::path(path).unwrap(), operation)
    }

    #[test]
    fn bits_all_clear_renders_under_the_field() {
        let filter = on("E", AstFilterOperation::bits_all_clear(6).unwrap());
        assert_eq!(filter.render(), json!({ "E": { "$bitsAllClear": 6 } }));
        assert_eq!(filter.node_type(), AstNodeType::FieldOperationFilter);
    }

    #[test]
    fn each_bits_operation_has_its_own_node_type() {
        let kinds = [
            AstFilterOperation::bits_all_clear(1).unwrap().node_type(),
            AstFilterOperation::bits_all_set(1).unwrap().node_type(),
            AstFilterOperation::bits_any_clear(1).unwrap().node_type(),
            AstFilterOperation::bits_any_set(1).unwrap().node_type(),
        ];
        assert!(kinds.iter().all(|kind| kind.is_bits_operation()));
        for (i, kind) in kinds.iter().enumerate() {
            assert!(!kinds[..i].contains(kind));
        }
    }

    #[test]
    fn equality_renders_bare_unless_value_looks_like_an_operator() {
        let plain = on("a", AstFilterOperation::comparison(AstComparisonOperator::Eq, json!(5)));
        assert_eq!(plain.render(), json!({ "a": 5 }));

        let operator_like = on(
            "a",
            AstFilterOperation::comparison(AstComparisonOperator::Eq, json!({ "$gt": 1 })),
        );
        assert_eq!(operator_like.render(), json!({ "a": { "$eq": { "$gt": 1 } } }));
    }

    #[test]
    fn and_merges_distinct_fields() {
        let filter = AstFilter::and(vec![
            on("a", AstFilterOperation::comparison(AstComparisonOperator::Gt, json!(1))),
            on("b", AstFilterOperation::exists(true)),
        ])
        .unwrap();
        assert_eq!(filter.render(), json!({ "a": { "$gt": 1 }, "b": { "$exists": true } }));

        let same_field = AstFilter::and(vec![
            on("a", AstFilterOperation::comparison(AstComparisonOperator::Gt, json!(1))),
            on("a", AstFilterOperation::comparison(AstComparisonOperator::Lt, json!(5))),
        ])
        .unwrap();
        assert_eq!(
            same_field.render(),
            json!({ "$and": [{ "a": { "$gt": 1 } }, { "a": { "$lt": 5 } }] })
        );
    }

    #[test]
    fn not_over_field_operation_uses_field_level_not() {
        let filter = AstFilter::not(on("a", AstFilterOperation::regex("^x", "i").unwrap()));
        assert_eq!(
            filter.render(),
            json!({ "a": { "$not": { "$regex": "^x", "$options": "i" } } })
        );

        let compound = AstFilter::not(
            AstFilter::or(vec![on("a", AstFilterOperation::exists(true))]).unwrap(),
        );
        assert_eq!(
            compound.render(),
            json!({ "$nor": [{ "$or": [{ "a": { "$exists": true } }] }] })
        );
    }

    #[test]
    fn mod_renders_positionally() {
        let filter = on("n", AstFilterOperation::modulo(3, 1).unwrap());
        assert_eq!(filter.render(), json!({ "n": { "$mod": [3, 1] } }));
    }

    #[test]
    fn invalid_operations_are_rejected() {
        assert!(AstFilter::and(vec![]).is_err());
        assert!(AstFilterOperation::modulo(0, 1).is_err());
        assert!(AstFilterOperation::regex("a", "q").is_err());
        assert!(AstFilterOperation::regex("a", "ii").is_err());
        assert!(AstFilterOperation::of_type("text").is_err());
        assert!(AstFilterOperation::size(-1).is_err());
        assert!(AstFilterField::path("").is_err());
    }

    #[test]
    fn elem_match_on_elements_renders_bare_operations() {
        let inner = AstFilter::and(vec![
            AstFilter::field_operation(
                AstFilterField::Element,
                AstFilterOperation::comparison(AstComparisonOperator::Gte, json!(1)),
            ),
            AstFilter::field_operation(
                AstFilterField::Element,
                AstFilterOperation::comparison(AstComparisonOperator::Lt, json!(5)),
            ),
        ])
        .unwrap();
        let filter = on("scores", AstFilterOperation::elem_match(inner));
        assert_eq!(
            filter.render(),
            json!({ "scores": { "$elemMatch": { "$gte": 1, "$lt": 5 } } })
        );
    }
}
