//! Aggregation expressions and `$group` accumulators.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ast::{AstError, AstNode, AstNodeType, document, ensure, ensure_field_path};

/// True when both slices hold the same handles, element by element.
pub(crate) fn same_expressions(current: &[AstExpression], replacements: &[AstExpression]) -> bool {
    current.len() == replacements.len()
        && current
            .iter()
            .zip(replacements)
            .all(|(current, replacement)| current.ptr_eq(replacement))
}

fn ensure_variable_name(name: &'static str, variable: &str) -> Result<(), AstError> {
    let mut chars = variable.chars();
    ensure(
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_'),
        name,
        || format!("'{}' is not a valid variable name", variable),
    )
}

/// Handle to an aggregation expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum AstExpression {
    Constant(Arc<AstConstantExpression>),
    Field(Arc<AstFieldExpression>),
    Variable(Arc<AstVariableExpression>),
    Unary(Arc<AstUnaryExpression>),
    Binary(Arc<AstBinaryExpression>),
    Nary(Arc<AstNaryExpression>),
    ComputedDocument(Arc<AstComputedDocumentExpression>),
    ComputedArray(Arc<AstComputedArrayExpression>),
    GetField(Arc<AstGetFieldExpression>),
    ArrayFilter(Arc<AstArrayFilterExpression>),
    Map(Arc<AstMapExpression>),
}

impl AstExpression {
    pub fn constant(value: impl Into<Value>) -> Self {
        AstExpression::Constant(Arc::new(AstConstantExpression::new(value.into())))
    }

    /// A path into the current document, `"$a.b"`.
    pub fn field(path: &str) -> Result<Self, AstError> {
        Ok(AstExpression::Field(Arc::new(AstFieldExpression::new(path)?)))
    }

    /// A path into a variable, `"$$this.price"`.
    pub fn variable_field(variable: &str, path: &str) -> Result<Self, AstError> {
        Ok(AstExpression::Field(Arc::new(AstFieldExpression::on_variable(
            variable, path,
        )?)))
    }

    /// `"$$ROOT"`
    pub fn root() -> Self {
        AstExpression::Variable(Arc::new(AstVariableExpression {
            name: "ROOT".to_string(),
        }))
    }

    /// `"$$this"`, the element variable bound by `$filter` and `$map`.
    pub fn this() -> Self {
        AstExpression::Variable(Arc::new(AstVariableExpression {
            name: "this".to_string(),
        }))
    }

    pub fn variable(name: &str) -> Result<Self, AstError> {
        Ok(AstExpression::Variable(Arc::new(AstVariableExpression::new(name)?)))
    }

    pub fn unary(operator: AstUnaryOperator, arg: AstExpression) -> Self {
        AstExpression::Unary(Arc::new(AstUnaryExpression { operator, arg }))
    }

    pub fn binary(operator: AstBinaryOperator, arg1: AstExpression, arg2: AstExpression) -> Self {
        AstExpression::Binary(Arc::new(AstBinaryExpression {
            operator,
            arg1,
            arg2,
        }))
    }

    pub fn nary(operator: AstNaryOperator, args: Vec<AstExpression>) -> Result<Self, AstError> {
        Ok(AstExpression::Nary(Arc::new(AstNaryExpression::new(operator, args)?)))
    }

    pub fn computed_document(fields: Vec<(String, AstExpression)>) -> Result<Self, AstError> {
        Ok(AstExpression::ComputedDocument(Arc::new(
            AstComputedDocumentExpression::new(fields)?,
        )))
    }

    pub fn computed_array(items: Vec<AstExpression>) -> Self {
        AstExpression::ComputedArray(Arc::new(AstComputedArrayExpression { items }))
    }

    pub fn get_field(field: &str, input: AstExpression) -> Result<Self, AstError> {
        Ok(AstExpression::GetField(Arc::new(AstGetFieldExpression::new(
            field, input,
        )?)))
    }

    pub fn array_filter(
        input: AstExpression,
        variable: &str,
        cond: AstExpression,
    ) -> Result<Self, AstError> {
        ensure_variable_name("variable", variable)?;
        Ok(AstExpression::ArrayFilter(Arc::new(AstArrayFilterExpression {
            input,
            variable: variable.to_string(),
            cond,
        })))
    }

    pub fn map(input: AstExpression, variable: &str, body: AstExpression) -> Result<Self, AstError> {
        ensure_variable_name("variable", variable)?;
        Ok(AstExpression::Map(Arc::new(AstMapExpression {
            input,
            variable: variable.to_string(),
            body,
        })))
    }

    /// The literal value, if this is a constant node.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            AstExpression::Constant(node) => Some(&node.value),
            _ => None,
        }
    }

    fn as_ptr(&self) -> *const () {
        match self {
            AstExpression::Constant(node) => Arc::as_ptr(node) as *const (),
            AstExpression::Field(node) => Arc::as_ptr(node) as *const (),
            AstExpression::Variable(node) => Arc::as_ptr(node) as *const (),
            AstExpression::Unary(node) => Arc::as_ptr(node) as *const (),
            AstExpression::Binary(node) => Arc::as_ptr(node) as *const (),
            AstExpression::Nary(node) => Arc::as_ptr(node) as *const (),
            AstExpression::ComputedDocument(node) => Arc::as_ptr(node) as *const (),
            AstExpression::ComputedArray(node) => Arc::as_ptr(node) as *const (),
            AstExpression::GetField(node) => Arc::as_ptr(node) as *const (),
            AstExpression::ArrayFilter(node) => Arc::as_ptr(node) as *const (),
            AstExpression::Map(node) => Arc::as_ptr(node) as *const (),
        }
    }

    /// Identity comparison: true when both handles point at the same node.
    pub fn ptr_eq(&self, other: &AstExpression) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl AstNode for AstExpression {
    fn node_type(&self) -> AstNodeType {
        match self {
            AstExpression::Constant(_) => AstNodeType::ConstantExpression,
            AstExpression::Field(_) => AstNodeType::FieldExpression,
            AstExpression::Variable(_) => AstNodeType::VariableExpression,
            AstExpression::Unary(_) => AstNodeType::UnaryExpression,
            AstExpression::Binary(_) => AstNodeType::BinaryExpression,
            AstExpression::Nary(_) => AstNodeType::NaryExpression,
            AstExpression::ComputedDocument(_) => AstNodeType::ComputedDocumentExpression,
            AstExpression::ComputedArray(_) => AstNodeType::ComputedArrayExpression,
            AstExpression::GetField(_) => AstNodeType::GetFieldExpression,
            AstExpression::ArrayFilter(_) => AstNodeType::ArrayFilterExpression,
            AstExpression::Map(_) => AstNodeType::MapExpression,
        }
    }

    fn render(&self) -> Value {
        match self {
            AstExpression::Constant(node) => node.render(),
            AstExpression::Field(node) => node.render(),
            AstExpression::Variable(node) => node.render(),
            AstExpression::Unary(node) => node.render(),
            AstExpression::Binary(node) => node.render(),
            AstExpression::Nary(node) => node.render(),
            AstExpression::ComputedDocument(node) => node.render(),
            AstExpression::ComputedArray(node) => node.render(),
            AstExpression::GetField(node) => node.render(),
            AstExpression::ArrayFilter(node) => node.render(),
            AstExpression::Map(node) => node.render(),
        }
    }
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub struct AstConstantExpression {
    value: Value,
}

impl AstConstantExpression {
    pub fn new(value: Value) -> Self {
        AstConstantExpression { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn render(&self) -> Value {
        if needs_literal(&self.value) {
            document("$literal", self.value.clone())
        } else {
            self.value.clone()
        }
    }
}

/// Values the server would otherwise parse as expressions.
fn needs_literal(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with('$'),
        Value::Array(items) => items.iter().any(needs_literal),
        Value::Object(map) => map
            .iter()
            .any(|(key, value)| key.starts_with('$') || needs_literal(value)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// A field path, either into the current document (`"$a.b"`) or into a
/// variable (`"$$this.a"`).
#[derive(Debug, Clone, PartialEq)]
pub struct AstFieldExpression {
    variable: Option<String>,
    path: String,
}

impl AstFieldExpression {
    pub fn new(path: &str) -> Result<Self, AstError> {
        ensure_field_path("path", path)?;
        Ok(AstFieldExpression {
            variable: None,
            path: path.to_string(),
        })
    }

    pub fn on_variable(variable: &str, path: &str) -> Result<Self, AstError> {
        ensure_variable_name("variable", variable)?;
        ensure_field_path("path", path)?;
        Ok(AstFieldExpression {
            variable: Some(variable.to_string()),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    fn render(&self) -> Value {
        match &self.variable {
            None => Value::String(format!("${}", self.path)),
            Some(variable) => Value::String(format!("$${}.{}", variable, self.path)),
        }
    }
}

/// A system or user variable, `"$$ROOT"`, `"$$this"`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstVariableExpression {
    name: String,
}

impl AstVariableExpression {
    pub fn new(name: &str) -> Result<Self, AstError> {
        ensure_variable_name("name", name)?;
        Ok(AstVariableExpression {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn render(&self) -> Value {
        Value::String(format!("$${}", self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstUnaryOperator {
    Abs,
    AllElementsTrue,
    AnyElementTrue,
    Avg,
    First,
    Last,
    Max,
    Min,
    Not,
    Size,
    Sum,
    ToLower,
    ToUpper,
    Trim,
    Type,
}

impl AstUnaryOperator {
    pub fn operator_name(self) -> &'static str {
        match self {
            AstUnaryOperator::Abs => "$abs",
            AstUnaryOperator::AllElementsTrue => "$allElementsTrue",
            AstUnaryOperator::AnyElementTrue => "$anyElementTrue",
            AstUnaryOperator::Avg => "$avg",
            AstUnaryOperator::First => "$first",
            AstUnaryOperator::Last => "$last",
            AstUnaryOperator::Max => "$max",
            AstUnaryOperator::Min => "$min",
            AstUnaryOperator::Not => "$not",
            AstUnaryOperator::Size => "$size",
            AstUnaryOperator::Sum => "$sum",
            AstUnaryOperator::ToLower => "$toLower",
            AstUnaryOperator::ToUpper => "$toUpper",
            AstUnaryOperator::Trim => "$trim",
            AstUnaryOperator::Type => "$type",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstUnaryExpression {
    operator: AstUnaryOperator,
    arg: AstExpression,
}

impl AstUnaryExpression {
    pub fn operator(&self) -> AstUnaryOperator {
        self.operator
    }

    pub fn arg(&self) -> &AstExpression {
        &self.arg
    }

    pub fn update(self: &Arc<Self>, arg: AstExpression) -> Arc<Self> {
        if arg.ptr_eq(&self.arg) {
            return Arc::clone(self);
        }
        Arc::new(AstUnaryExpression {
            operator: self.operator,
            arg,
        })
    }

    fn render(&self) -> Value {
        let arg = self.arg.render();
        match self.operator {
            AstUnaryOperator::Trim => document("$trim", document("input", arg)),
            // A bare array would be read as an argument list
            _ if arg.is_array() => document(self.operator.operator_name(), Value::Array(vec![arg])),
            _ => document(self.operator.operator_name(), arg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstBinaryOperator {
    ArrayElemAt,
    Divide,
    Eq,
    Gt,
    Gte,
    IfNull,
    In,
    Lt,
    Lte,
    Mod,
    Ne,
    Split,
    Subtract,
}

impl AstBinaryOperator {
    pub fn operator_name(self) -> &'static str {
        match self {
            AstBinaryOperator::ArrayElemAt => "$arrayElemAt",
            AstBinaryOperator::Divide => "$divide",
            AstBinaryOperator::Eq => "$eq",
            AstBinaryOperator::Gt => "$gt",
            AstBinaryOperator::Gte => "$gte",
            AstBinaryOperator::IfNull => "$ifNull",
            AstBinaryOperator::In => "$in",
            AstBinaryOperator::Lt => "$lt",
            AstBinaryOperator::Lte => "$lte",
            AstBinaryOperator::Mod => "$mod",
            AstBinaryOperator::Ne => "$ne",
            AstBinaryOperator::Split => "$split",
            AstBinaryOperator::Subtract => "$subtract",
        }
    }
}

/// Positional two-argument operator, `{ $op: [arg1, arg2] }`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstBinaryExpression {
    operator: AstBinaryOperator,
    arg1: AstExpression,
    arg2: AstExpression,
}

impl AstBinaryExpression {
    pub fn operator(&self) -> AstBinaryOperator {
        self.operator
    }

    pub fn arg1(&self) -> &AstExpression {
        &self.arg1
    }

    pub fn arg2(&self) -> &AstExpression {
        &self.arg2
    }

    pub fn update(self: &Arc<Self>, arg1: AstExpression, arg2: AstExpression) -> Arc<Self> {
        if arg1.ptr_eq(&self.arg1) && arg2.ptr_eq(&self.arg2) {
            return Arc::clone(self);
        }
        Arc::new(AstBinaryExpression {
            operator: self.operator,
            arg1,
            arg2,
        })
    }

    fn render(&self) -> Value {
        document(
            self.operator.operator_name(),
            Value::Array(vec![self.arg1.render(), self.arg2.render()]),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstNaryOperator {
    Add,
    And,
    BitAnd,
    BitOr,
    Concat,
    Multiply,
    Or,
}

impl AstNaryOperator {
    pub fn operator_name(self) -> &'static str {
        match self {
            AstNaryOperator::Add => "$add",
            AstNaryOperator::And => "$and",
            AstNaryOperator::BitAnd => "$bitAnd",
            AstNaryOperator::BitOr => "$bitOr",
            AstNaryOperator::Concat => "$concat",
            AstNaryOperator::Multiply => "$multiply",
            AstNaryOperator::Or => "$or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNaryExpression {
    operator: AstNaryOperator,
    args: Vec<AstExpression>,
}

impl AstNaryExpression {
    pub fn new(operator: AstNaryOperator, args: Vec<AstExpression>) -> Result<Self, AstError> {
        ensure(!args.is_empty(), "args", || {
            format!("{} requires at least one argument", operator.operator_name())
        })?;
        Ok(AstNaryExpression { operator, args })
    }

    pub fn operator(&self) -> AstNaryOperator {
        self.operator
    }

    pub fn args(&self) -> &[AstExpression] {
        &self.args
    }

    pub fn update(self: &Arc<Self>, args: Vec<AstExpression>) -> Result<Arc<Self>, AstError> {
        if same_expressions(&self.args, &args) {
            return Ok(Arc::clone(self));
        }
        Ok(Arc::new(AstNaryExpression::new(self.operator, args)?))
    }

    fn render(&self) -> Value {
        document(
            self.operator.operator_name(),
            Value::Array(self.args.iter().map(AstExpression::render).collect()),
        )
    }
}

/// A document whose values are computed, `{ name: "$name", total: {...} }`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstComputedDocumentExpression {
    fields: Vec<(String, AstExpression)>,
}

impl AstComputedDocumentExpression {
    pub fn new(fields: Vec<(String, AstExpression)>) -> Result<Self, AstError> {
        for (i, (name, _)) in fields.iter().enumerate() {
            ensure(!name.is_empty(), "fields", || "field name must not be empty".to_string())?;
            ensure(!name.starts_with('$'), "fields", || {
                format!("field name '{}' must not start with '$'", name)
            })?;
            ensure(
                !fields[..i].iter().any(|(previous, _)| previous == name),
                "fields",
                || format!("duplicate field name '{}'", name),
            )?;
        }
        Ok(AstComputedDocumentExpression { fields })
    }

    pub fn fields(&self) -> &[(String, AstExpression)] {
        &self.fields
    }

    /// Rebuilds with new values; names and order are kept.
    pub fn update(self: &Arc<Self>, values: Vec<AstExpression>) -> Arc<Self> {
        let unchanged = values.len() == self.fields.len()
            && self
                .fields
                .iter()
                .zip(&values)
                .all(|((_, current), replacement)| current.ptr_eq(replacement));
        if unchanged {
            return Arc::clone(self);
        }
        Arc::new(AstComputedDocumentExpression {
            fields: self
                .fields
                .iter()
                .map(|(name, _)| name.clone())
                .zip(values)
                .collect(),
        })
    }

    fn render(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.render());
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstComputedArrayExpression {
    items: Vec<AstExpression>,
}

impl AstComputedArrayExpression {
    pub fn items(&self) -> &[AstExpression] {
        &self.items
    }

    pub fn update(self: &Arc<Self>, items: Vec<AstExpression>) -> Arc<Self> {
        if same_expressions(&self.items, &items) {
            return Arc::clone(self);
        }
        Arc::new(AstComputedArrayExpression { items })
    }

    fn render(&self) -> Value {
        Value::Array(self.items.iter().map(AstExpression::render).collect())
    }
}

/// `{ $getField: { field: "name", input: <expr> } }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstGetFieldExpression {
    field: String,
    input: AstExpression,
}

impl AstGetFieldExpression {
    pub fn new(field: &str, input: AstExpression) -> Result<Self, AstError> {
        ensure(!field.is_empty(), "field", || "field name must not be empty".to_string())?;
        ensure(!field.starts_with('$'), "field", || {
            format!("field name '{}' must not start with '$'", field)
        })?;
        Ok(AstGetFieldExpression {
            field: field.to_string(),
            input,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn input(&self) -> &AstExpression {
        &self.input
    }

    pub fn update(self: &Arc<Self>, input: AstExpression) -> Arc<Self> {
        if input.ptr_eq(&self.input) {
            return Arc::clone(self);
        }
        Arc::new(AstGetFieldExpression {
            field: self.field.clone(),
            input,
        })
    }

    fn render(&self) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert("field".to_string(), Value::String(self.field.clone()));
        map.insert("input".to_string(), self.input.render());
        document("$getField", Value::Object(map))
    }
}

/// `{ $filter: { input, as, cond } }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstArrayFilterExpression {
    input: AstExpression,
    variable: String,
    cond: AstExpression,
}

impl AstArrayFilterExpression {
    pub fn input(&self) -> &AstExpression {
        &self.input
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn cond(&self) -> &AstExpression {
        &self.cond
    }

    pub fn update(self: &Arc<Self>, input: AstExpression, cond: AstExpression) -> Arc<Self> {
        if input.ptr_eq(&self.input) && cond.ptr_eq(&self.cond) {
            return Arc::clone(self);
        }
        Arc::new(AstArrayFilterExpression {
            input,
            variable: self.variable.clone(),
            cond,
        })
    }

    fn render(&self) -> Value {
        let mut map = Map::with_capacity(3);
        map.insert("input".to_string(), self.input.render());
        map.insert("as".to_string(), Value::String(self.variable.clone()));
        map.insert("cond".to_string(), self.cond.render());
        document("$filter", Value::Object(map))
    }
}

/// `{ $map: { input, as, in } }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstMapExpression {
    input: AstExpression,
    variable: String,
    body: AstExpression,
}

impl AstMapExpression {
    pub fn input(&self) -> &AstExpression {
        &self.input
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn body(&self) -> &AstExpression {
        &self.body
    }

    pub fn update(self: &Arc<Self>, input: AstExpression, body: AstExpression) -> Arc<Self> {
        if input.ptr_eq(&self.input) && body.ptr_eq(&self.body) {
            return Arc::clone(self);
        }
        Arc::new(AstMapExpression {
            input,
            variable: self.variable.clone(),
            body,
        })
    }

    fn render(&self) -> Value {
        let mut map = Map::with_capacity(3);
        map.insert("input".to_string(), self.input.render());
        map.insert("as".to_string(), Value::String(self.variable.clone()));
        map.insert("in".to_string(), self.body.render());
        document("$map", Value::Object(map))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstAccumulatorOperator {
    AddToSet,
    Avg,
    First,
    Last,
    Max,
    Min,
    Push,
    Sum,
}

impl AstAccumulatorOperator {
    pub fn operator_name(self) -> &'static str {
        match self {
            AstAccumulatorOperator::AddToSet => "$addToSet",
            AstAccumulatorOperator::Avg => "$avg",
            AstAccumulatorOperator::First => "$first",
            AstAccumulatorOperator::Last => "$last",
            AstAccumulatorOperator::Max => "$max",
            AstAccumulatorOperator::Min => "$min",
            AstAccumulatorOperator::Push => "$push",
            AstAccumulatorOperator::Sum => "$sum",
        }
    }
}

/// A `$group` accumulator, `{ $sum: <expr> }`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstAccumulatorExpression {
    operator: AstAccumulatorOperator,
    arg: AstExpression,
}

impl AstAccumulatorExpression {
    pub fn new(operator: AstAccumulatorOperator, arg: AstExpression) -> Self {
        AstAccumulatorExpression { operator, arg }
    }

    pub fn operator(&self) -> AstAccumulatorOperator {
        self.operator
    }

    pub fn arg(&self) -> &AstExpression {
        &self.arg
    }

    pub fn update(self: &Arc<Self>, arg: AstExpression) -> Arc<Self> {
        if arg.ptr_eq(&self.arg) {
            return Arc::clone(self);
        }
        Arc::new(AstAccumulatorExpression {
            operator: self.operator,
            arg,
        })
    }
}

impl AstNode for AstAccumulatorExpression {
    fn node_type(&self) -> AstNodeType {
        AstNodeType::AccumulatorExpression
    }

    fn render(&self) -> Value {
        document(self.operator.operator_name(), self.arg.render())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn constants_that_look_like_fields_are_wrapped() {
        assert_eq!(AstExpression::constant("$price").render(), json!({ "$literal": "$price" }));
        assert_eq!(AstExpression::constant("price").render(), json!("price"));
        assert_eq!(
            AstExpression::constant(json!({ "a": ["$x"] })).render(),
            json!({ "$literal": { "a": ["$x"] } })
        );
    }

    #[test]
    fn binary_operators_render_positionally() {
        let expr = AstExpression::binary(
            AstBinaryOperator::Subtract,
            AstExpression::field("total").unwrap(),
            AstExpression::constant(1),
        );
        assert_eq!(expr.render(), json!({ "$subtract": ["$total", 1] }));
    }

    #[test]
    fn unary_array_arguments_are_wrapped() {
        let expr = AstExpression::unary(
            AstUnaryOperator::Size,
            AstExpression::computed_array(vec![AstExpression::constant(1)]),
        );
        assert_eq!(expr.render(), json!({ "$size": [[1]] }));

        let trim = AstExpression::unary(AstUnaryOperator::Trim, AstExpression::field("name").unwrap());
        assert_eq!(trim.render(), json!({ "$trim": { "input": "$name" } }));
    }

    #[test]
    fn variable_fields_render_with_double_dollar() {
        let expr = AstExpression::variable_field("this", "price").unwrap();
        assert_eq!(expr.render(), json!("$$this.price"));
        assert_eq!(AstExpression::root().render(), json!("$$ROOT"));
    }

    #[test]
    fn computed_documents_keep_authored_order() {
        let expr = AstExpression::computed_document(vec![
            ("z".to_string(), AstExpression::constant(1)),
            ("a".to_string(), AstExpression::constant(2)),
        ])
        .unwrap();
        assert_eq!(serde_json::to_string(&expr.render()).unwrap(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn duplicate_computed_fields_are_rejected() {
        let result = AstExpression::computed_document(vec![
            ("a".to_string(), AstExpression::constant(1)),
            ("a".to_string(), AstExpression::constant(2)),
        ]);
        assert!(matches!(result, Err(AstError::InvalidArgument { name: "fields", .. })));
    }

    #[test]
    fn nary_update_is_identity_for_same_children() {
        let args = vec![AstExpression::field("a").unwrap(), AstExpression::constant(1)];
        let node = Arc::new(AstNaryExpression::new(AstNaryOperator::Add, args.clone()).unwrap());
        let same = node.update(args).unwrap();
        assert!(Arc::ptr_eq(&node, &same));

        let changed = node
            .update(vec![AstExpression::field("a").unwrap(), AstExpression::constant(1)])
            .unwrap();
        assert!(!Arc::ptr_eq(&node, &changed));
        assert_eq!(node, changed);
    }
}
