use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ast::{
    AstAccumulatorExpression, AstError, AstExpression, AstFilter, AstNode, AstNodeType, document,
    ensure, ensure_field_path,
};

/// Handle to a pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum AstStage {
    Match(Arc<AstMatchStage>),
    Project(Arc<AstProjectStage>),
    ReplaceRoot(Arc<AstReplaceRootStage>),
    AddFields(Arc<AstAddFieldsStage>),
    Group(Arc<AstGroupStage>),
    Sort(Arc<AstSortStage>),
    Skip(Arc<AstSkipStage>),
    Limit(Arc<AstLimitStage>),
    Unwind(Arc<AstUnwindStage>),
    Count(Arc<AstCountStage>),
}

impl AstStage {
    pub fn match_filter(filter: AstFilter) -> Self {
        AstStage::Match(Arc::new(AstMatchStage { filter }))
    }

    pub fn project(specifications: Vec<AstProjectStageSpecification>) -> Result<Self, AstError> {
        Ok(AstStage::Project(Arc::new(AstProjectStage::new(specifications)?)))
    }

    pub fn replace_root(expression: AstExpression) -> Self {
        AstStage::ReplaceRoot(Arc::new(AstReplaceRootStage::new(expression)))
    }

    pub fn add_fields(fields: Vec<AstComputedField>) -> Result<Self, AstError> {
        Ok(AstStage::AddFields(Arc::new(AstAddFieldsStage::new(fields)?)))
    }

    pub fn group(
        id: AstExpression,
        accumulators: Vec<(String, Arc<AstAccumulatorExpression>)>,
    ) -> Result<Self, AstError> {
        Ok(AstStage::Group(Arc::new(AstGroupStage::new(id, accumulators)?)))
    }

    pub fn sort(fields: Vec<AstSortField>) -> Result<Self, AstError> {
        ensure(!fields.is_empty(), "fields", || "$sort requires at least one field".to_string())?;
        for (i, field) in fields.iter().enumerate() {
            ensure(
                !fields[..i].iter().any(|previous| previous.path == field.path),
                "fields",
                || format!("duplicate sort path '{}'", field.path),
            )?;
        }
        Ok(AstStage::Sort(Arc::new(AstSortStage { fields })))
    }

    pub fn skip(skip: i64) -> Result<Self, AstError> {
        ensure(skip >= 0, "skip", || format!("skip must not be negative, got {}", skip))?;
        Ok(AstStage::Skip(Arc::new(AstSkipStage { skip })))
    }

    pub fn limit(limit: i64) -> Result<Self, AstError> {
        ensure(limit > 0, "limit", || format!("limit must be positive, got {}", limit))?;
        Ok(AstStage::Limit(Arc::new(AstLimitStage { limit })))
    }

    pub fn unwind(path: &str, preserve_null_and_empty_arrays: bool) -> Result<Self, AstError> {
        ensure_field_path("path", path)?;
        Ok(AstStage::Unwind(Arc::new(AstUnwindStage {
            path: path.to_string(),
            preserve_null_and_empty_arrays,
        })))
    }

    pub fn count(name: &str) -> Result<Self, AstError> {
        ensure(!name.is_empty(), "name", || "count field name must not be empty".to_string())?;
        ensure(!name.starts_with('$'), "name", || {
            format!("count field name '{}' must not start with '$'", name)
        })?;
        ensure(!name.contains('.'), "name", || {
            format!("count field name '{}' must not contain '.'", name)
        })?;
        Ok(AstStage::Count(Arc::new(AstCountStage {
            name: name.to_string(),
        })))
    }

    fn as_ptr(&self) -> *const () {
        match self {
            AstStage::Match(node) => Arc::as_ptr(node) as *const (),
            AstStage::Project(node) => Arc::as_ptr(node) as *const (),
            AstStage::ReplaceRoot(node) => Arc::as_ptr(node) as *const (),
            AstStage::AddFields(node) => Arc::as_ptr(node) as *const (),
            AstStage::Group(node) => Arc::as_ptr(node) as *const (),
            AstStage::Sort(node) => Arc::as_ptr(node) as *const (),
            AstStage::Skip(node) => Arc::as_ptr(node) as *const (),
            AstStage::Limit(node) => Arc::as_ptr(node) as *const (),
            AstStage::Unwind(node) => Arc::as_ptr(node) as *const (),
            AstStage::Count(node) => Arc::as_ptr(node) as *const (),
        }
    }

    pub fn ptr_eq(&self, other: &AstStage) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl AstNode for AstStage {
    fn node_type(&self) -> AstNodeType {
        match self {
            AstStage::Match(_) => AstNodeType::MatchStage,
            AstStage::Project(_) => AstNodeType::ProjectStage,
            AstStage::ReplaceRoot(_) => AstNodeType::ReplaceRootStage,
            AstStage::AddFields(_) => AstNodeType::AddFieldsStage,
            AstStage::Group(_) => AstNodeType::GroupStage,
            AstStage::Sort(_) => AstNodeType::SortStage,
            AstStage::Skip(_) => AstNodeType::SkipStage,
            AstStage::Limit(_) => AstNodeType::LimitStage,
            AstStage::Unwind(_) => AstNodeType::UnwindStage,
            AstStage::Count(_) => AstNodeType::CountStage,
        }
    }

    fn render(&self) -> Value {
        match self {
            AstStage::Match(node) => document("$match", node.filter.render()),
            AstStage::Project(node) => document("$project", node.render_payload()),
            AstStage::ReplaceRoot(node) => document("$replaceRoot", node.render_payload()),
            AstStage::AddFields(node) => document("$addFields", node.render_payload()),
            AstStage::Group(node) => document("$group", node.render_payload()),
            AstStage::Sort(node) => document("$sort", node.render_payload()),
            AstStage::Skip(node) => document("$skip", node.skip.into()),
            AstStage::Limit(node) => document("$limit", node.limit.into()),
            AstStage::Unwind(node) => document("$unwind", node.render_payload()),
            AstStage::Count(node) => document("$count", Value::String(node.name.clone())),
        }
    }
}

/// `{ $match: <filter> }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstMatchStage {
    filter: AstFilter,
}

impl AstMatchStage {
    pub fn new(filter: AstFilter) -> Self {
        AstMatchStage { filter }
    }

    pub fn filter(&self) -> &AstFilter {
        &self.filter
    }

    pub fn update(self: &Arc<Self>, filter: AstFilter) -> Arc<Self> {
        if filter.ptr_eq(&self.filter) {
            return Arc::clone(self);
        }
        Arc::new(AstMatchStage { filter })
    }
}

/// One entry of a `$project` document.
#[derive(Debug, Clone, PartialEq)]
pub enum AstProjectStageSpecification {
    Include(String),
    Exclude(String),
    Set { path: String, value: AstExpression },
}

impl AstProjectStageSpecification {
    pub fn path(&self) -> &str {
        match self {
            AstProjectStageSpecification::Include(path)
            | AstProjectStageSpecification::Exclude(path)
            | AstProjectStageSpecification::Set { path, .. } => path,
        }
    }

    fn same(&self, other: &AstProjectStageSpecification) -> bool {
        match (self, other) {
            (AstProjectStageSpecification::Include(a), AstProjectStageSpecification::Include(b))
            | (AstProjectStageSpecification::Exclude(a), AstProjectStageSpecification::Exclude(b)) => {
                a == b
            }
            (
                AstProjectStageSpecification::Set { path: a, value: x },
                AstProjectStageSpecification::Set { path: b, value: y },
            ) => a == b && x.ptr_eq(y),
            _ => false,
        }
    }

    fn render_value(&self) -> Value {
        match self {
            AstProjectStageSpecification::Include(_) => Value::from(1),
            AstProjectStageSpecification::Exclude(_) => Value::from(0),
            // Bare 0, 1 and booleans would read as exclusion or inclusion
            AstProjectStageSpecification::Set { value, .. } => match value.as_constant() {
                Some(constant) => document("$literal", constant.clone()),
                None => value.render(),
            },
        }
    }
}

/// `{ $project: { ... } }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstProjectStage {
    specifications: Vec<AstProjectStageSpecification>,
}

impl AstProjectStage {
    pub fn new(specifications: Vec<AstProjectStageSpecification>) -> Result<Self, AstError> {
        ensure(!specifications.is_empty(), "specifications", || {
            "$project requires at least one specification".to_string()
        })?;
        for (i, specification) in specifications.iter().enumerate() {
            let path = specification.path();
            ensure_field_path("specifications", path)?;
            ensure(
                !specifications[..i].iter().any(|previous| previous.path() == path),
                "specifications",
                || format!("path '{}' is projected twice", path),
            )?;
        }
        let excludes = specifications.iter().any(|specification| {
            matches!(specification, AstProjectStageSpecification::Exclude(path) if path != "_id")
        });
        let includes = specifications.iter().any(|specification| {
            !matches!(specification, AstProjectStageSpecification::Exclude(_))
                && specification.path() != "_id"
        });
        ensure(!(excludes && includes), "specifications", || {
            "$project cannot mix exclusion with inclusion".to_string()
        })?;
        Ok(AstProjectStage { specifications })
    }

    pub fn specifications(&self) -> &[AstProjectStageSpecification] {
        &self.specifications
    }

    pub fn update(
        self: &Arc<Self>,
        specifications: Vec<AstProjectStageSpecification>,
    ) -> Result<Arc<Self>, AstError> {
        let unchanged = specifications.len() == self.specifications.len()
            && self
                .specifications
                .iter()
                .zip(&specifications)
                .all(|(a, b)| a.same(b));
        if unchanged {
            return Ok(Arc::clone(self));
        }
        Ok(Arc::new(AstProjectStage::new(specifications)?))
    }

    fn render_payload(&self) -> Value {
        let mut map = Map::with_capacity(self.specifications.len());
        for specification in &self.specifications {
            map.insert(specification.path().to_string(), specification.render_value());
        }
        Value::Object(map)
    }
}

/// `{ $replaceRoot: { newRoot: <expression> } }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstReplaceRootStage {
    expression: AstExpression,
}

impl AstReplaceRootStage {
    pub fn new(expression: AstExpression) -> Self {
        AstReplaceRootStage { expression }
    }

    pub fn expression(&self) -> &AstExpression {
        &self.expression
    }

    pub fn update(self: &Arc<Self>, expression: AstExpression) -> Arc<Self> {
        if expression.ptr_eq(&self.expression) {
            return Arc::clone(self);
        }
        Arc::new(AstReplaceRootStage { expression })
    }

    fn render_payload(&self) -> Value {
        document("newRoot", self.expression.render())
    }
}

/// A `path: <expression>` entry of `$addFields`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstComputedField {
    path: String,
    value: AstExpression,
}

impl AstComputedField {
    pub fn new(path: &str, value: AstExpression) -> Result<Self, AstError> {
        ensure_field_path("path", path)?;
        Ok(AstComputedField {
            path: path.to_string(),
            value,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &AstExpression {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstAddFieldsStage {
    fields: Vec<AstComputedField>,
}

impl AstAddFieldsStage {
    pub fn new(fields: Vec<AstComputedField>) -> Result<Self, AstError> {
        ensure(!fields.is_empty(), "fields", || {
            "$addFields requires at least one field".to_string()
        })?;
        for (i, field) in fields.iter().enumerate() {
            ensure(
                !fields[..i].iter().any(|previous| previous.path == field.path),
                "fields",
                || format!("duplicate field path '{}'", field.path),
            )?;
        }
        Ok(AstAddFieldsStage { fields })
    }

    pub fn fields(&self) -> &[AstComputedField] {
        &self.fields
    }

    /// Rebuilds with new values; paths and order are kept.
    pub fn update(self: &Arc<Self>, values: Vec<AstExpression>) -> Result<Arc<Self>, AstError> {
        ensure(values.len() == self.fields.len(), "values", || {
            format!("expected {} values, got {}", self.fields.len(), values.len())
        })?;
        let unchanged = self
                .fields
                .iter()
                .zip(&values)
                .all(|(field, value)| field.value.ptr_eq(value));
        if unchanged {
            return Ok(Arc::clone(self));
        }
        Ok(Arc::new(AstAddFieldsStage {
            fields: self
                .fields
                .iter()
                .zip(values)
                .map(|(field, value)| AstComputedField {
                    path: field.path.clone(),
                    value,
                })
                .collect(),
        }))
    }

    fn render_payload(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            map.insert(field.path.clone(), field.value.render());
        }
        Value::Object(map)
    }
}

/// `{ $group: { _id: <expression>, name: <accumulator>, ... } }`
#[derive(Debug, Clone, PartialEq)]
pub struct AstGroupStage {
    id: AstExpression,
    accumulators: Vec<(String, Arc<AstAccumulatorExpression>)>,
}

impl AstGroupStage {
    pub fn new(
        id: AstExpression,
        accumulators: Vec<(String, Arc<AstAccumulatorExpression>)>,
    ) -> Result<Self, AstError> {
        for (i, (name, _)) in accumulators.iter().enumerate() {
            ensure(!name.is_empty(), "accumulators", || {
                "accumulator name must not be empty".to_string()
            })?;
            ensure(
                !name.starts_with('$') && !name.contains('.'),
                "accumulators",
                || format!("accumulator name '{}' must be a plain field name", name),
            )?;
            ensure(name != "_id", "accumulators", || {
                "accumulator name must not be '_id'".to_string()
            })?;
            ensure(
                !accumulators[..i].iter().any(|(previous, _)| previous == name),
                "accumulators",
                || format!("duplicate accumulator name '{}'", name),
            )?;
        }
        Ok(AstGroupStage { id, accumulators })
    }

    pub fn id(&self) -> &AstExpression {
        &self.id
    }

    pub fn accumulators(&self) -> &[(String, Arc<AstAccumulatorExpression>)] {
        &self.accumulators
    }

    pub fn update(
        self: &Arc<Self>,
        id: AstExpression,
        accumulators: Vec<Arc<AstAccumulatorExpression>>,
    ) -> Result<Arc<Self>, AstError> {
        ensure(accumulators.len() == self.accumulators.len(), "accumulators", || {
            format!(
                "expected {} accumulators, got {}",
                self.accumulators.len(),
                accumulators.len()
            )
        })?;
        let unchanged = id.ptr_eq(&self.id)
            && self
                .accumulators
                .iter()
                .zip(&accumulators)
                .all(|((_, current), replacement)| Arc::ptr_eq(current, replacement));
        if unchanged {
            return Ok(Arc::clone(self));
        }
        Ok(Arc::new(AstGroupStage {
            id,
            accumulators: self
                .accumulators
                .iter()
                .map(|(name, _)| name.clone())
                .zip(accumulators)
                .collect(),
        }))
    }

    fn render_payload(&self) -> Value {
        let mut map = Map::with_capacity(self.accumulators.len() + 1);
        map.insert("_id".to_string(), self.id.render());
        for (name, accumulator) in &self.accumulators {
            map.insert(name.clone(), accumulator.render());
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstSortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstSortField {
    path: String,
    order: AstSortOrder,
}

impl AstSortField {
    pub fn new(path: &str, order: AstSortOrder) -> Result<Self, AstError> {
        ensure_field_path("path", path)?;
        Ok(AstSortField {
            path: path.to_string(),
            order,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn order(&self) -> AstSortOrder {
        self.order
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstSortStage {
    fields: Vec<AstSortField>,
}

impl AstSortStage {
    pub fn fields(&self) -> &[AstSortField] {
        &self.fields
    }

    fn render_payload(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            let direction = match field.order {
                AstSortOrder::Ascending => 1,
                AstSortOrder::Descending => -1,
            };
            map.insert(field.path.clone(), Value::from(direction));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstSkipStage {
    skip: i64,
}

impl AstSkipStage {
    pub fn skip(&self) -> i64 {
        self.skip
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstLimitStage {
    limit: i64,
}

impl AstLimitStage {
    pub fn limit(&self) -> i64 {
        self.limit
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstUnwindStage {
    path: String,
    preserve_null_and_empty_arrays: bool,
}

impl AstUnwindStage {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn preserve_null_and_empty_arrays(&self) -> bool {
        self.preserve_null_and_empty_arrays
    }

    fn render_payload(&self) -> Value {
        let path = Value::String(format!("${}", self.path));
        if !self.preserve_null_and_empty_arrays {
            return path;
        }
        let mut map = Map::with_capacity(2);
        map.insert("path".to_string(), path);
        map.insert("preserveNullAndEmptyArrays".to_string(), Value::Bool(true));
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstCountStage {
    name: String,
}

impl AstCountStage {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ast::AstAccumulatorOperator;

    #[test]
    fn replace_root_renders_new_root() {
        let stage = AstStage::replace_root(AstExpression::field("inner").unwrap());
        assert_eq!(stage.render(), json!({ "$replaceRoot": { "newRoot": "$inner" } }));
    }

    #[test]
    fn skip_limit_and_count_are_validated() {
        assert!(AstStage::skip(0).is_ok());
        assert!(AstStage::skip(-1).is_err());
        assert!(AstStage::limit(0).is_err());
        assert!(AstStage::count("total").is_ok());
        assert!(AstStage::count("").is_err());
        assert!(AstStage::count("$total").is_err());
        assert!(AstStage::count("a.b").is_err());
    }

    #[test]
    fn project_wraps_constants_in_literal() {
        let stage = AstStage::project(vec![
            AstProjectStageSpecification::Exclude("_id".to_string()),
            AstProjectStageSpecification::Include("name".to_string()),
            AstProjectStageSpecification::Set {
                path: "flag".to_string(),
                value: AstExpression::constant(1),
            },
        ])
        .unwrap();
        assert_eq!(
            stage.render(),
            json!({ "$project": { "_id": 0, "name": 1, "flag": { "$literal": 1 } } })
        );
    }

    #[test]
    fn project_rejects_mixed_inclusion_and_exclusion() {
        let result = AstStage::project(vec![
            AstProjectStageSpecification::Exclude("secret".to_string()),
            AstProjectStageSpecification::Include("name".to_string()),
        ]);
        assert!(result.is_err());
        assert!(AstStage::project(vec![]).is_err());
    }

    #[test]
    fn group_renders_id_first() {
        let stage = AstStage::group(
            AstExpression::field("category").unwrap(),
            vec![(
                "total".to_string(),
                Arc::new(AstAccumulatorExpression::new(
                    AstAccumulatorOperator::Sum,
                    AstExpression::field("price").unwrap(),
                )),
            )],
        )
        .unwrap();
        assert_eq!(
            stage.render(),
            json!({ "$group": { "_id": "$category", "total": { "$sum": "$price" } } })
        );
    }

    #[test]
    fn unwind_renders_short_and_long_forms() {
        assert_eq!(
            AstStage::unwind("tags", false).unwrap().render(),
            json!({ "$unwind": "$tags" })
        );
        assert_eq!(
            AstStage::unwind("tags", true).unwrap().render(),
            json!({ "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true } })
        );
    }

    #[test]
    fn add_fields_update_keeps_identity_when_values_are_shared() {
        let value = AstExpression::field("a").unwrap();
        let stage = Arc::new(
            AstAddFieldsStage::new(vec![AstComputedField::new("b", value.clone()).unwrap()])
                .unwrap(),
        );
        assert!(Arc::ptr_eq(&stage, &stage.update(vec![value]).unwrap()));
        assert!(!Arc::ptr_eq(
            &stage,
            &stage.update(vec![AstExpression::constant(1)]).unwrap()
        ));
    }

    #[test]
    fn update_rejects_wrong_child_counts() {
        let stage = Arc::new(
            AstAddFieldsStage::new(vec![
                AstComputedField::new("a", AstExpression::constant(1)).unwrap(),
                AstComputedField::new("b", AstExpression::constant(2)).unwrap(),
            ])
            .unwrap(),
        );
        assert!(stage.update(vec![AstExpression::constant(1)]).is_err());

        let group = Arc::new(
            AstGroupStage::new(
                AstExpression::field("k").unwrap(),
                vec![(
                    "total".to_string(),
                    Arc::new(AstAccumulatorExpression::new(
                        AstAccumulatorOperator::Sum,
                        AstExpression::constant(1),
                    )),
                )],
            )
            .unwrap(),
        );
        assert!(group.update(group.id().clone(), Vec::new()).is_err());
        assert!(Arc::ptr_eq(
            &group,
            &group
                .update(group.id().clone(), vec![Arc::clone(&group.accumulators()[0].1)])
                .unwrap()
        ));
    }
}
