use std::fmt;

/// One tag per concrete AST node kind.
///
/// Dispatch on kind goes through exhaustive `match`es on the handle enums;
/// this tag exists for cheap inspection (logging, tests, statistics) without
/// matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AstNodeType {
    // Expressions
    ConstantExpression,
    FieldExpression,
    VariableExpression,
    UnaryExpression,
    BinaryExpression,
    NaryExpression,
    ComputedDocumentExpression,
    ComputedArrayExpression,
    GetFieldExpression,
    ArrayFilterExpression,
    MapExpression,
    AccumulatorExpression,

    // Filters
    FieldOperationFilter,
    AndFilter,
    OrFilter,
    NorFilter,
    NotFilter,
    ExprFilter,

    // Filter operations
    ComparisonFilterOperation,
    BitsAllClearFilterOperation,
    BitsAllSetFilterOperation,
    BitsAnyClearFilterOperation,
    BitsAnySetFilterOperation,
    InFilterOperation,
    NinFilterOperation,
    ExistsFilterOperation,
    RegexFilterOperation,
    SizeFilterOperation,
    TypeFilterOperation,
    ModFilterOperation,
    ElemMatchFilterOperation,
    NotFilterOperation,

    // Stages
    MatchStage,
    ProjectStage,
    ReplaceRootStage,
    AddFieldsStage,
    GroupStage,
    SortStage,
    SkipStage,
    LimitStage,
    UnwindStage,
    CountStage,

    Pipeline,
}

impl AstNodeType {
    pub fn is_stage(self) -> bool {
        matches!(
            self,
            AstNodeType::MatchStage
                | AstNodeType::ProjectStage
                | AstNodeType::ReplaceRootStage
                | AstNodeType::AddFieldsStage
                | AstNodeType::GroupStage
                | AstNodeType::SortStage
                | AstNodeType::SkipStage
                | AstNodeType::LimitStage
                | AstNodeType::UnwindStage
                | AstNodeType::CountStage
        )
    }

    pub fn is_filter(self) -> bool {
        matches!(
            self,
            AstNodeType::FieldOperationFilter
                | AstNodeType::AndFilter
                | AstNodeType::OrFilter
                | AstNodeType::NorFilter
                | AstNodeType::NotFilter
                | AstNodeType::ExprFilter
        )
    }

    /// The four bit-test operations.
    pub fn is_bits_operation(self) -> bool {
        matches!(
            self,
            AstNodeType::BitsAllClearFilterOperation
                | AstNodeType::BitsAllSetFilterOperation
                | AstNodeType::BitsAnyClearFilterOperation
                | AstNodeType::BitsAnySetFilterOperation
        )
    }
}

impl fmt::Display for AstNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
