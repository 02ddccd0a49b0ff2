use std::collections::BTreeSet;

use crate::ast::visitor::{AstVisitor, walk_expression, walk_filter, walk_stage};
use crate::ast::{
    AstExpression, AstFilter, AstFilterField, AstFilterOperation, AstPipeline,
    AstProjectStageSpecification, AstStage,
};

/// Collects the document field paths a pipeline reads.
///
/// Paths inside `$elemMatch` are reported relative to the array they are
/// matched against (`items.price`). Paths read through `$$this` in array
/// expressions are element-relative and not reported.
#[derive(Debug, Default)]
pub struct FieldCollector {
    fields: BTreeSet<String>,
    prefix: Vec<String>,
}

impl FieldCollector {
    pub fn new() -> Self {
        FieldCollector::default()
    }

    /// All paths read by `pipeline`, sorted.
    pub fn collect(pipeline: &AstPipeline) -> BTreeSet<String> {
        let mut collector = FieldCollector::new();
        collector.visit_pipeline(pipeline);
        collector.fields
    }

    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    fn record(&mut self, path: &str) {
        let full = match self.prefix.last() {
            Some(prefix) => format!("{}.{}", prefix, path),
            None => path.to_string(),
        };
        self.fields.insert(full);
    }
}

impl AstVisitor for FieldCollector {
    fn visit_stage(&mut self, stage: &AstStage) {
        match stage {
            AstStage::Sort(node) => {
                for field in node.fields() {
                    self.record(field.path());
                }
            }
            AstStage::Unwind(node) => self.record(node.path()),
            AstStage::Project(node) => {
                for specification in node.specifications() {
                    if let AstProjectStageSpecification::Include(path) = specification {
                        self.record(path);
                    }
                }
            }
            _ => {}
        }
        walk_stage(self, stage);
    }

    fn visit_filter(&mut self, filter: &AstFilter) {
        let AstFilter::FieldOperation(node) = filter else {
            walk_filter(self, filter);
            return;
        };
        let AstFilterField::Path(path) = node.field() else {
            walk_filter(self, filter);
            return;
        };
        self.record(path);
        if let AstFilterOperation::ElemMatch(_) = node.operation() {
            let full = match self.prefix.last() {
                Some(prefix) => format!("{}.{}", prefix, path),
                None => path.clone(),
            };
            self.prefix.push(full);
            walk_filter(self, filter);
            self.prefix.pop();
        } else {
            walk_filter(self, filter);
        }
    }

    fn visit_expression(&mut self, expression: &AstExpression) {
        if let AstExpression::Field(node) = expression {
            if node.variable().is_none() {
                self.record(node.path());
            }
        }
        walk_expression(self, expression);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::TranslationContext;
    use crate::parser::parse_query;
    use crate::translate::translate_query;

    #[test]
    fn collects_paths_from_every_stage_kind() {
        let query = parse_query(
            "$ |> ?($.status == \"active\" and $.items.any(@.price > 5)) \
             |> ~($.total := $.price * $.qty) |> sort($.age desc) |> !({\"name\": $.name})",
        )
        .unwrap();
        let pipeline = translate_query(&query, &TranslationContext::new()).unwrap();
        let fields: Vec<String> = FieldCollector::collect(&pipeline).into_iter().collect();
        assert_eq!(
            fields,
            vec!["age", "items", "items.price", "name", "price", "qty", "status"]
        );
    }
}
