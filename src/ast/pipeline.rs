use std::sync::Arc;

use serde_json::Value;

use crate::ast::{AstNode, AstNodeType, AstStage};

/// An ordered sequence of stages.
///
/// Stages render in exactly the order they were pushed; nothing here
/// reorders, merges or drops them. Stage-level optimization is the job of
/// [`StageCoalescer`](crate::optimize::StageCoalescer) and only happens when
/// asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AstPipeline {
    stages: Vec<AstStage>,
}

impl AstPipeline {
    pub fn new(stages: Vec<AstStage>) -> Self {
        AstPipeline { stages }
    }

    pub fn push(&mut self, stage: AstStage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[AstStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn update(self: &Arc<Self>, stages: Vec<AstStage>) -> Arc<Self> {
        let unchanged = stages.len() == self.stages.len()
            && self.stages.iter().zip(&stages).all(|(a, b)| a.ptr_eq(b));
        if unchanged {
            return Arc::clone(self);
        }
        Arc::new(AstPipeline { stages })
    }

    /// The stage documents, one per stage.
    pub fn render_stages(&self) -> Vec<Value> {
        self.stages.iter().map(AstStage::render).collect()
    }
}

impl AstNode for AstPipeline {
    fn node_type(&self) -> AstNodeType {
        AstNodeType::Pipeline
    }

    fn render(&self) -> Value {
        Value::Array(self.render_stages())
    }
}

impl FromIterator<AstStage> for AstPipeline {
    fn from_iter<I: IntoIterator<Item = AstStage>>(iter: I) -> Self {
        AstPipeline::new(iter.into_iter().collect())
    }
}
