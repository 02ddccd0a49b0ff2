//! Command documents handed to the connection layer.
//!
//! Nothing here talks to a server. A pipeline becomes an `aggregate`
//! command, a lone filter can be sent as a `find`. Whatever encodes and
//! ships the document implements [`CommandSink`].

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::ast::{AstFilter, AstNode, AstPipeline, AstSortStage, AstStage};
use crate::cache::{CompiledPipeline, QueryShape};

/// Sends a rendered command to a database and returns the reply document.
pub trait CommandSink {
    type Error;

    fn send(&self, database: &str, command: &Value) -> Result<Value, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct AggregateCommand {
    pub collection: String,
    pub pipeline: Arc<AstPipeline>,
}

impl AggregateCommand {
    pub fn new(collection: impl Into<String>, pipeline: Arc<AstPipeline>) -> Self {
        Self {
            collection: collection.into(),
            pipeline,
        }
    }

    pub fn render(&self) -> Value {
        json!({
            "aggregate": self.collection,
            "pipeline": self.pipeline.render(),
            "cursor": {},
        })
    }

    pub fn send<S: CommandSink>(&self, sink: &S, database: &str) -> Result<Value, S::Error> {
        sink.send(database, &self.render())
    }
}

#[derive(Debug, Clone)]
pub struct FindCommand {
    pub collection: String,
    pub filter: Option<AstFilter>,
    pub sort: Option<Arc<AstSortStage>>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl FindCommand {
    pub fn new(collection: impl Into<String>, filter: Option<AstFilter>) -> Self {
        Self {
            collection: collection.into(),
            filter,
            sort: None,
            skip: None,
            limit: None,
        }
    }

    /// Builds a `find` from a pipeline made only of `$match`, `$sort`,
    /// `$skip` and `$limit` stages in that order. Anything else needs the
    /// aggregation path.
    pub fn from_pipeline(collection: impl Into<String>, pipeline: &AstPipeline) -> Option<Self> {
        let mut stages = pipeline.stages().iter().peekable();
        let filter = match stages.peek() {
            Some(AstStage::Match(stage)) => {
                let filter = stage.filter().clone();
                stages.next();
                Some(filter)
            }
            _ => None,
        };
        let mut command = FindCommand::new(collection, filter);
        if let Some(AstStage::Sort(stage)) = stages.peek() {
            command.sort = Some(Arc::clone(stage));
            stages.next();
        }
        if let Some(AstStage::Skip(stage)) = stages.peek() {
            command.skip = Some(stage.skip());
            stages.next();
        }
        if let Some(AstStage::Limit(stage)) = stages.peek() {
            command.limit = Some(stage.limit());
            stages.next();
        }
        match stages.next() {
            None => Some(command),
            Some(_) => None,
        }
    }

    pub fn render(&self) -> Value {
        let mut document = Map::new();
        document.insert("find".to_string(), Value::String(self.collection.clone()));
        let filter = match &self.filter {
            Some(filter) => filter.render(),
            None => Value::Object(Map::new()),
        };
        document.insert("filter".to_string(), filter);
        if let Some(sort) = &self.sort {
            if let Some(keys) = AstStage::Sort(Arc::clone(sort)).render().get("$sort") {
                document.insert("sort".to_string(), keys.clone());
            }
        }
        if let Some(skip) = self.skip {
            document.insert("skip".to_string(), json!(skip));
        }
        if let Some(limit) = self.limit {
            document.insert("limit".to_string(), json!(limit));
        }
        Value::Object(document)
    }

    pub fn send<S: CommandSink>(&self, sink: &S, database: &str) -> Result<Value, S::Error> {
        sink.send(database, &self.render())
    }
}

/// The command document for a compilation: a `find` for a standalone
/// filter, an `aggregate` otherwise.
pub fn command_for(collection: &str, compiled: &CompiledPipeline) -> Value {
    let find = match compiled.shape() {
        QueryShape::Filter => FindCommand::from_pipeline(collection, compiled.pipeline()),
        QueryShape::Pipeline => None,
    };
    match find {
        Some(command) => command.render(),
        None => AggregateCommand::new(collection, Arc::clone(compiled.pipeline())).render(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::ast::{AstComparisonOperator, AstFilterField, AstFilterOperation, AstSortField, AstSortOrder};

    struct Recorder {
        sent: RefCell<Vec<(String, Value)>>,
    }

    impl CommandSink for Recorder {
        type Error = String;

        fn send(&self, database: &str, command: &Value) -> Result<Value, String> {
            self.sent.borrow_mut().push((database.to_string(), command.clone()));
            Ok(json!({ "ok": 1 }))
        }
    }

    fn active() -> AstFilter {
        AstFilter::field_operation(
            AstFilterField::path("active").unwrap(),
            AstFilterOperation::comparison(AstComparisonOperator::Eq, json!(true)),
        )
    }

    #[test]
    fn aggregate_wraps_the_pipeline() {
        let pipeline = Arc::new(AstPipeline::new(vec![AstStage::match_filter(active())]));
        let command = AggregateCommand::new("users", pipeline);
        assert_eq!(
            command.render(),
            json!({
                "aggregate": "users",
                "pipeline": [{ "$match": { "active": true } }],
                "cursor": {}
            })
        );

        let sink = Recorder { sent: RefCell::new(Vec::new()) };
        assert_eq!(command.send(&sink, "app").unwrap(), json!({ "ok": 1 }));
        assert_eq!(sink.sent.borrow()[0].0, "app");
    }

    #[test]
    fn simple_pipelines_become_find() {
        let pipeline = AstPipeline::new(vec![
            AstStage::match_filter(active()),
            AstStage::sort(vec![AstSortField::new("age", AstSortOrder::Descending).unwrap()]).unwrap(),
            AstStage::limit(5).unwrap(),
        ]);
        let command = FindCommand::from_pipeline("users", &pipeline).unwrap();
        assert_eq!(
            command.render(),
            json!({ "find": "users", "filter": { "active": true }, "sort": { "age": -1 }, "limit": 5 })
        );

        let unfiltered = AstPipeline::new(vec![AstStage::skip(10).unwrap()]);
        assert_eq!(
            FindCommand::from_pipeline("users", &unfiltered).unwrap().render(),
            json!({ "find": "users", "filter": {}, "skip": 10 })
        );

        let reordered = AstPipeline::new(vec![AstStage::limit(5).unwrap(), AstStage::match_filter(active())]);
        assert!(FindCommand::from_pipeline("users", &reordered).is_none());
    }
}
