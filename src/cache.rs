//! # Compilation and caching
//!
//! [`Compiler`] is the entry point that takes query text all the way to a
//! pipeline: parse, translate, run the enabled optimization passes. Results
//! are memoized in a [`TranslationCache`] keyed by an xxh64 fingerprint of
//! the query text, the translation context and the options, so a hot query
//! is compiled once no matter how many threads ask for it.
//!
//! ```
//! use stagecraft::cache::{CompileOptions, Compiler};
//! use stagecraft::constant::{ConstantTable, TranslationContext};
//!
//! let constants = ConstantTable::new().with_enum("E", &[("E2", 2), ("E4", 4)]);
//! let compiler = Compiler::new(
//!     TranslationContext::new().with_constants(constants),
//!     CompileOptions::default(),
//! );
//!
//! let first = compiler.compile("($.E & (E.E2 | E.E4)) == 0").unwrap();
//! let again = compiler.compile("($.E & (E.E2 | E.E4)) == 0").unwrap();
//! assert!(std::sync::Arc::ptr_eq(&first, &again));
//! ```

use std::hash::Hasher;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use xxhash_rust::xxh64::Xxh64;

use crate::ast::{AstError, AstFilter, AstNode, AstPipeline, AstStage};
use crate::constant::TranslationContext;
use crate::optimize;
use crate::parser::{ParseError, is_pipeline_query, parse_expression, parse_query};
use crate::translate::{TranslationError, translate_filter, translate_query};

/// Which optimization passes run after translation, and whether results are
/// memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Flatten, cancel double negations and fold integer constants.
    pub simplify: bool,
    /// Merge adjacent `$match`, `$skip` and `$limit` stages.
    pub coalesce_stages: bool,
    /// Memoize compiled pipelines by fingerprint.
    pub cache: bool,
    /// Most pipelines kept in the cache before older entries are evicted.
    pub cache_capacity: usize,
}

/// Default bound on memoized pipelines per [`Compiler`].
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            simplify: true,
            coalesce_stages: false,
            cache: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Ast(#[from] AstError),
}

/// What kind of source a pipeline was compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// A `$ |> ...` query; every statement is one stage.
    Pipeline,
    /// A standalone filter expression, held as a single `$match` stage.
    Filter,
}

#[derive(Debug)]
pub struct CompiledPipeline {
    source: String,
    shape: QueryShape,
    pipeline: Arc<AstPipeline>,
}

impl CompiledPipeline {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn shape(&self) -> QueryShape {
        self.shape
    }

    pub fn pipeline(&self) -> &Arc<AstPipeline> {
        &self.pipeline
    }

    /// The filter of a [`QueryShape::Filter`] compilation.
    pub fn filter(&self) -> Option<&AstFilter> {
        match (self.shape, self.pipeline.stages()) {
            (QueryShape::Filter, [AstStage::Match(stage)]) => Some(stage.filter()),
            _ => None,
        }
    }

    pub fn render(&self) -> Value {
        self.pipeline.render()
    }
}

/// Bounded concurrent map from fingerprint to compiled pipeline.
///
/// When full, an arbitrary other entry is evicted before a new one is
/// inserted, so the bound is approximate only under concurrent misses.
#[derive(Debug)]
pub struct TranslationCache {
    entries: DashMap<u64, Arc<CompiledPipeline>>,
    capacity: usize,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn get(&self, fingerprint: u64) -> Option<Arc<CompiledPipeline>> {
        self.entries.get(&fingerprint).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the cached pipeline for `fingerprint`, running `compile`
    /// while the entry is locked when none exists yet. Errors are returned
    /// and not stored. If the stored pipeline was compiled from a different
    /// source (a fingerprint collision) the result is compiled fresh and not
    /// stored.
    pub fn get_or_compile<F>(
        &self,
        fingerprint: u64,
        source: &str,
        compile: F,
    ) -> Result<Arc<CompiledPipeline>, CompileError>
    where
        F: FnOnce() -> Result<CompiledPipeline, CompileError>,
    {
        if self.capacity == 0 {
            return Ok(Arc::new(compile()?));
        }
        if !self.entries.contains_key(&fingerprint) {
            while self.entries.len() >= self.capacity {
                if !self.evict_one(fingerprint) {
                    break;
                }
            }
        }
        match self.entries.entry(fingerprint) {
            Entry::Occupied(entry) if entry.get().source == source => {
                trace!(fingerprint, "cache hit");
                return Ok(Arc::clone(entry.get()));
            }
            Entry::Occupied(_) => {
                debug!(fingerprint, "fingerprint collision, compiling without cache");
            }
            Entry::Vacant(entry) => {
                trace!(fingerprint, "cache miss");
                let compiled = Arc::new(compile()?);
                entry.insert(Arc::clone(&compiled));
                return Ok(compiled);
            }
        }
        Ok(Arc::new(compile()?))
    }

    /// Removes the first entry found other than `keep`.
    fn evict_one(&self, keep: u64) -> bool {
        let victim = self
            .entries
            .iter()
            .map(|entry| *entry.key())
            .find(|key| *key != keep);
        match victim {
            Some(key) => {
                trace!(fingerprint = key, "cache eviction");
                self.entries.remove(&key).is_some()
            }
            None => false,
        }
    }
}

/// Compiles query text with a fixed context and options.
#[derive(Debug, Default)]
pub struct Compiler {
    context: TranslationContext,
    options: CompileOptions,
    cache: TranslationCache,
}

impl Compiler {
    pub fn new(context: TranslationContext, options: CompileOptions) -> Self {
        Self {
            context,
            options,
            cache: TranslationCache::with_capacity(options.cache_capacity),
        }
    }

    pub fn context(&self) -> &TranslationContext {
        &self.context
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn compile(&self, source: &str) -> Result<Arc<CompiledPipeline>, CompileError> {
        let source = source.trim();
        if !self.options.cache {
            return Ok(Arc::new(self.compile_uncached(source)?));
        }
        let fingerprint = fingerprint(source, &self.context, self.options);
        self.cache
            .get_or_compile(fingerprint, source, || self.compile_uncached(source))
    }

    fn compile_uncached(&self, source: &str) -> Result<CompiledPipeline, CompileError> {
        let (shape, mut pipeline) = if is_pipeline_query(source) {
            let query = parse_query(source)?;
            (QueryShape::Pipeline, Arc::new(translate_query(&query, &self.context)?))
        } else {
            let expr = parse_expression(source)?;
            let filter = translate_filter(&expr, &self.context)?;
            (
                QueryShape::Filter,
                Arc::new(AstPipeline::new(vec![AstStage::match_filter(filter)])),
            )
        };
        if self.options.simplify {
            pipeline = optimize::simplify(&pipeline)?;
        }
        if self.options.coalesce_stages {
            pipeline = optimize::coalesce_stages(&pipeline)?;
        }
        debug!(?shape, stages = pipeline.len(), "compiled query");
        Ok(CompiledPipeline {
            source: source.to_string(),
            shape,
            pipeline,
        })
    }
}

/// Structural fingerprint of everything that influences a compilation.
pub fn fingerprint(source: &str, context: &TranslationContext, options: CompileOptions) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write(source.as_bytes());
    hasher.write_u8(0xff);

    hasher.write_u64(context.constants().len() as u64);
    for (ty, member, value) in context.constants().iter() {
        hasher.write(ty.as_bytes());
        hasher.write_u8(b'.');
        hasher.write(member.as_bytes());
        hasher.write_i64(value);
    }

    let parameters: Vec<(&str, &Value)> = context.parameters().collect();
    hasher.write_u64(parameters.len() as u64);
    for (name, value) in parameters {
        hasher.write(name.as_bytes());
        hasher.write_u8(b'=');
        hash_value(value, &mut hasher);
    }

    hasher.write_u8(options.simplify as u8);
    hasher.write_u8(options.coalesce_stages as u8);
    hasher.finish()
}

fn hash_value(value: &Value, hasher: &mut Xxh64) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(v) => {
            hasher.write_u8(1);
            hasher.write_u8(*v as u8);
        }
        Value::Number(n) => {
            hasher.write_u8(2);
            hasher.write(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.write_u8(3);
            hasher.write_u64(s.len() as u64);
            hasher.write(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.write_u8(4);
            hasher.write_u64(items.len() as u64);
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.write_u8(5);
            hasher.write_u64(map.len() as u64);
            for (key, item) in map {
                hasher.write(key.as_bytes());
                hash_value(item, hasher);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::constant::ConstantTable;

    fn flags() -> TranslationContext {
        TranslationContext::new()
            .with_constants(ConstantTable::new().with_enum("E", &[("E1", 1), ("E2", 2), ("E4", 4)]))
    }

    #[test]
    fn filters_compile_to_a_single_match() {
        let compiler = Compiler::new(flags(), CompileOptions::default());
        let compiled = compiler.compile("($.E & (E.E2 | E.E4)) != 0").unwrap();
        assert_eq!(compiled.shape(), QueryShape::Filter);
        assert_eq!(
            compiled.render(),
            json!([{ "$match": { "E": { "$bitsAnySet": 6 } } }])
        );
        assert_eq!(
            compiled.filter().map(|f| f.render()),
            Some(json!({ "E": { "$bitsAnySet": 6 } }))
        );
    }

    #[test]
    fn fingerprint_covers_context_and_options() {
        let source = "$.a == $limit";
        let base = fingerprint(source, &flags(), CompileOptions::default());
        let bound = fingerprint(
            source,
            &flags().with_parameter("limit", 3),
            CompileOptions::default(),
        );
        let coalescing = fingerprint(
            source,
            &flags(),
            CompileOptions {
                coalesce_stages: true,
                ..CompileOptions::default()
            },
        );
        assert_ne!(base, bound);
        assert_ne!(base, coalescing);
        assert_eq!(base, fingerprint(source, &flags(), CompileOptions::default()));
    }

    #[test]
    fn failures_are_not_cached() {
        let compiler = Compiler::new(flags(), CompileOptions::default());
        assert!(matches!(
            compiler.compile("($.E & E.E2) == 3"),
            Err(CompileError::Translation(_))
        ));
        assert!(compiler.cache().is_empty());
    }

    #[test]
    fn colliding_fingerprints_compile_fresh() {
        let cache = TranslationCache::new();
        let compile = |source: &str| {
            let source = source.to_string();
            move || {
                Ok(CompiledPipeline {
                    source,
                    shape: QueryShape::Pipeline,
                    pipeline: Arc::new(AstPipeline::default()),
                })
            }
        };
        let first = cache.get_or_compile(7, "a", compile("a")).unwrap();
        let other = cache.get_or_compile(7, "b", compile("b")).unwrap();
        assert_eq!(other.source(), "b");
        assert_eq!(cache.get(7).unwrap().source(), "a");
        assert!(Arc::ptr_eq(&first, &cache.get_or_compile(7, "a", compile("a")).unwrap()));
    }

    #[test]
    fn full_cache_evicts_before_inserting() {
        let cache = TranslationCache::with_capacity(2);
        let compile = |source: &'static str| {
            move || {
                Ok(CompiledPipeline {
                    source: source.to_string(),
                    shape: QueryShape::Pipeline,
                    pipeline: Arc::new(AstPipeline::default()),
                })
            }
        };
        cache.get_or_compile(1, "a", compile("a")).unwrap();
        cache.get_or_compile(2, "b", compile("b")).unwrap();
        cache.get_or_compile(3, "c", compile("c")).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(3).unwrap().source(), "c");

        // Hits never evict
        cache.get_or_compile(3, "c", compile("c")).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let compiler = Compiler::new(
            flags(),
            CompileOptions {
                cache_capacity: 0,
                ..CompileOptions::default()
            },
        );
        let first = compiler.compile("$.a == 1").unwrap();
        let second = compiler.compile("$.a == 1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(compiler.cache().is_empty());
    }

    #[test]
    fn disabled_cache_compiles_every_time() {
        let options = CompileOptions {
            cache: false,
            ..CompileOptions::default()
        };
        let compiler = Compiler::new(flags(), options);
        let first = compiler.compile("$.a == 1").unwrap();
        let second = compiler.compile("$.a == 1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(compiler.cache().is_empty());
    }
}
