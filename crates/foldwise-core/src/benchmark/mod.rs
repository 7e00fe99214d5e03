//! Benchmarks: topics, judgments, folds and the document collection.
//!
//! # Data Format
//!
//! A benchmark directory holds:
//!
//! ```text
//! <benchmark>/
//! ├── topics.tsv        # qid \t query text
//! ├── qrels.txt         # qid 0 docid grade
//! ├── folds.json        # {"s1": {"train_qids": [...], "predict": {"dev": [...], "test": [...]}}}
//! ├── corpus.jsonl      # {"doc_id": "...", "text": "..."}
//! └── benchmark.json    # optional: {"name", "query_type", "relevance_level"}
//! ```

use crate::error::{ParseError, PipelineError};
use crate::evaluation::{evaluate, Metric, MetricsResult};
use crate::folds::Folds;
use crate::run::{self, Qrels, Run};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// Collection
// ============================================================================

/// Read access to document text by id.
pub trait Collection: Send + Sync {
    /// Text of a document, if the collection has it.
    fn document(&self, doc_id: &str) -> Option<&str>;

    /// Number of documents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates `(doc_id, text)` pairs in arbitrary order.
    fn documents(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_>;
}

/// One corpus line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub doc_id: String,
    pub text: String,
}

/// A collection held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollection {
    docs: HashMap<String, String>,
}

impl InMemoryCollection {
    pub fn new(docs: HashMap<String, String>) -> Self {
        Self { docs }
    }

    /// Loads a JSONL corpus. A repeated doc id keeps the last text.
    pub fn load_jsonl(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut docs = HashMap::new();

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| PipelineError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: CorpusDocument = serde_json::from_str(&line)
                .map_err(|e| ParseError::new(path, line_num + 1, e.to_string()))?;
            docs.insert(doc.doc_id, doc.text);
        }

        Ok(Self { docs })
    }
}

impl Collection for InMemoryCollection {
    fn document(&self, doc_id: &str) -> Option<&str> {
        self.docs.get(doc_id).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.docs.len()
    }

    fn documents(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.docs.iter().map(|(id, text)| (id.as_str(), text.as_str())))
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for InMemoryCollection {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            docs: iter.into_iter().map(|(id, text)| (id.into(), text.into())).collect(),
        }
    }
}

// ============================================================================
// Benchmark
// ============================================================================

/// Optional `benchmark.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct BenchmarkMeta {
    name: Option<String>,
    query_type: String,
    relevance_level: i32,
}

impl Default for BenchmarkMeta {
    fn default() -> Self {
        Self {
            name: None,
            query_type: "title".to_string(),
            relevance_level: 1,
        }
    }
}

/// Everything a rerank task needs to know about a test collection.
#[derive(Clone)]
pub struct Benchmark {
    pub name: String,
    /// Which topic field the queries come from (informational)
    pub query_type: String,
    /// Minimum grade counted as relevant
    pub relevance_level: i32,
    /// Query id -> query text
    pub topics: BTreeMap<String, String>,
    pub qrels: Qrels,
    pub folds: Folds,
    pub collection: Arc<dyn Collection>,
}

impl fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Benchmark")
            .field("name", &self.name)
            .field("query_type", &self.query_type)
            .field("relevance_level", &self.relevance_level)
            .field("topics", &self.topics.len())
            .field("qrels", &self.qrels.len())
            .field("folds", &self.folds.len())
            .field("collection", &self.collection.len())
            .finish()
    }
}

impl Benchmark {
    /// Loads a benchmark directory.
    ///
    /// # Errors
    ///
    /// `Io` naming the missing file, `Parse` for malformed contents, and
    /// `Configuration` for invalid folds.
    pub fn load(dir: &Path) -> Result<Self, PipelineError> {
        let meta_path = dir.join("benchmark.json");
        let meta: BenchmarkMeta = if meta_path.exists() {
            let text = std::fs::read_to_string(&meta_path).map_err(|e| PipelineError::io(&meta_path, e))?;
            serde_json::from_str(&text).map_err(|e| ParseError::new(&meta_path, e.line(), e.to_string()))?
        } else {
            BenchmarkMeta::default()
        };

        let topics = run::load_topics(&dir.join("topics.tsv"))?;
        let qrels = run::load_qrels(&dir.join("qrels.txt"))?;
        let folds = Folds::load(&dir.join("folds.json"))?;
        let collection = InMemoryCollection::load_jsonl(&dir.join("corpus.jsonl"))?;

        let name = meta.name.unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "benchmark".to_string())
        });

        info!(
            "Loaded benchmark {}: {} topics, {} judged queries, {} folds, {} documents",
            name,
            topics.len(),
            qrels.len(),
            folds.len(),
            collection.len()
        );

        Ok(Self {
            name,
            query_type: meta.query_type,
            relevance_level: meta.relevance_level,
            topics,
            qrels,
            folds,
            collection: Arc::new(collection),
        })
    }

    /// Evaluates a run at this benchmark's relevance level.
    ///
    /// Pass `None` to evaluate against every judgment of the benchmark.
    pub fn evaluate(&self, run: &Run, qrels: Option<&Qrels>, metrics: &[Metric]) -> MetricsResult {
        evaluate(run, qrels.unwrap_or(&self.qrels), metrics, self.relevance_level)
    }
}
