//! BM25 first stage over the benchmark collection.
//!
//! Wraps the [`bm25`](https://crates.io/crates/bm25) crate. Documents are
//! indexed under dense `u64` ids assigned in sorted doc id order, so the
//! same collection always produces the same run file.
//!
//! Run files are named by a content digest of the ranking inputs (hits,
//! topics and collection), so an edited topic or document leads to a fresh
//! run instead of reusing a stale one.

use super::FirstStage;
use crate::benchmark::Benchmark;
use crate::cache::CacheKey;
use crate::error::PipelineError;
use crate::run::{self, Run};
use bm25::{Document, Language, SearchEngineBuilder};
use std::path::PathBuf;
use tracing::{info, instrument};

/// Hits kept per query when none is configured.
pub const DEFAULT_HITS: usize = 1000;

/// BM25 searcher writing one run file per benchmark.
#[derive(Debug, Clone)]
pub struct Bm25Searcher {
    output_dir: PathBuf,
    hits: usize,
}

impl Bm25Searcher {
    /// # Arguments
    ///
    /// * `output_dir` - Directory receiving `<benchmark>/bm25_k<hits>-<digest>.run`
    /// * `hits` - Documents retrieved per query
    pub fn new(output_dir: impl Into<PathBuf>, hits: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            hits,
        }
    }

    /// Path of the run file for `benchmark`.
    pub fn run_path(&self, benchmark: &Benchmark) -> PathBuf {
        let key = self.input_key(benchmark);
        self.output_dir
            .join(&benchmark.name)
            .join(format!("bm25_k{}-{}.run", self.hits, &key.hex()[..16]))
    }

    /// Digest of everything `rank` reads.
    fn input_key(&self, benchmark: &Benchmark) -> CacheKey {
        let mut key = CacheKey::builder("bm25")
            .bytes(&(self.hits as u64).to_le_bytes())
            .str("english");
        for (qid, text) in &benchmark.topics {
            key = key.entry(qid, Some(text));
        }
        let mut documents: Vec<(&str, &str)> = benchmark.collection.documents().collect();
        documents.sort_unstable();
        for (doc_id, text) in documents {
            key = key.entry(doc_id, Some(text));
        }
        key.finish()
    }

    /// Ranks the collection for every topic.
    ///
    /// Queries without a single matching document are kept with an empty
    /// ranking.
    pub fn rank(&self, benchmark: &Benchmark) -> Run {
        let mut doc_ids: Vec<&str> = benchmark.collection.documents().map(|(id, _)| id).collect();
        doc_ids.sort_unstable();

        let documents: Vec<Document<u64>> = doc_ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                benchmark.collection.document(id).map(|text| Document {
                    id: i as u64,
                    contents: text.to_string(),
                })
            })
            .collect();
        let engine = SearchEngineBuilder::<u64>::with_documents(Language::English, documents).build();

        let mut out = Run::new();
        for (qid, text) in &benchmark.topics {
            out.ensure_query(qid.as_str());
            out.extend(engine.search(text, self.hits).into_iter().filter_map(|result| {
                doc_ids
                    .get(result.document.id as usize)
                    .map(|doc_id| (qid.clone(), doc_id.to_string(), f64::from(result.score)))
            }));
        }
        out
    }
}

impl FirstStage for Bm25Searcher {
    fn name(&self) -> &str {
        "bm25"
    }

    #[instrument(skip_all, fields(benchmark = %benchmark.name, hits = self.hits))]
    fn search(&self, benchmark: &Benchmark) -> Result<Vec<PathBuf>, PipelineError> {
        let path = self.run_path(benchmark);
        if path.exists() {
            info!("Reusing BM25 run {}", path.display());
            return Ok(vec![path]);
        }
        let ranked = self.rank(benchmark);
        run::save(&ranked, &path)?;
        info!(
            "Wrote BM25 run for {} queries to {}",
            ranked.len(),
            path.display()
        );
        Ok(vec![path])
    }
}
