//! First-stage retrieval.
//!
//! A first stage produces one or more candidate run files. The reranker
//! only ever sees the candidate chosen for its fold: [`search_best_run`]
//! picks it on the fold's train and dev queries, never on test.

mod keyword;
mod run_file;

pub use keyword::{Bm25Searcher, DEFAULT_HITS};
pub use run_file::RunFileSearcher;

use crate::benchmark::Benchmark;
use crate::error::{ConfigurationError, PipelineError, Split};
use crate::evaluation::Metric;
use crate::run::{self, Run};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Which run file each fold uses, and how well those choices do on test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstStageResults {
    /// Chosen run file per fold
    pub paths: BTreeMap<String, PathBuf>,
    /// Mean metric on each fold's test queries
    pub fold_scores: BTreeMap<String, f64>,
    /// Metric over the pooled test queries of every fold
    pub score: f64,
}

impl FirstStageResults {
    /// Run file for `fold`.
    pub fn path(&self, fold: &str) -> Result<&Path, ConfigurationError> {
        self.paths
            .get(fold)
            .map(PathBuf::as_path)
            .ok_or_else(|| ConfigurationError::UnknownFold {
                fold: fold.to_string(),
                available: self.paths.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }
}

/// Produces first-stage runs for a benchmark.
pub trait FirstStage: Send + Sync {
    fn name(&self) -> &str;

    /// Writes (or locates) the candidate run files.
    fn search(&self, benchmark: &Benchmark) -> Result<Vec<PathBuf>, PipelineError>;

    /// Searches, then selects the best candidate for every fold.
    fn evaluate(&self, benchmark: &Benchmark, metric: Metric) -> Result<FirstStageResults, PipelineError> {
        let candidates = self.search(benchmark)?;
        search_best_run(&candidates, benchmark, metric)
    }
}

/// Picks, per fold, the candidate run maximising `metric` on train ∪ dev.
///
/// The first candidate wins ties. The chosen runs are then scored on their
/// fold's test queries; judged test queries missing from a run score 0.
///
/// # Errors
///
/// `ConfigurationError::Invalid` if `candidates` is empty, or a parse/I/O
/// error loading one of them.
#[instrument(skip_all, fields(candidates = candidates.len(), metric = %metric))]
pub fn search_best_run(
    candidates: &[PathBuf],
    benchmark: &Benchmark,
    metric: Metric,
) -> Result<FirstStageResults, PipelineError> {
    if candidates.is_empty() {
        return Err(ConfigurationError::Invalid("no first-stage run files to choose from".to_string()).into());
    }
    let runs = candidates
        .iter()
        .map(|path| run::load(path))
        .collect::<Result<Vec<Run>, _>>()?;

    let mut paths = BTreeMap::new();
    let mut fold_scores = BTreeMap::new();
    let mut pooled = Run::new();

    for (name, fold) in benchmark.folds.iter() {
        let tuning_qrels = benchmark.qrels.for_queries(&fold.tuning_qids());
        let mut best: Option<(usize, f64)> = None;
        for (i, run) in runs.iter().enumerate() {
            let value = benchmark
                .evaluate(run, Some(&tuning_qrels), &[metric])
                .mean(metric)
                .unwrap_or(0.0);
            debug!("fold={} candidate={} {}={:.4}", name, candidates[i].display(), metric, value);
            if best.map_or(true, |(_, best_value)| value > best_value) {
                best = Some((i, value));
            }
        }
        let Some((chosen, _)) = best else {
            continue;
        };

        let test_qids = fold.qids(Split::Test);
        let test_qrels = benchmark.qrels.for_queries(test_qids);
        let test_run = runs[chosen].restrict(test_qids);
        let test_score = benchmark
            .evaluate(&test_run, Some(&test_qrels), &[metric])
            .mean(metric)
            .unwrap_or(0.0);
        pooled.merge(&test_run);

        paths.insert(name.to_string(), candidates[chosen].clone());
        fold_scores.insert(name.to_string(), test_score);
    }

    let all_test_qrels = benchmark.qrels.for_queries(&benchmark.folds.all_test_qids());
    let score = benchmark
        .evaluate(&pooled, Some(&all_test_qrels), &[metric])
        .mean(metric)
        .unwrap_or(0.0);
    info!("First-stage cross-validated {}={:.4}", metric, score);

    Ok(FirstStageResults {
        paths,
        fold_scores,
        score,
    })
}
