//! Blending first-stage and reranker scores.
//!
//! Both runs are min-max normalised per query before blending:
//!
//! ```text
//! score(q, d) = α · norm(first_stage(q, d)) + (1 - α) · norm(reranker(q, d))
//! ```
//!
//! A document ranked by only one of the runs takes the other run's minimum
//! for that query (0 after normalisation). α is picked per fold on dev
//! queries and only then applied to that fold's test queries.

use super::metrics::{evaluate, Metric};
use crate::benchmark::Benchmark;
use crate::error::{ConfigurationError, PipelineError};
use crate::run::{Run, ScoredDoc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Reranker predictions for the held-out splits of one fold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldPredictions {
    pub dev: Run,
    pub test: Run,
}

/// Outcome of [`interpolated_eval`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpolationResult {
    /// α chosen on each fold's dev queries
    pub alphas: BTreeMap<String, f64>,
    /// Best dev value of the optimised metric per fold
    pub dev_scores: BTreeMap<String, f64>,
    /// Metrics of the pooled interpolated test runs
    pub metrics: BTreeMap<Metric, f64>,
}

/// Weighted blend of two already-normalised scores.
#[inline]
pub fn blend(first_stage: f64, reranker: f64, alpha: f64) -> f64 {
    alpha * first_stage + (1.0 - alpha) * reranker
}

/// α values from 0 to 1 inclusive, spaced by `step`.
pub fn alpha_grid(step: f64) -> Vec<f64> {
    let n = (1.0 / step + 1e-9).floor() as usize;
    let mut grid: Vec<f64> = (0..=n).map(|i| (i as f64 * step).min(1.0)).collect();
    if grid.last().is_some_and(|a| *a < 1.0 - 1e-9) {
        grid.push(1.0);
    }
    grid
}

/// Normalisation bounds for one query's scores.
fn score_range(docs: &[ScoredDoc]) -> (f64, f64) {
    if docs.is_empty() {
        return (0.0, 1.0);
    }
    let max = docs.iter().map(|d| d.score).fold(f64::NEG_INFINITY, f64::max);
    let mut min = docs.iter().map(|d| d.score).fold(f64::INFINITY, f64::min);
    if min == max {
        min = 0.01 * max - 0.01;
        // 0.01·m − 0.01 == m only at m = −1/99
        if min == max {
            min = max - 1.0;
        }
    }
    (min, max)
}

/// Interpolates two runs over `qids`.
///
/// Queries absent from a run are treated as an empty ranking. The output
/// ranking of each query is sorted by blended score.
pub fn interpolate_runs(first_stage: &Run, reranker: &Run, qids: &BTreeSet<String>, alpha: f64) -> Run {
    let mut out = Run::new();
    for qid in qids {
        let docs1 = first_stage.get(qid).unwrap_or(&[]);
        let docs2 = reranker.get(qid).unwrap_or(&[]);
        let (min1, max1) = score_range(docs1);
        let (min2, max2) = score_range(docs2);

        let scores1: HashMap<&str, f64> = docs1.iter().map(|d| (d.doc_id.as_str(), d.score)).collect();
        let scores2: HashMap<&str, f64> = docs2.iter().map(|d| (d.doc_id.as_str(), d.score)).collect();

        out.ensure_query(qid.as_str());
        let union = docs1.iter().chain(docs2.iter().filter(|d| !scores1.contains_key(d.doc_id.as_str())));
        for doc in union {
            let s1 = scores1.get(doc.doc_id.as_str()).copied().unwrap_or(min1);
            let s2 = scores2.get(doc.doc_id.as_str()).copied().unwrap_or(min2);
            let n1 = (s1 - min1) / (max1 - min1);
            let n2 = (s2 - min2) / (max2 - min2);
            out.push_unchecked(qid, ScoredDoc::new(doc.doc_id.clone(), blend(n1, n2, alpha)));
        }
    }
    out.sorted()
}

/// Chooses α per fold on dev and reports pooled test metrics at those α.
///
/// # Arguments
///
/// * `searcher_runs` - First-stage run used by each fold
/// * `reranker_runs` - Reranker dev and test predictions of each fold
/// * `optimize` - Metric maximised on dev; the smallest α wins ties
/// * `metrics` - Metrics reported on test (`optimize` is always included)
/// * `step` - Grid spacing for α
pub fn interpolated_eval(
    searcher_runs: &BTreeMap<String, Run>,
    reranker_runs: &BTreeMap<String, FoldPredictions>,
    benchmark: &Benchmark,
    optimize: Metric,
    metrics: &[Metric],
    step: f64,
) -> Result<InterpolationResult, PipelineError> {
    let mut report_metrics = vec![optimize];
    report_metrics.extend(metrics.iter().filter(|m| **m != optimize).copied());

    let grid = alpha_grid(step);
    let mut alphas = BTreeMap::new();
    let mut dev_scores = BTreeMap::new();
    let mut pooled = Run::new();

    for (fold_name, fold) in benchmark.folds.iter() {
        let first_stage = searcher_runs.get(fold_name).ok_or_else(|| {
            ConfigurationError::Invalid(format!("no first-stage run for fold '{}'", fold_name))
        })?;
        let predictions = reranker_runs.get(fold_name).ok_or_else(|| {
            ConfigurationError::Invalid(format!("no reranker predictions for fold '{}'", fold_name))
        })?;

        let dev_qids = &fold.predict.dev;
        let dev_qrels = benchmark.qrels.for_queries(dev_qids);
        let mut best: Option<(f64, f64)> = None;
        for alpha in &grid {
            let run = interpolate_runs(first_stage, &predictions.dev, dev_qids, *alpha);
            let value = evaluate(&run, &dev_qrels, &[optimize], benchmark.relevance_level)
                .mean(optimize)
                .unwrap_or(0.0);
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((*alpha, value));
            }
        }
        let (alpha, value) = best.unwrap_or((0.0, 0.0));
        debug!("Fold {}: alpha={:.2} dev {}={:.4}", fold_name, alpha, optimize, value);
        alphas.insert(fold_name.to_string(), alpha);
        dev_scores.insert(fold_name.to_string(), value);

        let test_run = interpolate_runs(first_stage, &predictions.test, &fold.predict.test, alpha);
        pooled.merge(&test_run);
    }

    let test_qrels = benchmark.qrels.for_queries(&benchmark.folds.all_test_qids());
    let result = evaluate(&pooled, &test_qrels, &report_metrics, benchmark.relevance_level);
    info!("Interpolated test metrics: {}", result.summary());

    Ok(InterpolationResult {
        alphas,
        dev_scores,
        metrics: result.means(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tiny_benchmark;
    use proptest::prelude::*;

    fn run(entries: &[(&str, &str, f64)]) -> Run {
        entries
            .iter()
            .map(|(q, d, s)| (q.to_string(), d.to_string(), *s))
            .collect()
    }

    fn qids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_blend_endpoints() {
        assert_eq!(blend(0.3, 0.8, 1.0), 0.3);
        assert_eq!(blend(0.3, 0.8, 0.0), 0.8);
        assert!((blend(0.0, 1.0, 0.25) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_alpha_grid_covers_unit_interval() {
        let grid = alpha_grid(0.05);
        assert_eq!(grid.len(), 21);
        assert_eq!(grid[0], 0.0);
        assert_eq!(*grid.last().unwrap(), 1.0);

        let coarse = alpha_grid(0.3);
        assert_eq!(coarse.len(), 5);
        assert_eq!(*coarse.last().unwrap(), 1.0);
    }

    #[test]
    fn test_interpolate_alpha_one_is_first_stage_order() {
        let first = run(&[("q1", "a", 10.0), ("q1", "b", 5.0), ("q1", "c", 0.0)]);
        let second = run(&[("q1", "c", 3.0), ("q1", "b", 2.0), ("q1", "a", 1.0)]);

        let out = interpolate_runs(&first, &second, &qids(&["q1"]), 1.0);
        let docs = out.get("q1").unwrap();
        assert_eq!(docs[0], ScoredDoc::new("a", 1.0));
        assert_eq!(docs[1], ScoredDoc::new("b", 0.5));
        assert_eq!(docs[2], ScoredDoc::new("c", 0.0));

        let out = interpolate_runs(&first, &second, &qids(&["q1"]), 0.0);
        let order: Vec<&str> = out.get("q1").unwrap().iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_interpolate_missing_docs_take_minimum() {
        let first = run(&[("q1", "a", 2.0), ("q1", "b", 1.0)]);
        let second = run(&[("q1", "c", 4.0), ("q1", "a", 0.0)]);

        let out = interpolate_runs(&first, &second, &qids(&["q1", "q2"]), 0.5);
        let scores: HashMap<&str, f64> = out
            .get("q1")
            .unwrap()
            .iter()
            .map(|d| (d.doc_id.as_str(), d.score))
            .collect();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores["a"], 0.5);
        assert_eq!(scores["b"], 0.0);
        assert_eq!(scores["c"], 0.5);
        assert!(out.get("q2").unwrap().is_empty());
    }

    #[test]
    fn test_constant_scores_normalise_to_one() {
        let first = run(&[("q1", "a", 3.0), ("q1", "b", 3.0)]);
        let out = interpolate_runs(&first, &Run::new(), &qids(&["q1"]), 1.0);
        for doc in out.get("q1").unwrap() {
            assert!((doc.score - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_interpolated_eval_picks_alpha_on_dev() {
        let benchmark = tiny_benchmark();
        // First stage scores by grade, the reranker inverts it. Both list
        // non-relevant documents first, so blended ties rank them on top.
        let mut first = Run::new();
        let mut reranked = Run::new();
        for (qid, judgments) in benchmark.qrels.iter() {
            let mut docs: Vec<(&String, &i32)> = judgments.iter().collect();
            docs.sort_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));
            for (doc, grade) in docs {
                first.insert(qid, doc.clone(), *grade as f64);
                reranked.insert(qid, doc.clone(), -(*grade as f64));
            }
        }

        let mut searcher_runs = BTreeMap::new();
        let mut reranker_runs = BTreeMap::new();
        for (name, fold) in benchmark.folds.iter() {
            searcher_runs.insert(name.to_string(), first.clone());
            reranker_runs.insert(
                name.to_string(),
                FoldPredictions {
                    dev: reranked.restrict(&fold.predict.dev),
                    test: reranked.restrict(&fold.predict.test),
                },
            );
        }

        let result = interpolated_eval(
            &searcher_runs,
            &reranker_runs,
            &benchmark,
            Metric::AveragePrecision,
            &[Metric::Precision(1)],
            0.25,
        )
        .unwrap();

        assert_eq!(result.alphas.len(), benchmark.folds.len());
        // 0.5 ties every document; 0.75 is the smallest alpha with AP = 1.
        for alpha in result.alphas.values() {
            assert_eq!(*alpha, 0.75);
        }
        assert_eq!(result.metrics[&Metric::AveragePrecision], 1.0);
        assert!(result.metrics.contains_key(&Metric::Precision(1)));
    }

    #[test]
    fn test_interpolated_eval_requires_every_fold() {
        let benchmark = tiny_benchmark();
        let err = interpolated_eval(
            &BTreeMap::new(),
            &BTreeMap::new(),
            &benchmark,
            Metric::AveragePrecision,
            &[],
            0.5,
        )
        .unwrap_err();
        assert!(err.to_string().contains("s1"));
    }

    proptest! {
        #[test]
        fn prop_interpolated_scores_within_unit_interval(
            s1 in prop::collection::vec(-50.0f64..50.0, 0..6),
            s2 in prop::collection::vec(-50.0f64..50.0, 0..6),
            alpha in 0.0f64..=1.0,
        ) {
            let mut first = Run::new();
            let mut second = Run::new();
            for (i, s) in s1.iter().enumerate() {
                first.insert("q", format!("d{}", i), *s);
            }
            for (i, s) in s2.iter().enumerate() {
                second.insert("q", format!("d{}", i + 3), *s);
            }
            let out = interpolate_runs(&first, &second, &qids(&["q"]), alpha);
            for doc in out.get("q").unwrap() {
                prop_assert!(doc.score >= -1e-9 && doc.score <= 1.0 + 1e-9);
            }
        }

        #[test]
        fn prop_alpha_grid_within_bounds(step in 0.01f64..=1.0) {
            let grid = alpha_grid(step);
            prop_assert_eq!(grid[0], 0.0);
            prop_assert_eq!(*grid.last().unwrap(), 1.0);
            prop_assert!(grid.iter().all(|a| (0.0..=1.0).contains(a)));
        }
    }
}
