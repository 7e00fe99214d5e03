//! Standard Information Retrieval metrics over runs and qrels.
//!
//! Metric names follow trec_eval (`map`, `P_10`, `ndcg_cut_20`, ...) and the
//! ir_measures spellings (`AP`, `P@10`, `nDCG@20`, ...) are accepted as
//! aliases when parsing.
//!
//! Aggregation is a mean over the queries that have judgments. A judged query
//! missing from the run scores 0 for every metric; a query whose judgment map
//! is empty is skipped entirely.
//!
//! # References
//!
//! - Järvelin & Kekäläinen (2002). "Cumulated gain-based evaluation of IR techniques"
//! - Voorhees & Harman (2005). "TREC: Experiment and Evaluation in Information Retrieval"

use crate::error::ConfigurationError;
use crate::run::{Qrels, Run};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// A retrieval metric, optionally with a rank cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    /// `map`: average precision
    AveragePrecision,
    /// `P_k`: precision at k
    Precision(usize),
    /// `recall_k`: recall at k
    Recall(usize),
    /// `ndcg`: nDCG over the full ranking
    Ndcg,
    /// `ndcg_cut_k`: nDCG at k
    NdcgCut(usize),
    /// `recip_rank`: reciprocal rank of the first relevant document
    ReciprocalRank,
    /// `mrr`: reciprocal rank counting any positive grade as relevant
    Mrr,
    /// `judged_k`: fraction of the top k that has a judgment
    Judged(usize),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::AveragePrecision => write!(f, "map"),
            Metric::Precision(k) => write!(f, "P_{}", k),
            Metric::Recall(k) => write!(f, "recall_{}", k),
            Metric::Ndcg => write!(f, "ndcg"),
            Metric::NdcgCut(k) => write!(f, "ndcg_cut_{}", k),
            Metric::ReciprocalRank => write!(f, "recip_rank"),
            Metric::Mrr => write!(f, "mrr"),
            Metric::Judged(k) => write!(f, "judged_{}", k),
        }
    }
}

impl FromStr for Metric {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigurationError::UnknownMetric(s.to_string());
        let cutoff = |k: &str| match k.parse::<usize>() {
            Ok(k) if k > 0 => Ok(k),
            _ => Err(unknown()),
        };

        let name = s.trim();
        match name {
            "map" | "AP" => return Ok(Metric::AveragePrecision),
            "ndcg" | "nDCG" => return Ok(Metric::Ndcg),
            "recip_rank" | "RR" => return Ok(Metric::ReciprocalRank),
            "mrr" | "MRR" => return Ok(Metric::Mrr),
            _ => {}
        }

        let prefixed: [(&str, fn(usize) -> Metric); 8] = [
            ("ndcg_cut_", Metric::NdcgCut),
            ("nDCG@", Metric::NdcgCut),
            ("P_", Metric::Precision),
            ("P@", Metric::Precision),
            ("recall_", Metric::Recall),
            ("R@", Metric::Recall),
            ("judged_", Metric::Judged),
            ("Judged@", Metric::Judged),
        ];
        for (prefix, build) in prefixed {
            if let Some(k) = name.strip_prefix(prefix) {
                return Ok(build(cutoff(k)?));
            }
        }
        Err(unknown())
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a list of metric names.
pub fn parse_metrics<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>, ConfigurationError> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

// ============================================================================
// Results
// ============================================================================

/// Per-query metric values, computed once and never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsResult {
    per_query: BTreeMap<Metric, BTreeMap<String, f64>>,
}

impl MetricsResult {
    /// Values of one metric keyed by query id.
    pub fn per_query(&self, metric: Metric) -> Option<&BTreeMap<String, f64>> {
        self.per_query.get(&metric)
    }

    /// Mean of a metric over evaluated queries. 0.0 when no query was judged.
    pub fn mean(&self, metric: Metric) -> Option<f64> {
        self.per_query.get(&metric).map(|values| {
            if values.is_empty() {
                0.0
            } else {
                values.values().sum::<f64>() / values.len() as f64
            }
        })
    }

    /// Means of every computed metric.
    pub fn means(&self) -> BTreeMap<Metric, f64> {
        self.per_query
            .keys()
            .filter_map(|m| self.mean(*m).map(|v| (*m, v)))
            .collect()
    }

    /// Number of queries that contributed to the means.
    pub fn num_queries(&self) -> usize {
        self.per_query.values().next().map_or(0, BTreeMap::len)
    }

    /// Compact `name=value` rendering for log lines.
    pub fn summary(&self) -> String {
        format_means(&self.means())
    }
}

/// Formats metric means as space-separated `name=value` pairs.
pub fn format_means(means: &BTreeMap<Metric, f64>) -> String {
    means
        .iter()
        .map(|(m, v)| format!("{}={:.4}", m, v))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluates a run against qrels.
///
/// # Arguments
///
/// * `run` - Rankings to score; each is re-sorted by descending score, ties
///   keeping their run order
/// * `qrels` - Judgments defining which queries are evaluated
/// * `metrics` - Metrics to compute
/// * `relevance_level` - Minimum grade counted as relevant by binary metrics
///
/// # Returns
///
/// Per-query values for every judged query; queries absent from `run` get 0.
pub fn evaluate(run: &Run, qrels: &Qrels, metrics: &[Metric], relevance_level: i32) -> MetricsResult {
    let mut per_query: BTreeMap<Metric, BTreeMap<String, f64>> =
        metrics.iter().map(|m| (*m, BTreeMap::new())).collect();

    for (qid, judgments) in qrels.iter() {
        if judgments.is_empty() {
            continue;
        }
        let ranking = ranked_doc_ids(run, qid);
        for metric in metrics {
            let value = score_query(*metric, &ranking, judgments, relevance_level);
            if let Some(values) = per_query.get_mut(metric) {
                values.insert(qid.to_string(), value);
            }
        }
    }

    MetricsResult { per_query }
}

fn ranked_doc_ids<'a>(run: &'a Run, qid: &str) -> Vec<&'a str> {
    let Some(docs) = run.get(qid) else {
        return Vec::new();
    };
    let mut ranked: Vec<_> = docs.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.into_iter().map(|d| d.doc_id.as_str()).collect()
}

/// Computes one metric for one query.
///
/// # Arguments
///
/// * `ranking` - Document ids, best first
/// * `judgments` - Grades for this query
pub fn score_query(
    metric: Metric,
    ranking: &[&str],
    judgments: &HashMap<String, i32>,
    relevance_level: i32,
) -> f64 {
    let is_relevant = |doc: &str| judgments.get(doc).is_some_and(|g| *g >= relevance_level);
    let num_relevant = judgments.values().filter(|g| **g >= relevance_level).count();

    match metric {
        Metric::AveragePrecision => average_precision(ranking, is_relevant, num_relevant),
        Metric::Precision(k) => precision_at_k(ranking, is_relevant, k),
        Metric::Recall(k) => recall_at_k(ranking, is_relevant, num_relevant, k),
        Metric::Ndcg => ndcg_at_k(ranking, judgments, usize::MAX),
        Metric::NdcgCut(k) => ndcg_at_k(ranking, judgments, k),
        Metric::ReciprocalRank => reciprocal_rank(ranking, is_relevant),
        Metric::Mrr => reciprocal_rank(ranking, |doc| judgments.get(doc).is_some_and(|g| *g > 0)),
        Metric::Judged(k) => judged_at_k(ranking, judgments, k),
    }
}

// ============================================================================
// MAP (Mean Average Precision)
// ============================================================================

/// Average precision for one query.
///
/// ```text
/// AP = (1 / |relevant|) * Σ P(k) * rel(k)
/// ```
///
/// Relevant documents that were never retrieved contribute 0, so the
/// denominator is the number of relevant judgments, not retrieved ones.
fn average_precision(ranking: &[&str], is_relevant: impl Fn(&str) -> bool, num_relevant: usize) -> f64 {
    if num_relevant == 0 {
        return 0.0;
    }
    let mut found = 0usize;
    let mut precision_sum = 0.0;
    for (i, doc) in ranking.iter().enumerate() {
        if is_relevant(doc) {
            found += 1;
            precision_sum += found as f64 / (i + 1) as f64;
        }
    }
    precision_sum / num_relevant as f64
}

// ============================================================================
// Precision / Recall
// ============================================================================

/// Relevant documents in the top k, divided by k (not by results returned).
fn precision_at_k(ranking: &[&str], is_relevant: impl Fn(&str) -> bool, k: usize) -> f64 {
    let hits = ranking.iter().take(k).filter(|d| is_relevant(d)).count();
    hits as f64 / k as f64
}

fn recall_at_k(
    ranking: &[&str],
    is_relevant: impl Fn(&str) -> bool,
    num_relevant: usize,
    k: usize,
) -> f64 {
    if num_relevant == 0 {
        return 0.0;
    }
    let hits = ranking.iter().take(k).filter(|d| is_relevant(d)).count();
    hits as f64 / num_relevant as f64
}

// ============================================================================
// NDCG (Normalized Discounted Cumulative Gain)
// ============================================================================

/// nDCG at k with linear gain.
///
/// ```text
/// DCG@k  = Σ grade_i / log₂(i + 1)  for i in 1..=k
/// nDCG@k = DCG@k / IDCG@k
/// ```
///
/// Negative grades contribute no gain. Returns 0.0 when no document has a
/// positive grade.
fn ndcg_at_k(ranking: &[&str], judgments: &HashMap<String, i32>, k: usize) -> f64 {
    let dcg: f64 = ranking
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, doc)| gain(judgments.get(*doc).copied().unwrap_or(0)) / discount(i + 1))
        .sum();

    let mut ideal: Vec<i32> = judgments.values().copied().filter(|g| *g > 0).collect();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let idcg: f64 = ideal
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, g)| gain(*g) / discount(i + 1))
        .sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

#[inline]
fn gain(grade: i32) -> f64 {
    grade.max(0) as f64
}

/// Logarithmic discount for a 1-indexed position.
#[inline]
fn discount(position: usize) -> f64 {
    (position as f64 + 1.0).log2()
}

// ============================================================================
// Reciprocal rank / judged
// ============================================================================

fn reciprocal_rank(ranking: &[&str], is_relevant: impl Fn(&str) -> bool) -> f64 {
    ranking
        .iter()
        .position(|d| is_relevant(d))
        .map_or(0.0, |pos| 1.0 / (pos + 1) as f64)
}

/// Share of the top k results that carry any judgment.
///
/// Divides by the number of results actually inspected, so a short ranking
/// is not penalised; an empty ranking scores 0.
fn judged_at_k(ranking: &[&str], judgments: &HashMap<String, i32>, k: usize) -> f64 {
    let top: Vec<&str> = ranking.iter().take(k).copied().collect();
    if top.is_empty() {
        return 0.0;
    }
    let judged = top.iter().filter(|d| judgments.contains_key(**d)).count();
    judged as f64 / top.len() as f64
}
