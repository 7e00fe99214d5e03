//! Retrieval metrics and score interpolation.
//!
//! # Overview
//!
//! - [`metrics`]: trec_eval-style metrics over a [`Run`](crate::run::Run)
//!   and [`Qrels`](crate::run::Qrels)
//! - [`interpolation`]: per-fold α search on dev, applied to test
//!
//! # Example
//!
//! ```
//! use foldwise_core::evaluation::{evaluate, Metric};
//! use foldwise_core::run::{Qrels, Run};
//!
//! let run: Run = vec![("q1".to_string(), "d1".to_string(), 0.9)].into_iter().collect();
//! let qrels: Qrels = vec![("q1".to_string(), "d1".to_string(), 1)].into_iter().collect();
//!
//! let result = evaluate(&run, &qrels, &[Metric::AveragePrecision], 1);
//! assert_eq!(result.mean(Metric::AveragePrecision), Some(1.0));
//! ```
//!
//! # Metrics Reference
//!
//! | Metric | Name | Relevance |
//! |--------|------|-----------|
//! | Average precision | `map` | grade ≥ level |
//! | Precision@k | `P_k` | grade ≥ level |
//! | Recall@k | `recall_k` | grade ≥ level |
//! | nDCG, nDCG@k | `ndcg`, `ndcg_cut_k` | linear gain on grade |
//! | Reciprocal rank | `recip_rank` | grade ≥ level |
//! | MRR | `mrr` | grade > 0 |
//! | Judged@k | `judged_k` | any judgment |

pub mod interpolation;
pub mod metrics;

pub use interpolation::{
    alpha_grid, blend, interpolate_runs, interpolated_eval, FoldPredictions, InterpolationResult,
};
pub use metrics::{evaluate, format_means, parse_metrics, score_query, Metric, MetricsResult};
