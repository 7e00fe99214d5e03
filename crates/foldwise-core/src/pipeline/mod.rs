//! The cross-validated rerank task.
//!
//! One [`RerankTask`] owns one fold. `train` turns the fold's first-stage
//! run into reranked dev and test predictions:
//!
//! ```text
//! first stage ─► best run for fold ─┬─ train qids ───────────► sampler ─► trainer
//!                                   ├─ dev qids,  top threshold ──────────► dev preds
//!                                   └─ test qids, top testthreshold ──────► test preds
//! ```
//!
//! `evaluate` reads the persisted predictions back. Missing predictions for
//! the task's own fold are an error; missing predictions for other folds
//! only reduce coverage, and the cross-validated metrics are skipped.

mod layout;

pub use layout::ResultsLayout;

use crate::benchmark::Benchmark;
use crate::cache::CacheStore;
use crate::config::RerankConfig;
use crate::error::{PipelineError, Split};
use crate::evaluation::{format_means, interpolated_eval, FoldPredictions, InterpolationResult, Metric};
use crate::extractor::{BagOfWordsExtractor, Extractor};
use crate::folds::Fold;
use crate::model::LinearReranker;
use crate::run::{self, Run};
use crate::sampler::{sampler_from_config, PredSampler};
use crate::searcher::FirstStage;
use crate::trainer::{Trainer, TrainingProgress, ValidationSet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Reranked predictions written by [`RerankTask::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct RerankPredictions {
    pub dev: Run,
    pub test: Run,
    /// Only with `include_train`
    pub train: Option<Run>,
}

/// How many folds have predictions on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FoldCoverage {
    pub available: usize,
    pub total: usize,
}

impl FoldCoverage {
    pub fn is_complete(&self) -> bool {
        self.available == self.total
    }
}

impl fmt::Display for FoldCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.available, self.total)
    }
}

/// Result of [`RerankTask::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub fold: String,
    pub fold_dev_metrics: BTreeMap<Metric, f64>,
    pub fold_test_metrics: BTreeMap<Metric, f64>,
    /// Pooled test metrics over every fold; `None` unless all folds have
    /// predictions
    pub cv_metrics: Option<BTreeMap<Metric, f64>>,
    pub interpolated: Option<InterpolationResult>,
    pub coverage: FoldCoverage,
}

/// Trains, predicts and evaluates one fold of a benchmark.
#[derive(Clone)]
pub struct RerankTask {
    config: RerankConfig,
    benchmark: Arc<Benchmark>,
    first_stage: Arc<dyn FirstStage>,
    layout: ResultsLayout,
    cache: Option<Arc<dyn CacheStore>>,
}

impl fmt::Debug for RerankTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RerankTask")
            .field("fold", &self.config.fold)
            .field("benchmark", &self.benchmark.name)
            .field("first_stage", &self.first_stage.name())
            .field("layout", &self.layout)
            .finish()
    }
}

impl RerankTask {
    /// Creates a task for `config.fold`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the config is invalid or the fold does not exist.
    pub fn new(
        config: RerankConfig,
        benchmark: Arc<Benchmark>,
        first_stage: Arc<dyn FirstStage>,
        layout: ResultsLayout,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        benchmark.folds.get(&config.fold)?;
        Ok(Self {
            config,
            benchmark,
            first_stage,
            layout,
            cache: None,
        })
    }

    /// Caches preprocessed extractor state in `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The same task for another fold, sharing benchmark and outputs.
    pub fn for_fold(&self, fold: &str) -> Result<Self, PipelineError> {
        let mut config = self.config.clone();
        config.fold = fold.to_string();
        let task = Self::new(config, self.benchmark.clone(), self.first_stage.clone(), self.layout.clone())?;
        Ok(Self {
            cache: self.cache.clone(),
            ..task
        })
    }

    pub fn fold(&self) -> &str {
        &self.config.fold
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    pub fn layout(&self) -> &ResultsLayout {
        &self.layout
    }

    fn current_fold(&self) -> Result<&Fold, PipelineError> {
        Ok(self.benchmark.folds.get(&self.config.fold)?)
    }

    /// The first-stage run selected for this fold.
    fn first_stage_run(&self) -> Result<Run, PipelineError> {
        let results = self.first_stage.evaluate(&self.benchmark, self.config.optimize)?;
        let path = results.path(&self.config.fold)?;
        info!("Using first-stage run {} for fold {}", path.display(), self.config.fold);
        run::load(path)
    }

    /// An extractor preprocessed over every query and document of `run`.
    fn build_extractor(&self, run: &Run) -> Result<BagOfWordsExtractor, PipelineError> {
        let mut extractor = BagOfWordsExtractor::new(self.config.extractor.clone(), self.benchmark.collection.clone());
        if let Some(cache) = &self.cache {
            extractor = extractor.with_cache(cache.clone(), self.benchmark.name.clone());
        }
        let qids: BTreeSet<String> = run.query_ids().map(String::from).collect();
        let doc_ids: BTreeSet<String> = run.doc_ids().into_iter().map(String::from).collect();
        extractor.preprocess(&qids, &doc_ids, &self.benchmark.topics)?;
        Ok(extractor)
    }

    fn build_model(&self, extractor: &dyn Extractor) -> LinearReranker {
        LinearReranker::new(extractor.dim(), self.config.sampler.seed)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Trains on the fold and writes dev and test predictions of the best
    /// checkpoint.
    ///
    /// Dev queries are reranked to depth `threshold`, test queries to
    /// `testthreshold`.
    #[instrument(skip_all, fields(fold = %self.config.fold))]
    pub fn train<F>(&self, on_progress: F) -> Result<RerankPredictions, PipelineError>
    where
        F: FnMut(TrainingProgress),
    {
        let fold_name = self.config.fold.as_str();
        let fold = self.current_fold()?;
        let fold_dir = self.layout.fold_dir(fold_name)?;
        let relevance_level = self.benchmark.relevance_level;

        let best_search_run = self.first_stage_run()?;
        let extractor = self.build_extractor(&best_search_run)?;
        let mut model = self.build_model(&extractor);

        let train_run = best_search_run.restrict(fold.qids(Split::Train));
        let dev_run = run::truncate(&best_search_run, fold.qids(Split::Dev), self.config.threshold);

        let sampler = sampler_from_config(&self.config.sampler);
        let train_data = sampler.prepare(&train_run, &self.benchmark.qrels, &extractor, relevance_level)?;
        let dev_data = PredSampler.prepare(&dev_run, &extractor)?;
        let dev_qrels = self.benchmark.qrels.for_queries(fold.qids(Split::Dev));
        let dev_dir = self.layout.pred_dir(fold_name, Split::Dev)?;

        let trainer = Trainer::new(self.config.trainer.clone());
        let dev = ValidationSet {
            dataset: &dev_data,
            qrels: &dev_qrels,
            output: &dev_dir,
            metric: self.config.optimize,
            relevance_level,
        };
        let mut dev_preds = trainer.train(&mut model, &train_data, &fold_dir, &dev, on_progress)?;

        trainer.load_best_model(&mut model, &fold_dir)?;
        let dev_best = self.layout.predictions(fold_name, Split::Dev)?;
        if !dev_best.exists() {
            dev_preds = trainer.predict(&model, &dev_data, &dev_best)?;
        }

        let test_run = run::truncate(&best_search_run, fold.qids(Split::Test), self.config.testthreshold);
        let test_data = PredSampler.prepare(&test_run, &extractor)?;
        let test_preds = trainer.predict(&model, &test_data, &self.layout.predictions(fold_name, Split::Test)?)?;

        let train_preds = if self.config.include_train {
            let train_pred_data = PredSampler.prepare(&train_run, &extractor)?;
            let path = self.layout.predictions(fold_name, Split::Train)?;
            Some(trainer.predict(&model, &train_pred_data, &path)?)
        } else {
            None
        };

        info!(
            "Fold {} predictions written: {} dev queries, {} test queries",
            fold_name,
            dev_preds.len(),
            test_preds.len()
        );
        Ok(RerankPredictions {
            dev: dev_preds,
            test: test_preds,
            train: train_preds,
        })
    }

    /// Rescores the fold's test queries with the saved best checkpoint.
    ///
    /// # Errors
    ///
    /// `CheckpointNotFound` if the fold was never trained.
    #[instrument(skip_all, fields(fold = %self.config.fold, split = "test"))]
    pub fn predict(&self) -> Result<Run, PipelineError> {
        let fold_name = self.config.fold.as_str();
        let fold = self.current_fold()?;
        let fold_dir = self.layout.fold_dir(fold_name)?;

        let best_search_run = self.first_stage_run()?;
        let extractor = self.build_extractor(&best_search_run)?;
        let mut model = self.build_model(&extractor);
        let trainer = Trainer::new(self.config.trainer.clone());
        trainer.load_best_model(&mut model, &fold_dir)?;

        let test_run = run::truncate(&best_search_run, fold.qids(Split::Test), self.config.testthreshold);
        let test_data = PredSampler.prepare(&test_run, &extractor)?;
        trainer.predict(&model, &test_data, &self.layout.predictions(fold_name, Split::Test)?)
    }

    /// `train` followed by `evaluate`.
    pub fn traineval<F>(&self, on_progress: F) -> Result<EvaluationReport, PipelineError>
    where
        F: FnMut(TrainingProgress),
    {
        self.train(on_progress)?;
        self.evaluate()
    }

    /// Dev and test predictions of every fold that has both on disk.
    pub fn find_crossvalidated_results(&self) -> Result<BTreeMap<String, FoldPredictions>, PipelineError> {
        let mut found = BTreeMap::new();
        for fold in self.benchmark.folds.names() {
            let test_path = self.layout.predictions(fold, Split::Test)?;
            if !test_path.exists() {
                continue;
            }
            let dev_path = self.layout.predictions(fold, Split::Dev)?;
            if !dev_path.exists() {
                warn!("Fold {} has test predictions but none for dev at {}", fold, dev_path.display());
                continue;
            }
            found.insert(
                fold.to_string(),
                FoldPredictions {
                    dev: run::load(&dev_path)?,
                    test: run::load(&test_path)?,
                },
            );
        }
        Ok(found)
    }

    /// Scores the persisted predictions.
    ///
    /// Always reports this fold's dev and test metrics. Pooled
    /// cross-validated and interpolated metrics are added only when every
    /// fold has predictions.
    ///
    /// # Errors
    ///
    /// `MissingPredictions` naming the split and path if this fold has not
    /// been trained.
    #[instrument(skip_all, fields(fold = %self.config.fold))]
    pub fn evaluate(&self) -> Result<EvaluationReport, PipelineError> {
        let fold_name = self.config.fold.as_str();
        let fold = self.current_fold()?;
        let metrics = self.config.evaluation_metrics();

        for split in [Split::Dev, Split::Test] {
            let path = self.layout.predictions(fold_name, split)?;
            if !path.exists() {
                error!("Could not find {} predictions at {}; run the train command first", split, path.display());
                return Err(PipelineError::MissingPredictions {
                    fold: fold_name.to_string(),
                    split,
                    path,
                });
            }
        }

        let reranker_runs = self.find_crossvalidated_results()?;
        let Some(current) = reranker_runs.get(fold_name) else {
            return Err(PipelineError::MissingPredictions {
                fold: fold_name.to_string(),
                split: Split::Test,
                path: self.layout.predictions(fold_name, Split::Test)?,
            });
        };

        let dev_qrels = self.benchmark.qrels.for_queries(fold.qids(Split::Dev));
        let fold_dev_metrics = self.benchmark.evaluate(&current.dev, Some(&dev_qrels), &metrics).means();
        info!("rerank: fold={} dev metrics: {}", fold_name, format_means(&fold_dev_metrics));

        let test_qrels = self.benchmark.qrels.for_queries(fold.qids(Split::Test));
        let fold_test_metrics = self.benchmark.evaluate(&current.test, Some(&test_qrels), &metrics).means();
        info!("rerank: fold={} test metrics: {}", fold_name, format_means(&fold_test_metrics));

        let coverage = FoldCoverage {
            available: reranker_runs.len(),
            total: self.benchmark.folds.len(),
        };
        if !coverage.is_complete() {
            info!(
                "rerank: skipping cross-validated metrics because results exist for only {} folds",
                coverage
            );
            return Ok(EvaluationReport {
                fold: fold_name.to_string(),
                fold_dev_metrics,
                fold_test_metrics,
                cv_metrics: None,
                interpolated: None,
                coverage,
            });
        }

        let mut pooled = Run::new();
        for predictions in reranker_runs.values() {
            pooled.merge(&predictions.test);
        }
        let all_test_qrels = self.benchmark.qrels.for_queries(&self.benchmark.folds.all_test_qids());
        let cv_metrics = self.benchmark.evaluate(&pooled, Some(&all_test_qrels), &metrics).means();
        info!(
            "rerank: cross-validated metrics choosing checkpoints by {}: {}",
            self.config.optimize,
            format_means(&cv_metrics)
        );

        let first_stage = self.first_stage.evaluate(&self.benchmark, self.config.optimize)?;
        let mut searcher_runs = BTreeMap::new();
        for name in self.benchmark.folds.names() {
            searcher_runs.insert(name.to_string(), run::load(first_stage.path(name)?)?);
        }
        let interpolated = interpolated_eval(
            &searcher_runs,
            &reranker_runs,
            &self.benchmark,
            self.config.optimize,
            &metrics,
            self.config.interpolation.step,
        )?;

        Ok(EvaluationReport {
            fold: fold_name.to_string(),
            fold_dev_metrics,
            fold_test_metrics,
            cv_metrics: Some(cv_metrics),
            interpolated: Some(interpolated),
            coverage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::RunFileSearcher;
    use crate::testing::{inverted_run, tiny_benchmark};
    use tempfile::TempDir;

    fn task(dir: &TempDir, fold: &str) -> RerankTask {
        let first_stage_path = dir.path().join("first.run");
        run::save(&inverted_run(), &first_stage_path).unwrap();
        let config = RerankConfig {
            fold: fold.to_string(),
            ..RerankConfig::default()
        };
        RerankTask::new(
            config,
            Arc::new(tiny_benchmark()),
            Arc::new(RunFileSearcher::new(vec![first_stage_path])),
            ResultsLayout::new(dir.path().join("results")),
        )
        .unwrap()
    }

    #[test]
    fn test_coverage_display() {
        let coverage = FoldCoverage { available: 1, total: 2 };
        assert_eq!(coverage.to_string(), "1/2");
        assert!(!coverage.is_complete());
        assert!(FoldCoverage { available: 2, total: 2 }.is_complete());
    }

    #[test]
    fn test_unknown_fold_rejected() {
        let dir = TempDir::new().unwrap();
        let err = task(&dir, "s1").for_fold("s7").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_evaluate_before_train_names_dev() {
        let dir = TempDir::new().unwrap();
        match task(&dir, "s2").evaluate() {
            Err(PipelineError::MissingPredictions { fold, split, path }) => {
                assert_eq!(fold, "s2");
                assert_eq!(split, Split::Dev);
                assert!(path.ends_with("fold-s2/pred/dev/best"));
            }
            other => panic!("expected MissingPredictions, got {other:?}"),
        }
    }

    #[test]
    fn test_predict_before_train_has_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let err = task(&dir, "s1").predict().unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointNotFound { .. }));
    }

    #[test]
    fn test_for_fold_keeps_layout() {
        let dir = TempDir::new().unwrap();
        let s1 = task(&dir, "s1");
        let s2 = s1.for_fold("s2").unwrap();
        assert_eq!(s2.fold(), "s2");
        assert_eq!(s2.layout(), s1.layout());
    }
}
