//! Training loop, dev-set checkpoint selection and inference.
//!
//! ```text
//! Idle ──► Training ──► Evaluating dev ──► (best so far? save checkpoint)
//!              ▲               │
//!              └───────────────┘  until `niters` iterations are done
//! ```
//!
//! Every `validatefreq` iterations (and after the last one) the dev set is
//! scored, written to `<dev_output>/<iteration>` and evaluated. A strictly
//! better value replaces `<dev_output>/best` and the checkpoint at
//! `<train_output>/weights/best.json`. Both writes are atomic, so a crash
//! never leaves a half-written best checkpoint behind.

mod checkpoint;
mod progress;

pub use checkpoint::Checkpoint;
pub use progress::{ProgressTimer, TrainingProgress};

use crate::config::TrainerConfig;
use crate::error::PipelineError;
use crate::evaluation::{evaluate, Metric};
use crate::model::Reranker;
use crate::run::{self, Qrels, Run, ScoredDoc};
use crate::sampler::{PredDataset, TrainDataset};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Held-out data used to pick the best checkpoint.
pub struct ValidationSet<'d, 'a> {
    pub dataset: &'d PredDataset<'a>,
    pub qrels: &'d Qrels,
    /// Directory receiving `<iteration>` and `best` prediction files
    pub output: &'d Path,
    pub metric: Metric,
    pub relevance_level: i32,
}

/// Runs optimisation and inference for one fold.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Trains `model` and keeps the checkpoint that scores best on dev.
    ///
    /// # Arguments
    ///
    /// * `model` - Model to optimise; left holding the final iteration's weights
    /// * `train` - Training triplets
    /// * `train_output` - Directory receiving `weights/best.json`
    /// * `dev` - Validation data and where to write its predictions
    /// * `on_progress` - Called after every iteration
    ///
    /// # Returns
    ///
    /// Dev predictions of the best checkpoint.
    ///
    /// # Errors
    ///
    /// `EmptyTrainingSet` when no triplet can be produced, and any I/O error
    /// writing predictions or the checkpoint.
    #[instrument(skip_all, fields(model = model.name(), niters = self.config.niters, metric = %dev.metric))]
    pub fn train<F>(
        &self,
        model: &mut dyn Reranker,
        train: &TrainDataset<'_>,
        train_output: &Path,
        dev: &ValidationSet<'_, '_>,
        mut on_progress: F,
    ) -> Result<Run, PipelineError>
    where
        F: FnMut(TrainingProgress),
    {
        let timer = ProgressTimer::new();
        let niters = self.config.niters;
        let checkpoint_path = Checkpoint::best_path(train_output);
        let mut examples = train.iter();
        let mut examples_seen = 0usize;
        let mut best: Option<(f64, Run)> = None;

        info!(
            "Training on {} queries ({} unique triplets) for {} iterations",
            train.qids().count(),
            train.total_samples(),
            niters
        );
        on_progress(TrainingProgress::new(0, niters, 0, 0.0, timer.elapsed_ms()));

        for iteration in 1..=niters {
            let mut iteration_loss = 0.0;
            for _ in 0..self.config.itersize {
                let batch = (&mut examples)
                    .take(self.config.batch)
                    .collect::<Result<Vec<_>, _>>()?;
                if batch.is_empty() {
                    return Err(PipelineError::EmptyTrainingSet);
                }
                examples_seen += batch.len();
                iteration_loss += model.train_step(&batch, self.config.lr);
            }
            let mean_loss = iteration_loss / self.config.itersize.max(1) as f64;
            debug!("Iteration {} loss {:.4}", iteration, mean_loss);

            if iteration % self.config.validatefreq == 0 || iteration == niters {
                let preds = self.predict(model, dev.dataset, &dev.output.join(iteration.to_string()))?;
                let value = evaluate(&preds, dev.qrels, &[dev.metric], dev.relevance_level)
                    .mean(dev.metric)
                    .unwrap_or(0.0);
                info!("Iteration {} dev {}={:.4}", iteration, dev.metric, value);

                if best.as_ref().map_or(true, |(best_value, _)| value > *best_value) {
                    Checkpoint {
                        iteration,
                        metric: dev.metric,
                        value,
                        model: model.name().to_string(),
                        state: model.state()?,
                    }
                    .save(&checkpoint_path)?;
                    run::save(&preds, &dev.output.join("best"))?;
                    info!("New best dev {}={:.4} at iteration {}", dev.metric, value, iteration);
                    best = Some((value, preds));
                }
            }

            on_progress(TrainingProgress::new(
                iteration,
                niters,
                examples_seen,
                mean_loss,
                timer.elapsed_ms(),
            ));
        }

        best.map(|(_, preds)| preds)
            .ok_or_else(|| PipelineError::CheckpointNotFound { path: checkpoint_path })
    }

    /// Scores every example of `dataset` and saves the ranking to `output`.
    ///
    /// No gradient step is taken. Each query's documents are sorted by
    /// descending score, ties keeping their dataset order.
    #[instrument(skip_all, fields(pairs = dataset.len(), output = %output.display()))]
    pub fn predict(
        &self,
        model: &dyn Reranker,
        dataset: &PredDataset<'_>,
        output: &Path,
    ) -> Result<Run, PipelineError> {
        let mut scored = Run::new();
        let examples = dataset.iter().collect::<Result<Vec<_>, _>>()?;
        for chunk in examples.chunks(self.config.batch.max(1)) {
            let features: Vec<_> = chunk.iter().map(|e| e.features.clone()).collect();
            let scores = model.predict_batch(&features);
            for (example, score) in chunk.iter().zip(scores) {
                scored.push_unchecked(&example.qid, ScoredDoc::new(example.doc_id.clone(), score));
            }
        }
        let preds = scored.sorted();
        run::save(&preds, output)?;
        debug!("Wrote {} predictions to {}", preds.num_entries(), output.display());
        Ok(preds)
    }

    /// Restores the best checkpoint saved under `train_output`.
    ///
    /// # Errors
    ///
    /// `CheckpointNotFound` if training never completed an evaluation cycle.
    pub fn load_best_model(
        &self,
        model: &mut dyn Reranker,
        train_output: &Path,
    ) -> Result<Checkpoint, PipelineError> {
        let checkpoint = Checkpoint::load(&Checkpoint::best_path(train_output))?;
        model.load_state(&checkpoint.state)?;
        info!(
            "Loaded checkpoint from iteration {} ({}={:.4})",
            checkpoint.iteration, checkpoint.metric, checkpoint.value
        );
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BagOfWordsConfig;
    use crate::extractor::{BagOfWordsExtractor, Extractor};
    use crate::model::LinearReranker;
    use crate::sampler::{ExhaustiveSampler, PredSampler, Sampler};
    use crate::testing::{inverted_run, tiny_benchmark};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn small_config() -> TrainerConfig {
        TrainerConfig {
            niters: 4,
            itersize: 4,
            batch: 2,
            lr: 0.5,
            validatefreq: 2,
        }
    }

    fn preprocessed_extractor(run: &Run) -> BagOfWordsExtractor {
        let benchmark = tiny_benchmark();
        let mut extractor = BagOfWordsExtractor::new(BagOfWordsConfig::default(), benchmark.collection.clone());
        let qids: BTreeSet<String> = run.query_ids().map(String::from).collect();
        let docs: BTreeSet<String> = run.doc_ids().into_iter().map(String::from).collect();
        extractor.preprocess(&qids, &docs, &benchmark.topics).unwrap();
        extractor
    }

    fn split(run: &Run, qids: &[&str]) -> Run {
        run.restrict(&qids.iter().map(|q| q.to_string()).collect())
    }

    #[test]
    fn test_train_saves_best_checkpoint_and_predictions() {
        let dir = TempDir::new().unwrap();
        let benchmark = tiny_benchmark();
        let full = inverted_run();
        let extractor = preprocessed_extractor(&full);
        let train_run = split(&full, &["q1", "q2", "q3", "q4"]);
        let dev_run = split(&full, &["q5", "q6"]);

        let train = ExhaustiveSampler.prepare(&train_run, &benchmark.qrels, &extractor, 1).unwrap();
        let dev_data = PredSampler.prepare(&dev_run, &extractor).unwrap();
        let dev_qrels = benchmark.qrels.for_queries(&["q5".to_string(), "q6".to_string()]);
        let dev_output = dir.path().join("pred").join("dev");
        let dev = ValidationSet {
            dataset: &dev_data,
            qrels: &dev_qrels,
            output: &dev_output,
            metric: Metric::AveragePrecision,
            relevance_level: 1,
        };

        let trainer = Trainer::new(small_config());
        let mut model = LinearReranker::new(extractor.dim(), 1);
        let mut reports = Vec::new();
        let best = trainer
            .train(&mut model, &train, dir.path(), &dev, |p| reports.push(p))
            .unwrap();

        assert_eq!(reports.len(), 5);
        assert!(reports.last().unwrap().is_complete());
        assert!(dev_output.join("2").exists());
        assert!(dev_output.join("4").exists());
        assert!(!dev_output.join("1").exists());
        assert_eq!(run::load(&dev_output.join("best")).unwrap(), best);

        let checkpoint = Checkpoint::load(&Checkpoint::best_path(dir.path())).unwrap();
        assert!(checkpoint.iteration == 2 || checkpoint.iteration == 4);
        // The relevant documents repeat the query terms, so the reranker
        // recovers the order the first stage inverted.
        assert_eq!(checkpoint.value, 1.0);
        assert_eq!(best.get("q5").unwrap()[0].doc_id, "q5-rel");
    }

    #[test]
    fn test_train_without_triplets_fails() {
        let dir = TempDir::new().unwrap();
        let benchmark = tiny_benchmark();
        let mut only_relevant = Run::new();
        only_relevant.insert("q1", "q1-rel", 1.0);
        let extractor = preprocessed_extractor(&only_relevant);
        let train = ExhaustiveSampler
            .prepare(&only_relevant, &benchmark.qrels, &extractor, 1)
            .unwrap();
        let dev_data = PredSampler.prepare(&only_relevant, &extractor).unwrap();
        let dev = ValidationSet {
            dataset: &dev_data,
            qrels: &benchmark.qrels,
            output: dir.path(),
            metric: Metric::AveragePrecision,
            relevance_level: 1,
        };

        let mut model = LinearReranker::new(extractor.dim(), 1);
        let err = Trainer::new(small_config())
            .train(&mut model, &train, dir.path(), &dev, |_| {})
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTrainingSet));
    }

    #[test]
    fn test_dev_queries_without_qrels_do_not_fail() {
        let dir = TempDir::new().unwrap();
        let benchmark = tiny_benchmark();
        let full = inverted_run();
        let mut dev_run = split(&full, &["q5"]);
        dev_run.insert("unjudged", "q6-rel", 1.0);
        let mut topics_run = full.clone();
        topics_run.merge(&dev_run);

        let collection = benchmark.collection.clone();
        let mut topics = benchmark.topics.clone();
        topics.insert("unjudged".to_string(), "thread pool".to_string());
        let mut extractor = BagOfWordsExtractor::new(BagOfWordsConfig::default(), collection);
        let qids: BTreeSet<String> = topics_run.query_ids().map(String::from).collect();
        let docs: BTreeSet<String> = topics_run.doc_ids().into_iter().map(String::from).collect();
        extractor.preprocess(&qids, &docs, &topics).unwrap();

        let train_run = split(&full, &["q1", "q2"]);
        let train = ExhaustiveSampler.prepare(&train_run, &benchmark.qrels, &extractor, 1).unwrap();
        let dev_data = PredSampler.prepare(&dev_run, &extractor).unwrap();
        let dev_qrels = benchmark.qrels.for_queries(&["q5".to_string(), "unjudged".to_string()]);
        let dev = ValidationSet {
            dataset: &dev_data,
            qrels: &dev_qrels,
            output: dir.path(),
            metric: Metric::NdcgCut(10),
            relevance_level: 1,
        };

        let mut model = LinearReranker::new(extractor.dim(), 1);
        let best = Trainer::new(small_config())
            .train(&mut model, &train, dir.path(), &dev, |_| {})
            .unwrap();
        assert!(best.contains_query("unjudged"));
    }

    #[test]
    fn test_predict_sorts_and_saves() {
        let dir = TempDir::new().unwrap();
        let full = inverted_run();
        let extractor = preprocessed_extractor(&full);
        let data = PredSampler.prepare(&full, &extractor).unwrap();

        // bias-only model scores every document the same
        let model = LinearReranker::from_weights(vec![0.0, 0.0, 0.0, 0.0, 1.0]);
        let output = dir.path().join("pred").join("test").join("best");
        let preds = Trainer::new(small_config()).predict(&model, &data, &output).unwrap();

        assert_eq!(preds.num_entries(), full.num_entries());
        // ties keep dataset order
        assert_eq!(preds.get("q1").unwrap()[0].doc_id, "q1-non");
        assert_eq!(run::load(&output).unwrap(), preds);
    }

    #[test]
    fn test_load_best_model() {
        let dir = TempDir::new().unwrap();
        let trainer = Trainer::new(small_config());
        let mut model = LinearReranker::new(5, 1);

        let err = trainer.load_best_model(&mut model, dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointNotFound { .. }));

        let saved = LinearReranker::from_weights(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        Checkpoint {
            iteration: 1,
            metric: Metric::AveragePrecision,
            value: 0.5,
            model: "linear".to_string(),
            state: saved.state().unwrap(),
        }
        .save(&Checkpoint::best_path(dir.path()))
        .unwrap();

        let checkpoint = trainer.load_best_model(&mut model, dir.path()).unwrap();
        assert_eq!(checkpoint.iteration, 1);
        assert_eq!(model.weights(), saved.weights());
    }
}
