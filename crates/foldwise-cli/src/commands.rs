//! Command implementations.
//!
//! Builds a [`RerankTask`] from command-line arguments and runs it over one
//! fold or every fold of the benchmark.

use crate::config::{self, Overrides};
use anyhow::{anyhow, Context, Result};
use foldwise_core::cache::DiskCacheStore;
use foldwise_core::pipeline::RerankPredictions;
use foldwise_core::searcher::{Bm25Searcher, FirstStage, RunFileSearcher, DEFAULT_HITS};
use foldwise_core::trainer::TrainingProgress;
use foldwise_core::{Benchmark, EvaluationReport, RerankTask, ResultsLayout};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Options shared by every task command.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub benchmark_dir: PathBuf,
    pub runs: Vec<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    pub overrides: Overrides,
    pub all_folds: bool,
    pub no_cache: bool,
    pub quiet: bool,
}

/// Loads the benchmark and builds the task for the configured fold.
///
/// Results go to `<results_dir>/<benchmark name>/`. Without `--run` files the
/// first stage is BM25 over the benchmark collection.
pub fn build_task(options: &TaskOptions) -> Result<RerankTask> {
    let config = config::resolve_config(options.config_file.as_deref(), &options.overrides)?;
    let benchmark = load_benchmark(&options.benchmark_dir)?;

    let results_dir = config::get_results_dir(options.results_dir.as_ref())?;
    let layout = ResultsLayout::new(results_dir.join(&benchmark.name));
    info!("Writing results under {}", layout.root().display());

    let first_stage: Arc<dyn FirstStage> = if options.runs.is_empty() {
        Arc::new(Bm25Searcher::new(layout.searcher_dir(), DEFAULT_HITS))
    } else {
        Arc::new(RunFileSearcher::new(options.runs.clone()))
    };
    let cache_dir = layout.cache_dir();

    let task = RerankTask::new(config, Arc::new(benchmark), first_stage, layout)?;
    if options.no_cache {
        Ok(task)
    } else {
        Ok(task.with_cache(Arc::new(DiskCacheStore::new(cache_dir))))
    }
}

/// Loads a benchmark directory with context on failure.
pub fn load_benchmark(dir: &Path) -> Result<Benchmark> {
    if !dir.is_dir() {
        return Err(anyhow!("Benchmark directory not found: {}", dir.display()));
    }
    Benchmark::load(dir).with_context(|| format!("Failed to load benchmark: {}", dir.display()))
}

/// Tasks to run: the configured fold, or every fold with `--all-folds`.
fn tasks(options: &TaskOptions) -> Result<Vec<RerankTask>> {
    let task = build_task(options)?;
    if !options.all_folds {
        return Ok(vec![task]);
    }
    let names: Vec<String> = task.benchmark().folds.names().map(str::to_string).collect();
    names
        .iter()
        .map(|name| task.for_fold(name).map_err(anyhow::Error::from))
        .collect()
}

fn progress_bar(fold: &str, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("{msg} [{bar:40}] {pos}/{len} iterations")?);
    pb.set_message(format!("Training fold {}", fold));
    Ok(pb)
}

fn update_bar(pb: &ProgressBar, progress: &TrainingProgress) {
    pb.set_length(progress.iterations_total as u64);
    pb.set_position(progress.iterations_completed as u64);
    if progress.iterations_completed > 0 {
        pb.set_message(format!("loss {:.4}", progress.last_loss));
    }
}

/// Trains every selected fold and writes its predictions.
pub fn train(options: &TaskOptions) -> Result<Vec<RerankPredictions>> {
    let mut out = Vec::new();
    for task in tasks(options)? {
        let pb = progress_bar(task.fold(), options.quiet)?;
        let preds = task
            .train(|progress| update_bar(&pb, &progress))
            .with_context(|| format!("Training fold {} failed", task.fold()))?;
        pb.finish_and_clear();
        info!(
            "Fold {}: {} dev and {} test queries reranked",
            task.fold(),
            preds.dev.len(),
            preds.test.len()
        );
        out.push(preds);
    }
    Ok(out)
}

/// Rescores the test queries of every selected fold with its saved checkpoint.
pub fn predict(options: &TaskOptions) -> Result<usize> {
    let mut queries = 0;
    for task in tasks(options)? {
        let preds = task
            .predict()
            .with_context(|| format!("Prediction for fold {} failed", task.fold()))?;
        queries += preds.len();
    }
    Ok(queries)
}

/// Evaluates the saved predictions of every selected fold.
pub fn evaluate(options: &TaskOptions) -> Result<Vec<EvaluationReport>> {
    tasks(options)?
        .iter()
        .map(|task| {
            task.evaluate()
                .with_context(|| format!("Evaluation of fold {} failed", task.fold()))
        })
        .collect()
}

/// Trains then evaluates. With `--all-folds` every fold is trained before
/// any is evaluated, so the reports include cross-validated metrics.
pub fn traineval(options: &TaskOptions) -> Result<Vec<EvaluationReport>> {
    train(options)?;
    evaluate(options)
}
