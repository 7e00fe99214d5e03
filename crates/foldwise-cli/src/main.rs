//! Foldwise CLI - cross-validated reranking experiments.
//!
//! # Usage
//!
//! ```bash
//! # Train and evaluate one fold over BM25 candidates
//! foldwise traineval --benchmark data/robust04 --fold s1
//!
//! # Every fold, precomputed first-stage runs, JSON report
//! foldwise traineval --benchmark data/robust04 --run runs/a.run --run runs/b.run --all-folds --json
//!
//! # Re-evaluate saved predictions
//! foldwise evaluate --benchmark data/robust04 --all-folds
//!
//! # Show benchmark statistics
//! foldwise describe --benchmark data/robust04
//! ```

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::TaskOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Foldwise rerank CLI.
///
/// Trains a reranker per fold over first-stage candidates and reports
/// per-fold, cross-validated and interpolated metrics.
#[derive(Parser)]
#[command(name = "foldwise", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Train the reranker and write dev/test predictions
    Train(TaskArgs),
    /// Rescore test queries with the best saved checkpoint
    Predict(TaskArgs),
    /// Evaluate saved predictions
    Evaluate(TaskArgs),
    /// Train, then evaluate
    Traineval(TaskArgs),
    /// Print benchmark statistics
    Describe {
        /// Benchmark directory
        #[arg(short, long)]
        benchmark: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct TaskArgs {
    /// Benchmark directory (topics.tsv, qrels.txt, folds.json, corpus.jsonl)
    #[arg(short, long)]
    benchmark: PathBuf,

    /// Precomputed first-stage run file; repeat to pick the best per fold.
    /// Defaults to BM25 over the benchmark collection.
    #[arg(short, long = "run")]
    runs: Vec<PathBuf>,

    /// JSON task config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fold to run
    #[arg(short, long)]
    fold: Option<String>,

    /// Run every fold of the benchmark
    #[arg(long, conflicts_with = "fold")]
    all_folds: bool,

    /// Metric optimised on dev, e.g. map or P_20
    #[arg(long)]
    optimize: Option<String>,

    /// Metrics to report, comma separated
    #[arg(long, value_delimiter = ',')]
    metrics: Vec<String>,

    /// Documents per dev query passed to the reranker
    #[arg(long)]
    threshold: Option<usize>,

    /// Documents per test query passed to the reranker
    #[arg(long)]
    testthreshold: Option<usize>,

    /// Also write predictions for training queries
    #[arg(long)]
    include_train: bool,

    /// Results directory (default: platform standard location)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Do not cache extractor state on disk
    #[arg(long)]
    no_cache: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,
}

impl TaskArgs {
    fn options(&self, verbose: bool) -> TaskOptions {
        TaskOptions {
            benchmark_dir: self.benchmark.clone(),
            runs: self.runs.clone(),
            config_file: self.config.clone(),
            results_dir: self.results_dir.clone(),
            overrides: config::Overrides {
                fold: self.fold.clone(),
                optimize: self.optimize.clone(),
                metrics: self.metrics.clone(),
                threshold: self.threshold,
                testthreshold: self.testthreshold,
                include_train: self.include_train,
            },
            all_folds: self.all_folds,
            no_cache: self.no_cache,
            // progress bars would interleave with log lines
            quiet: verbose || self.json,
        }
    }

    fn print_reports(&self, reports: &[foldwise_core::EvaluationReport]) {
        let output = if self.json {
            output::format_json(reports)
        } else {
            output::format_human(reports)
        };
        println!("{}", output);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Train(args) => {
            let preds = commands::train(&args.options(cli.verbose))?;
            let folds = preds.len();
            eprintln!("Trained {} fold{}", folds, if folds == 1 { "" } else { "s" });
        }
        Command::Predict(args) => {
            let queries = commands::predict(&args.options(cli.verbose))?;
            eprintln!("Wrote test predictions for {} queries", queries);
        }
        Command::Evaluate(args) => {
            let reports = commands::evaluate(&args.options(cli.verbose))?;
            args.print_reports(&reports);
        }
        Command::Traineval(args) => {
            let reports = commands::traineval(&args.options(cli.verbose))?;
            args.print_reports(&reports);
        }
        Command::Describe { benchmark, json } => {
            let benchmark = commands::load_benchmark(benchmark)?;
            let output = if *json {
                output::format_benchmark_json(&benchmark)
            } else {
                output::format_benchmark_human(&benchmark)
            };
            println!("{}", output);
        }
    }

    Ok(())
}
