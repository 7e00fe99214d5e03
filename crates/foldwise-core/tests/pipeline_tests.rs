//! End-to-end tests of the rerank task.
//!
//! Every test builds a small benchmark on disk, uses a precomputed
//! first-stage run that ranks each query's non-relevant document first, and
//! drives the task through `train`, `evaluate` and `predict`.

use foldwise_core::benchmark::{Benchmark, InMemoryCollection};
use foldwise_core::cache::DiskCacheStore;
use foldwise_core::config::{RerankConfig, TrainerConfig};
use foldwise_core::evaluation::Metric;
use foldwise_core::folds::{Fold, Folds};
use foldwise_core::run::{self, Qrels, Run};
use foldwise_core::searcher::RunFileSearcher;
use foldwise_core::testing::{inverted_run, write_benchmark_dir, QUERIES};
use foldwise_core::{PipelineError, RerankTask, ResultsLayout, Split};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

// ============================================================================
// Fixtures
// ============================================================================

/// Formatted log output collected in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn quick_config(fold: &str) -> RerankConfig {
    RerankConfig {
        fold: fold.to_string(),
        trainer: TrainerConfig {
            niters: 3,
            itersize: 4,
            batch: 4,
            lr: 0.1,
            validatefreq: 1,
        },
        ..RerankConfig::default()
    }
}

struct Fixture {
    dir: TempDir,
    benchmark: Arc<Benchmark>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bench_dir = dir.path().join("benchmark");
        std::fs::create_dir_all(&bench_dir).unwrap();
        write_benchmark_dir(&bench_dir);
        std::fs::write(bench_dir.join("benchmark.json"), r#"{"name": "tiny"}"#).unwrap();
        run::save(&inverted_run(), &dir.path().join("first.run")).unwrap();
        let benchmark = Arc::new(Benchmark::load(&bench_dir).unwrap());
        Self { dir, benchmark }
    }

    fn task(&self, config: RerankConfig) -> RerankTask {
        RerankTask::new(
            config,
            self.benchmark.clone(),
            Arc::new(RunFileSearcher::new(vec![self.dir.path().join("first.run")])),
            ResultsLayout::new(self.dir.path().join("results")),
        )
        .unwrap()
    }
}

// ============================================================================
// Missing predictions
// ============================================================================

#[test]
fn test_evaluate_untrained_fold_is_missing_predictions() {
    let dir = TempDir::new().unwrap();
    let mut folds = BTreeMap::new();
    folds.insert("s1".to_string(), Fold::new(["q1"], ["q2"], ["q3"]));

    let qrels: Qrels = vec![("q2".to_string(), "d1".to_string(), 1)].into_iter().collect();
    let benchmark = Benchmark {
        name: "single".to_string(),
        query_type: "title".to_string(),
        relevance_level: 1,
        topics: [("q1", "a"), ("q2", "b"), ("q3", "c")]
            .iter()
            .map(|(q, t)| (q.to_string(), t.to_string()))
            .collect(),
        qrels,
        folds: Folds::new(folds).unwrap(),
        collection: Arc::new([("d1", "first"), ("d2", "second")].into_iter().collect::<InMemoryCollection>()),
    };

    let mut first = Run::new();
    first.insert("q2", "d1", 0.9);
    first.insert("q2", "d2", 0.1);
    let run_path = dir.path().join("first.run");
    run::save(&first, &run_path).unwrap();

    let task = RerankTask::new(
        RerankConfig::default(),
        Arc::new(benchmark),
        Arc::new(RunFileSearcher::new(vec![run_path])),
        ResultsLayout::new(dir.path().join("results")),
    )
    .unwrap();

    match task.evaluate() {
        Err(PipelineError::MissingPredictions { fold, split, path }) => {
            assert_eq!(fold, "s1");
            assert_eq!(split, Split::Dev);
            assert!(path.starts_with(dir.path().join("results")));
        }
        other => panic!("expected MissingPredictions, got {other:?}"),
    }
}

// ============================================================================
// Training and evaluation
// ============================================================================

#[test]
fn test_partial_folds_skip_cross_validation() {
    let fixture = Fixture::new();
    let task = fixture.task(quick_config("s1"));

    let report = task.traineval(|_| {}).unwrap();

    assert_eq!(report.fold, "s1");
    assert!(report.cv_metrics.is_none());
    assert!(report.interpolated.is_none());
    assert_eq!(report.coverage.to_string(), "1/2");
    assert!(report.fold_test_metrics.contains_key(&Metric::AveragePrecision));
}

#[test]
fn test_partial_folds_log_coverage() {
    let fixture = Fixture::new();
    let task = fixture.task(quick_config("s1"));
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::with_default(subscriber, || task.traineval(|_| {})).unwrap();

    assert!(
        logs.contents()
            .contains("skipping cross-validated metrics because results exist for only 1/2 folds"),
        "{}",
        logs.contents()
    );
}

#[test]
fn test_all_folds_pool_test_predictions() {
    let fixture = Fixture::new();
    let s1 = fixture.task(quick_config("s1"));
    let s2 = s1.for_fold("s2").unwrap();

    s1.train(|_| {}).unwrap();
    s2.train(|_| {}).unwrap();
    let report = s1.evaluate().unwrap();

    assert!(report.coverage.is_complete());
    // relevant documents repeat the query terms; the reranker undoes the
    // inverted first stage on every held-out query
    assert_eq!(report.fold_test_metrics[&Metric::AveragePrecision], 1.0);
    let cv = report.cv_metrics.expect("all folds trained");
    assert_eq!(cv[&Metric::AveragePrecision], 1.0);

    let interpolated = report.interpolated.expect("all folds trained");
    assert_eq!(interpolated.alphas.len(), 2);
    assert!(interpolated.alphas.values().all(|a| (0.0..=1.0).contains(a)));
    assert_eq!(interpolated.metrics[&Metric::AveragePrecision], 1.0);
}

#[test]
fn test_train_writes_fold_scoped_outputs() {
    let fixture = Fixture::new();
    let mut config = quick_config("s2");
    config.include_train = true;
    config.threshold = 1;
    let task = fixture.task(config);

    let preds = task.train(|_| {}).unwrap();
    let layout = task.layout();

    for split in Split::ALL {
        assert!(layout.predictions("s2", split).unwrap().exists(), "{split} predictions");
    }
    assert!(layout.checkpoint("s2").unwrap().exists());
    assert!(!layout.fold_dir("s1").unwrap().exists());

    // dev capped at threshold, test at testthreshold
    assert!(preds.dev.iter().all(|(_, docs)| docs.len() == 1));
    assert!(preds.test.iter().all(|(_, docs)| docs.len() == 2));
    assert_eq!(preds.train.unwrap().len(), 2);
    assert_eq!(
        run::load(&layout.predictions("s2", Split::Test).unwrap()).unwrap(),
        preds.test
    );
}

#[test]
fn test_progress_reported_per_iteration() {
    let fixture = Fixture::new();
    let task = fixture.task(quick_config("s1"));

    let mut seen = Vec::new();
    task.train(|p| seen.push(p.iterations_completed)).unwrap();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[test]
fn test_predict_uses_saved_checkpoint() {
    let fixture = Fixture::new();
    let task = fixture.task(quick_config("s1"));

    let trained = task.train(|_| {}).unwrap();
    let predicted = task.predict().unwrap();
    assert_eq!(predicted, trained.test);
}

#[test]
fn test_extractor_state_is_cached_on_disk() {
    let fixture = Fixture::new();
    let cache_root = fixture.dir.path().join("results").join("cache");
    let task = fixture
        .task(quick_config("s1"))
        .with_cache(Arc::new(DiskCacheStore::new(&cache_root)));

    task.train(|_| {}).unwrap();
    let entries = std::fs::read_dir(cache_root.join("bagofwords")).unwrap().count();
    assert_eq!(entries, 1);

    // same run and config: the second fold reuses the entry
    task.for_fold("s2").unwrap().train(|_| {}).unwrap();
    let entries = std::fs::read_dir(cache_root.join("bagofwords")).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn test_edited_corpus_invalidates_cached_state() {
    let fixture = Fixture::new();
    let cache_root = fixture.dir.path().join("results").join("cache");
    let cache = Arc::new(DiskCacheStore::new(&cache_root));
    fixture
        .task(quick_config("s1"))
        .with_cache(cache.clone())
        .train(|_| {})
        .unwrap();

    // same doc ids, one document rewritten
    let collection: InMemoryCollection = QUERIES
        .iter()
        .flat_map(|(qid, _, rel, non)| {
            let non = if *qid == "q5" { "hash map insert hash map insert" } else { *non };
            [(format!("{qid}-rel"), *rel), (format!("{qid}-non"), non)]
        })
        .collect();
    let mut edited = (*fixture.benchmark).clone();
    edited.collection = Arc::new(collection);
    RerankTask::new(
        quick_config("s1"),
        Arc::new(edited),
        Arc::new(RunFileSearcher::new(vec![fixture.dir.path().join("first.run")])),
        ResultsLayout::new(fixture.dir.path().join("edited")),
    )
    .unwrap()
    .with_cache(cache)
    .train(|_| {})
    .unwrap();

    let entries = std::fs::read_dir(cache_root.join("bagofwords")).unwrap().count();
    assert_eq!(entries, 2);
}
