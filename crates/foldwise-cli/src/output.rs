//! Output formatting for evaluation reports.
//!
//! Supports both human-readable terminal output and JSON for scripting.

use foldwise_core::evaluation::Metric;
use foldwise_core::{Benchmark, EvaluationReport, Split};
use serde::Serialize;
use std::collections::BTreeMap;

/// JSON summary of a benchmark
#[derive(Serialize)]
pub struct JsonBenchmark<'a> {
    pub name: &'a str,
    pub query_type: &'a str,
    pub relevance_level: i32,
    pub topics: usize,
    pub judged_queries: usize,
    pub judgments: usize,
    pub documents: usize,
    pub folds: Vec<JsonFold<'a>>,
}

/// Query counts of one fold
#[derive(Serialize)]
pub struct JsonFold<'a> {
    pub name: &'a str,
    pub train: usize,
    pub dev: usize,
    pub test: usize,
}

/// Formats evaluation reports as a JSON array.
pub fn format_json(reports: &[EvaluationReport]) -> String {
    serde_json::to_string_pretty(reports).unwrap_or_else(|_| "[]".to_string())
}

/// Formats evaluation reports for the terminal.
pub fn format_human(reports: &[EvaluationReport]) -> String {
    let mut output = String::new();
    for report in reports {
        output.push_str(&format!("Fold {} ({} folds with predictions)\n", report.fold, report.coverage));
        output.push_str(&metric_table(&[
            ("dev", Some(&report.fold_dev_metrics)),
            ("test", Some(&report.fold_test_metrics)),
            ("cv", report.cv_metrics.as_ref()),
            ("interp", report.interpolated.as_ref().map(|i| &i.metrics)),
        ]));

        match &report.interpolated {
            Some(interpolated) => {
                let alphas: Vec<String> = interpolated
                    .alphas
                    .iter()
                    .map(|(fold, alpha)| format!("{}={:.2}", fold, alpha))
                    .collect();
                output.push_str(&format!("   alphas: {}\n", alphas.join(", ")));
            }
            None if !report.coverage.is_complete() => {
                output.push_str("   cross-validated metrics need predictions for every fold\n");
            }
            None => {}
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}

/// One row per metric, one column per available result set.
fn metric_table(columns: &[(&str, Option<&BTreeMap<Metric, f64>>)]) -> String {
    let present: Vec<(&str, &BTreeMap<Metric, f64>)> = columns
        .iter()
        .filter_map(|(name, values)| values.map(|v| (*name, v)))
        .collect();
    let Some((_, first)) = present.first() else {
        return String::new();
    };

    let names: Vec<String> = first.keys().map(Metric::to_string).collect();
    let width = names.iter().map(String::len).max().unwrap_or(0).max(6);

    let mut table = format!("   {:<width$}", "metric");
    for (name, _) in &present {
        table.push_str(&format!(" {:>8}", name));
    }
    table.push('\n');

    for (metric, name) in first.keys().zip(&names) {
        table.push_str(&format!("   {:<width$}", name));
        for (_, values) in &present {
            match values.get(metric) {
                Some(v) => table.push_str(&format!(" {:>8.4}", v)),
                None => table.push_str(&format!(" {:>8}", "-")),
            }
        }
        table.push('\n');
    }
    table
}

fn benchmark_summary(benchmark: &Benchmark) -> JsonBenchmark<'_> {
    JsonBenchmark {
        name: &benchmark.name,
        query_type: &benchmark.query_type,
        relevance_level: benchmark.relevance_level,
        topics: benchmark.topics.len(),
        judged_queries: benchmark.qrels.len(),
        judgments: benchmark.qrels.num_judgments(),
        documents: benchmark.collection.len(),
        folds: benchmark
            .folds
            .iter()
            .map(|(name, fold)| JsonFold {
                name,
                train: fold.qids(Split::Train).len(),
                dev: fold.qids(Split::Dev).len(),
                test: fold.qids(Split::Test).len(),
            })
            .collect(),
    }
}

/// Formats a benchmark summary as JSON.
pub fn format_benchmark_json(benchmark: &Benchmark) -> String {
    serde_json::to_string_pretty(&benchmark_summary(benchmark)).unwrap_or_else(|_| "{}".to_string())
}

/// Formats a benchmark summary for the terminal.
pub fn format_benchmark_human(benchmark: &Benchmark) -> String {
    let summary = benchmark_summary(benchmark);
    let mut output = format!("Benchmark {} ({})\n", summary.name, summary.query_type);
    output.push_str(&format!(
        "   {} topics, {} judged queries, {} judgments, {} documents\n",
        summary.topics, summary.judged_queries, summary.judgments, summary.documents
    ));
    output.push_str(&format!("   relevance level: {}\n", summary.relevance_level));
    output.push_str(&format!("   {} folds:\n", summary.folds.len()));
    for fold in &summary.folds {
        output.push_str(&format!(
            "     {}: train {}, dev {}, test {}\n",
            fold.name, fold.train, fold.dev, fold.test
        ));
    }
    output.trim_end().to_string()
}
