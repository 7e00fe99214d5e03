//! Shared test fixtures.
//!
//! Six queries, each with one relevant document that repeats the query
//! terms and one judged non-relevant document sharing a single query term,
//! split into two folds. Compiled for this crate's unit tests and, behind
//! the `test-support` feature, for integration tests and the CLI.

use crate::benchmark::{Benchmark, InMemoryCollection};
use crate::folds::{Fold, Folds};
use crate::run::{Qrels, Run};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// (qid, query text, relevant text, non-relevant text)
///
/// Every non-relevant document shares one term with its query, so a lexical
/// first stage retrieves both documents of each query.
pub const QUERIES: [(&str, &str, &str, &str); 6] = [
    ("q1", "sort list ascending", "sort a list in ascending order", "sort laundry before washing"),
    ("q2", "parse json string", "parse a json string into a value", "parse the old tax form"),
    ("q3", "read file lines", "read a file line by line lines", "read a novel at noon"),
    ("q4", "http request timeout", "set a timeout on an http request", "request a window seat"),
    ("q5", "hash map insert", "insert a key into a hash map", "map of the city center"),
    ("q6", "thread pool spawn", "spawn work on a thread pool", "bake yeast bread by the pool"),
];

/// s1 trains on q1,q2, tunes on q3,q4, tests on q5,q6; s2 rotates.
pub fn tiny_folds() -> Folds {
    let mut map = BTreeMap::new();
    map.insert("s1".to_string(), Fold::new(["q1", "q2"], ["q3", "q4"], ["q5", "q6"]));
    map.insert("s2".to_string(), Fold::new(["q5", "q6"], ["q1", "q2"], ["q3", "q4"]));
    Folds::new(map).expect("fixture folds are valid")
}

pub fn tiny_qrels() -> Qrels {
    QUERIES
        .iter()
        .flat_map(|(qid, ..)| {
            [
                (qid.to_string(), format!("{qid}-rel"), 1),
                (qid.to_string(), format!("{qid}-non"), 0),
            ]
        })
        .collect()
}

pub fn tiny_benchmark() -> Benchmark {
    let topics = QUERIES
        .iter()
        .map(|(qid, text, ..)| (qid.to_string(), text.to_string()))
        .collect();
    let collection: InMemoryCollection = QUERIES
        .iter()
        .flat_map(|(qid, _, rel, non)| [(format!("{qid}-rel"), *rel), (format!("{qid}-non"), *non)])
        .collect();

    Benchmark {
        name: "tiny".to_string(),
        query_type: "title".to_string(),
        relevance_level: 1,
        topics,
        qrels: tiny_qrels(),
        folds: tiny_folds(),
        collection: Arc::new(collection),
    }
}

/// A first-stage run that ranks the non-relevant document first.
pub fn inverted_run() -> Run {
    let mut run = Run::new();
    for (qid, ..) in QUERIES {
        run.insert(qid, format!("{qid}-non"), 2.0);
        run.insert(qid, format!("{qid}-rel"), 1.0);
    }
    run
}

/// Writes the fixture as a benchmark directory, without `benchmark.json`.
pub fn write_benchmark_dir(dir: &Path) {
    let topics: String = QUERIES
        .iter()
        .map(|(qid, text, ..)| format!("{qid}\t{text}\n"))
        .collect();
    std::fs::write(dir.join("topics.tsv"), topics).unwrap();

    let qrels: String = QUERIES
        .iter()
        .map(|(qid, ..)| format!("{qid} 0 {qid}-rel 1\n{qid} 0 {qid}-non 0\n"))
        .collect();
    std::fs::write(dir.join("qrels.txt"), qrels).unwrap();

    std::fs::write(
        dir.join("folds.json"),
        r#"{
            "s1": {"train_qids": ["q1", "q2"], "predict": {"dev": ["q3", "q4"], "test": ["q5", "q6"]}},
            "s2": {"train_qids": ["q5", "q6"], "predict": {"dev": ["q1", "q2"], "test": ["q3", "q4"]}}
        }"#,
    )
    .unwrap();

    let corpus: String = QUERIES
        .iter()
        .flat_map(|(qid, _, rel, non)| {
            [
                serde_json::json!({"doc_id": format!("{qid}-rel"), "text": rel}),
                serde_json::json!({"doc_id": format!("{qid}-non"), "text": non}),
            ]
        })
        .map(|v| format!("{v}\n"))
        .collect();
    std::fs::write(dir.join("corpus.jsonl"), corpus).unwrap();
}
