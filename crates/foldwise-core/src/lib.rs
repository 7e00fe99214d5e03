//! # Foldwise Core
//!
//! Cross-validated rerank-and-evaluate pipeline for retrieval experiments.
//!
//! A benchmark's queries are split into folds. For each fold a first-stage
//! run is chosen, its train queries are turned into training triplets, a
//! reranker is trained with dev-set checkpoint selection, and the best
//! checkpoint rescores dev and test. Evaluation pools test predictions of
//! every fold and also reports a first-stage/reranker interpolation tuned
//! on dev.
//!
//! ## Modules
//!
//! - [`run`] - Runs, qrels and the TREC run file format
//! - [`folds`] - Train/dev/test partitions of query ids
//! - [`benchmark`] - Topics, judgments, folds and document collection
//! - [`searcher`] - First-stage retrieval (BM25, precomputed run files)
//! - [`extractor`] - Query/document feature extraction
//! - [`cache`] - Content-addressed cache for extractor state
//! - [`sampler`] - Training triplets and prediction datasets
//! - [`model`] - Reranking models
//! - [`trainer`] - Training loop, checkpointing and inference
//! - [`evaluation`] - Retrieval metrics and score interpolation
//! - [`pipeline`] - The per-fold rerank task
//! - [`config`] - Experiment configuration and defaults
//! - [`error`] - Error types

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod extractor;
pub mod folds;
pub mod model;
pub mod pipeline;
pub mod run;
pub mod sampler;
pub mod searcher;
pub mod trainer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use benchmark::Benchmark;
pub use error::{ConfigurationError, ParseError, PipelineError, Split};
pub use pipeline::{EvaluationReport, RerankTask, ResultsLayout};
pub use run::{Qrels, Run};
