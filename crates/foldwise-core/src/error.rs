//! Error types for foldwise-core.
//!
//! Parse and configuration errors abort immediately. Sparsity problems
//! (queries without positives or negatives) are not errors at all; they are
//! logged and skipped by the sampler.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which slice of a fold a set of queries or predictions belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    /// All splits in pipeline order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Dev, Split::Test];

    /// Directory/key name for this split.
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A malformed line in a run, qrels, topics or folds file.
#[derive(Debug, Clone, Error)]
#[error("{}:{line}: {message}", path.display())]
pub struct ParseError {
    /// File being parsed
    pub path: PathBuf,
    /// 1-based line number (0 when the whole file is malformed)
    pub line: usize,
    /// What was wrong with the line
    pub message: String,
}

impl ParseError {
    pub fn new(path: &Path, line: usize, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }
}

/// Invalid experiment configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Requested fold is not defined by the benchmark
    #[error("Unknown fold '{fold}' (available: {available})")]
    UnknownFold { fold: String, available: String },
    /// Metric name could not be parsed
    #[error("Unknown metric '{0}'")]
    UnknownMetric(String),
    /// Fold names become path segments, so they must be plain names
    #[error("Invalid fold name '{0}': must be non-empty and contain no path separators")]
    InvalidFoldName(String),
    /// A query id appears in both train and test of one fold
    #[error("Fold '{fold}' has {count} query ids in both train and test (e.g. '{example}')")]
    OverlappingSplits {
        fold: String,
        count: usize,
        example: String,
    },
    /// Any other invalid setting
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the rerank pipeline and its components.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The current fold has no persisted predictions
    #[error(
        "Missing {split} predictions for fold '{fold}' at {}; run the train command first",
        path.display()
    )]
    MissingPredictions {
        fold: String,
        split: Split,
        path: PathBuf,
    },

    /// Prediction was requested before any evaluation cycle saved a checkpoint
    #[error("No best checkpoint at {}; training never completed an evaluation cycle", path.display())]
    CheckpointNotFound { path: PathBuf },

    /// The extractor has no features for a document
    #[error("No features for document '{doc_id}'")]
    MissingDocument { doc_id: String },

    /// The extractor has no text for a query
    #[error("No topic text for query '{qid}'")]
    MissingQuery { qid: String },

    /// No query has both a positive and a negative document
    #[error("Training dataset has no query with both relevant and non-relevant documents")]
    EmptyTrainingSet,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
