//! Where a task keeps its outputs.
//!
//! ```text
//! <root>/
//! ├── cache/                      extractor state, content-addressed
//! ├── searcher/<benchmark>/       first-stage runs
//! └── fold-<name>/
//!     ├── weights/best.json       best checkpoint
//!     └── pred/<split>/
//!         ├── <iteration>         intermediate dev predictions
//!         └── best                predictions of the best checkpoint
//! ```
//!
//! Paths for another fold are built from its name, never by rewriting the
//! current fold's path, so fold names that are substrings of each other or
//! of the root cannot collide.

use crate::error::{ConfigurationError, Split};
use crate::folds::validate_fold_name;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsLayout {
    root: PathBuf,
}

impl ResultsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/fold-<name>`, also the trainer's output directory.
    pub fn fold_dir(&self, fold: &str) -> Result<PathBuf, ConfigurationError> {
        validate_fold_name(fold)?;
        Ok(self.root.join(format!("fold-{fold}")))
    }

    /// Directory of a split's prediction files.
    pub fn pred_dir(&self, fold: &str, split: Split) -> Result<PathBuf, ConfigurationError> {
        Ok(self.fold_dir(fold)?.join("pred").join(split.as_str()))
    }

    /// Predictions of the best checkpoint for a split.
    pub fn predictions(&self, fold: &str, split: Split) -> Result<PathBuf, ConfigurationError> {
        Ok(self.pred_dir(fold, split)?.join("best"))
    }

    pub fn checkpoint(&self, fold: &str) -> Result<PathBuf, ConfigurationError> {
        Ok(self.fold_dir(fold)?.join("weights").join("best.json"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn searcher_dir(&self) -> PathBuf {
        self.root.join("searcher")
    }
}
