//! The persisted best checkpoint.

use crate::cache::write_atomic;
use crate::error::PipelineError;
use crate::evaluation::Metric;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Model state at the iteration with the best dev metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub iteration: usize,
    pub metric: Metric,
    pub value: f64,
    pub model: String,
    pub state: serde_json::Value,
}

impl Checkpoint {
    /// `<train_output>/weights/best.json`
    pub fn best_path(train_output: &Path) -> PathBuf {
        train_output.join("weights").join("best.json")
    }

    /// Writes the checkpoint atomically, replacing any previous one.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)
    }

    /// # Errors
    ///
    /// `CheckpointNotFound` if nothing was ever saved at `path`.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::CheckpointNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}
