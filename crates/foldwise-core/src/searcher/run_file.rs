//! First stage backed by precomputed run files.

use super::FirstStage;
use crate::benchmark::Benchmark;
use crate::error::{ConfigurationError, PipelineError};
use std::path::PathBuf;

/// Chooses among existing run files, e.g. several BM25 parameter settings.
#[derive(Debug, Clone)]
pub struct RunFileSearcher {
    paths: Vec<PathBuf>,
}

impl RunFileSearcher {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl FirstStage for RunFileSearcher {
    fn name(&self) -> &str {
        "runfile"
    }

    fn search(&self, _benchmark: &Benchmark) -> Result<Vec<PathBuf>, PipelineError> {
        if self.paths.is_empty() {
            return Err(ConfigurationError::Invalid("no run files given".to_string()).into());
        }
        for path in &self.paths {
            if !path.is_file() {
                return Err(PipelineError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "run file not found"),
                ));
            }
        }
        Ok(self.paths.clone())
    }
}
