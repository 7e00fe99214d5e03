//! Configuration and path resolution for the CLI.
//!
//! The task config is built in three layers: defaults, an optional JSON
//! file, then command-line flags.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use foldwise_core::config::RerankConfig;
use foldwise_core::evaluation::{parse_metrics, Metric};
use std::path::{Path, PathBuf};

/// Environment variable for a custom results directory
const RESULTS_DIR_ENV: &str = "FOLDWISE_RESULTS_DIR";

/// Flag values that override the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub fold: Option<String>,
    pub optimize: Option<String>,
    pub metrics: Vec<String>,
    pub threshold: Option<usize>,
    pub testthreshold: Option<usize>,
    pub include_train: bool,
}

/// Returns the results directory.
///
/// Search order:
/// 1. `--results-dir`
/// 2. `$FOLDWISE_RESULTS_DIR`
/// 3. Platform data directory, e.g. `~/.local/share/foldwise/results` on Linux
pub fn get_results_dir(custom_dir: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = custom_dir {
        return Ok(dir.clone());
    }
    if let Ok(dir) = std::env::var(RESULTS_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    ProjectDirs::from("dev", "foldwise", "foldwise")
        .map(|dirs| dirs.data_dir().join("results"))
        .ok_or_else(|| anyhow!("Could not determine results directory; pass --results-dir"))
}

/// Reads a JSON config file. Missing fields keep their defaults.
pub fn load_config_file(path: &Path) -> Result<RerankConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Builds the task config from an optional file and flag overrides.
pub fn resolve_config(file: Option<&Path>, overrides: &Overrides) -> Result<RerankConfig> {
    let mut config = match file {
        Some(path) => load_config_file(path)?,
        None => RerankConfig::default(),
    };

    if let Some(fold) = &overrides.fold {
        config.fold = fold.clone();
    }
    if let Some(optimize) = &overrides.optimize {
        config.optimize = optimize.parse::<Metric>()?;
    }
    if !overrides.metrics.is_empty() {
        config.metrics = parse_metrics(&overrides.metrics)?;
    }
    if let Some(threshold) = overrides.threshold {
        config.threshold = threshold;
    }
    if let Some(testthreshold) = overrides.testthreshold {
        config.testthreshold = testthreshold;
    }
    config.include_train |= overrides.include_train;

    config.validate()?;
    Ok(config)
}
