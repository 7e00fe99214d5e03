//! Experiment configuration.
//!
//! Defaults mirror the usual rerank setup: fold `s1`, optimise `map` on dev,
//! rerank the top 100 documents of dev queries and the top 1000 of test
//! queries. Every struct deserialises with `#[serde(default)]`, so a config
//! file only needs the fields it changes:
//!
//! ```
//! use foldwise_core::config::RerankConfig;
//!
//! let config: RerankConfig = serde_json::from_str(r#"{"fold": "s2", "trainer": {"niters": 5}}"#).unwrap();
//! assert_eq!(config.fold, "s2");
//! assert_eq!(config.threshold, 100);
//! assert_eq!(config.trainer.niters, 5);
//! ```

use crate::error::ConfigurationError;
use crate::evaluation::Metric;
use serde::{Deserialize, Serialize};

// =============================================================================
// Defaults
// =============================================================================

/// Fold trained and evaluated when none is given.
pub const DEFAULT_FOLD: &str = "s1";

/// Documents per dev query passed to the reranker.
pub const DEFAULT_THRESHOLD: usize = 100;

/// Documents per test query passed to the reranker.
pub const DEFAULT_TEST_THRESHOLD: usize = 1000;

/// Grid step for the interpolation weight search.
pub const DEFAULT_INTERPOLATION_STEP: f64 = 0.05;

/// Finest accepted grid step; the search evaluates `1 / step + 1` alphas
/// per fold.
pub const MIN_INTERPOLATION_STEP: f64 = 0.001;

/// Seed for negative sampling and weight initialisation.
pub const DEFAULT_SEED: u64 = 123;

/// Metrics reported when none are configured.
pub const DEFAULT_METRICS: [Metric; 15] = [
    Metric::Precision(1),
    Metric::Precision(5),
    Metric::Precision(10),
    Metric::Precision(20),
    Metric::Judged(10),
    Metric::Judged(20),
    Metric::Judged(200),
    Metric::AveragePrecision,
    Metric::Mrr,
    Metric::NdcgCut(5),
    Metric::NdcgCut(10),
    Metric::NdcgCut(20),
    Metric::Recall(100),
    Metric::Recall(1000),
    Metric::ReciprocalRank,
];

// =============================================================================
// Config structs
// =============================================================================

/// Top-level configuration of a rerank task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Fold to train and evaluate
    pub fold: String,
    /// Metric maximised on dev for checkpoint and interpolation selection
    pub optimize: Metric,
    /// Metrics reported by `evaluate`
    pub metrics: Vec<Metric>,
    /// Maximum documents per dev query
    pub threshold: usize,
    /// Maximum documents per test query
    pub testthreshold: usize,
    /// Also write predictions for the training queries
    pub include_train: bool,
    pub trainer: TrainerConfig,
    pub sampler: SamplerConfig,
    pub extractor: BagOfWordsConfig,
    pub interpolation: InterpolationConfig,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            fold: DEFAULT_FOLD.to_string(),
            optimize: Metric::AveragePrecision,
            metrics: DEFAULT_METRICS.to_vec(),
            threshold: DEFAULT_THRESHOLD,
            testthreshold: DEFAULT_TEST_THRESHOLD,
            include_train: false,
            trainer: TrainerConfig::default(),
            sampler: SamplerConfig::default(),
            extractor: BagOfWordsConfig::default(),
            interpolation: InterpolationConfig::default(),
        }
    }
}

impl RerankConfig {
    /// Checks values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        crate::folds::validate_fold_name(&self.fold)?;
        if self.threshold == 0 || self.testthreshold == 0 {
            return Err(ConfigurationError::Invalid(
                "threshold and testthreshold must be positive".to_string(),
            ));
        }
        self.trainer.validate()?;
        self.extractor.validate()?;
        self.interpolation.validate()
    }

    /// Reported metrics with the optimised metric first, without duplicates.
    pub fn evaluation_metrics(&self) -> Vec<Metric> {
        let mut metrics = vec![self.optimize];
        for metric in &self.metrics {
            if !metrics.contains(metric) {
                metrics.push(*metric);
            }
        }
        metrics
    }
}

/// Optimisation budget and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of training iterations
    pub niters: usize,
    /// Training batches per iteration
    pub itersize: usize,
    /// Triplets per batch
    pub batch: usize,
    /// Learning rate
    pub lr: f64,
    /// Evaluate on dev every this many iterations
    pub validatefreq: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            niters: 20,
            itersize: 64,
            batch: 32,
            lr: 0.01,
            validatefreq: 1,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.niters == 0 || self.itersize == 0 || self.batch == 0 || self.validatefreq == 0 {
            return Err(ConfigurationError::Invalid(
                "trainer niters, itersize, batch and validatefreq must be positive".to_string(),
            ));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ConfigurationError::Invalid(format!(
                "trainer lr must be a positive number, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}

/// How training triplets are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerMode {
    /// One random positive and negative per query per pass
    Triplet,
    /// Every positive/negative combination per pass
    Exhaustive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub mode: SamplerMode,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mode: SamplerMode::Triplet,
            seed: DEFAULT_SEED,
        }
    }
}

/// Token granularity for the bag-of-words extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermMode {
    Unigram,
    Trigram,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BagOfWordsConfig {
    pub datamode: TermMode,
    /// Query terms kept after tokenisation
    pub maxqlen: usize,
    /// Document terms kept after tokenisation
    pub maxdoclen: usize,
}

impl Default for BagOfWordsConfig {
    fn default() -> Self {
        Self {
            datamode: TermMode::Unigram,
            maxqlen: 4,
            maxdoclen: 800,
        }
    }
}

impl BagOfWordsConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.maxqlen == 0 || self.maxdoclen == 0 {
            return Err(ConfigurationError::Invalid(
                "extractor maxqlen and maxdoclen must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Spacing of the alpha grid over [0, 1]
    pub step: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            step: DEFAULT_INTERPOLATION_STEP,
        }
    }
}

impl InterpolationConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(MIN_INTERPOLATION_STEP..=1.0).contains(&self.step) {
            return Err(ConfigurationError::Invalid(format!(
                "interpolation step must be in [{}, 1], got {}",
                MIN_INTERPOLATION_STEP, self.step
            )));
        }
        Ok(())
    }
}
