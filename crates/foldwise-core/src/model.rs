//! Reranking models.
//!
//! The trainer only needs a model to score feature vectors, take a gradient
//! step on a batch of triplets, and round-trip its parameters through JSON
//! for checkpointing. [`LinearReranker`] is the bundled implementation.

use crate::error::PipelineError;
use crate::extractor::FeatureVector;
use crate::sampler::TrainingExample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Scores query/document feature vectors.
pub trait Reranker: Send {
    fn name(&self) -> &str;

    /// Relevance score for one pair. Higher is better.
    fn score(&self, features: &[f64]) -> f64;

    fn predict_batch(&self, batch: &[FeatureVector]) -> Vec<f64> {
        batch.iter().map(|f| self.score(f)).collect()
    }

    /// One gradient update on a batch of triplets.
    ///
    /// # Returns
    ///
    /// Mean loss over the batch, before the update.
    fn train_step(&mut self, batch: &[TrainingExample], learning_rate: f64) -> f64;

    /// Serialisable parameters.
    fn state(&self) -> Result<serde_json::Value, PipelineError>;

    /// Restores parameters produced by [`Reranker::state`].
    ///
    /// # Errors
    ///
    /// `Serialization` if the value does not describe this model.
    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearState {
    weights: Vec<f64>,
}

/// `w · x` trained with pairwise hinge loss `max(0, 1 - s(pos) + s(neg))`.
#[derive(Debug, Clone)]
pub struct LinearReranker {
    weights: Vec<f64>,
}

impl LinearReranker {
    /// Small random weights from `seed`.
    pub fn new(dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = (0..dim).map(|_| rng.gen_range(-0.01..0.01)).collect();
        Self { weights }
    }

    pub fn from_weights(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl Reranker for LinearReranker {
    fn name(&self) -> &str {
        "linear"
    }

    fn score(&self, features: &[f64]) -> f64 {
        self.weights.iter().zip(features).map(|(w, x)| w * x).sum()
    }

    fn train_step(&mut self, batch: &[TrainingExample], learning_rate: f64) -> f64 {
        if batch.is_empty() {
            return 0.0;
        }
        let mut grad = vec![0.0; self.weights.len()];
        let mut loss = 0.0;
        for example in batch {
            let margin = 1.0 - self.score(&example.pos_features) + self.score(&example.neg_features);
            if margin > 0.0 {
                loss += margin;
                for (i, g) in grad.iter_mut().enumerate() {
                    let pos = example.pos_features.get(i).copied().unwrap_or(0.0);
                    let neg = example.neg_features.get(i).copied().unwrap_or(0.0);
                    *g += neg - pos;
                }
            }
        }
        let n = batch.len() as f64;
        for (w, g) in self.weights.iter_mut().zip(&grad) {
            *w -= learning_rate * g / n;
        }
        loss / n
    }

    fn state(&self) -> Result<serde_json::Value, PipelineError> {
        Ok(serde_json::to_value(LinearState {
            weights: self.weights.clone(),
        })?)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<(), PipelineError> {
        let state: LinearState = serde_json::from_value(state.clone())?;
        if state.weights.len() != self.weights.len() {
            return Err(PipelineError::Serialization(format!(
                "checkpoint has {} weights but the model expects {}",
                state.weights.len(),
                self.weights.len()
            )));
        }
        self.weights = state.weights;
        Ok(())
    }
}
