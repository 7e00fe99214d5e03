//! Progress reporting for training runs.
//!
//! The trainer hands a [`TrainingProgress`] to its callback after every
//! iteration, so a caller can drive a progress bar or log lines without the
//! trainer knowing about either.

use std::time::Instant;

/// Snapshot of a training run after an iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingProgress {
    /// Iterations finished so far
    pub iterations_completed: usize,
    /// Iteration budget
    pub iterations_total: usize,
    /// Training triplets consumed so far
    pub examples_seen: usize,
    /// Mean loss of the last iteration
    pub last_loss: f64,
    /// Time since training started (milliseconds)
    pub elapsed_ms: u64,
}

impl TrainingProgress {
    pub fn new(
        iterations_completed: usize,
        iterations_total: usize,
        examples_seen: usize,
        last_loss: f64,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            iterations_completed,
            iterations_total,
            examples_seen,
            last_loss,
            elapsed_ms,
        }
    }

    /// Returns the completion percentage (0.0 to 100.0).
    pub fn percent_complete(&self) -> f64 {
        if self.iterations_total == 0 {
            0.0
        } else {
            (self.iterations_completed as f64 / self.iterations_total as f64) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.iterations_completed >= self.iterations_total
    }

    /// Returns estimated time remaining in milliseconds, if computable.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        if self.iterations_completed == 0 || self.is_complete() {
            return None;
        }
        let remaining = self.iterations_total - self.iterations_completed;
        let ms_per_iteration = self.elapsed_ms / self.iterations_completed as u64;
        Some(remaining as u64 * ms_per_iteration)
    }

    pub fn examples_per_second(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.examples_seen as f64 / (self.elapsed_ms as f64 / 1000.0)
        }
    }
}

/// Wall-clock timer for a training run.
#[derive(Debug, Clone)]
pub struct ProgressTimer {
    start: Instant,
}

impl ProgressTimer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for ProgressTimer {
    fn default() -> Self {
        Self::new()
    }
}
