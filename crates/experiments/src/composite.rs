//! Composite ranking of scored variants.

use parallax_common::{ParallaxError, Result};
use serde::{Deserialize, Serialize};

use crate::scoring::VariantTrialMetrics;

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Weights for the composite score plus the speed-bonus time cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub consistency: f64,
    pub specificity: f64,
    pub actionability: f64,
    pub technical_density: f64,
    pub speed: f64,
    pub ground_truth: f64,
    /// Seconds at which the speed bonus reaches zero.
    pub time_cap: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            consistency: 0.25,
            specificity: 0.25,
            actionability: 0.25,
            technical_density: 0.15,
            speed: 0.10,
            ground_truth: 0.0,
            time_cap: 10.0,
        }
    }
}

impl CompositeWeights {
    fn components(&self) -> [f64; 6] {
        [
            self.consistency,
            self.specificity,
            self.actionability,
            self.technical_density,
            self.speed,
            self.ground_truth,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let components = self.components();
        if components.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ParallaxError::Config(
                "composite weights must be finite and non-negative".into(),
            ));
        }
        let sum: f64 = components.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ParallaxError::Config(format!(
                "composite weights must sum to 1.0, got {sum}"
            )));
        }
        if !(self.time_cap.is_finite() && self.time_cap > 0.0) {
            return Err(ParallaxError::Config(
                "weights.time_cap must be a positive number of seconds".into(),
            ));
        }
        Ok(())
    }

    /// Weights to apply when ground truth is or is not available. Without a
    /// reference the ground-truth share is spread over the other components
    /// in proportion to their weights.
    pub fn effective(&self, has_ground_truth: bool) -> CompositeWeights {
        if has_ground_truth || self.ground_truth == 0.0 {
            return self.clone();
        }
        let rest = 1.0 - self.ground_truth;
        if rest <= 0.0 {
            return self.clone();
        }
        CompositeWeights {
            consistency: self.consistency / rest,
            specificity: self.specificity / rest,
            actionability: self.actionability / rest,
            technical_density: self.technical_density / rest,
            speed: self.speed / rest,
            ground_truth: 0.0,
            time_cap: self.time_cap,
        }
    }

    /// `1 - min(avg / time_cap, 1)`.
    pub fn speed_bonus(&self, avg_execution_time: f64) -> f64 {
        1.0 - (avg_execution_time.max(0.0) / self.time_cap).min(1.0)
    }

    /// Weighted sum of the metrics. A variant with no successful trial
    /// scores 0.0.
    pub fn composite_score(&self, metrics: &VariantTrialMetrics) -> f64 {
        if metrics.success_rate <= 0.0 {
            return 0.0;
        }
        let score = metrics.consistency * self.consistency
            + metrics.specificity_score * self.specificity
            + metrics.actionability_score * self.actionability
            + metrics.technical_density * self.technical_density
            + self.speed_bonus(metrics.avg_execution_time) * self.speed
            + metrics.ground_truth_score.unwrap_or(0.0) * self.ground_truth;
        score.clamp(0.0, 1.0)
    }
}

/// One ranked entry, in catalog order.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub composite: f64,
    pub avg_execution_time: f64,
}

/// Index of the winning candidate: highest composite, then lower average
/// time, then earliest position.
pub fn select_winner(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        let Some(current) = best else {
            best = Some(idx);
            continue;
        };
        let leader = &candidates[current];
        let better = candidate.composite > leader.composite
            || (candidate.composite == leader.composite
                && candidate.avg_execution_time < leader.avg_execution_time);
        if better {
            best = Some(idx);
        }
    }
    best
}
