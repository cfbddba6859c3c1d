//! Load scoring and traffic weight derivation.

use fleet_core::config::{FleetConfig, ScoringConfig, ThresholdConfig};
use fleet_core::{ScaleFlag, WorkerMetrics, WorkerRecord};

/// Weighted load score of one sample. Higher means more loaded.
///
/// ```text
/// x * (memory% + cpu%) / 2 + y * busy_threads / 4 + z * processing_ms / max_processing_ms
/// ```
pub fn load_score(metrics: &WorkerMetrics, x: f64, y: f64, z: f64, max_processing_ms: u64) -> f64 {
    let utilization = (metrics.memory_usage_percent + metrics.cpu_percent) / 2.0;
    let threads = f64::from(metrics.busy_worker_threads) / 4.0;
    let processing = if max_processing_ms == 0 {
        0.0
    } else {
        metrics.avg_request_processing_ms as f64 / max_processing_ms as f64
    };
    x * utilization + y * threads + z * processing
}

/// Thresholds are exclusive: a score equal to either one is neutral.
pub fn derive_flag(score: f64, scale_up: f64, scale_down: f64) -> ScaleFlag {
    if score > scale_up {
        ScaleFlag::Up
    } else if score < scale_down {
        ScaleFlag::Down
    } else {
        ScaleFlag::Neutral
    }
}

/// Turn scores into percentage weights proportional to `1 / score`.
///
/// Scores are floored at `min_score` first. The result sums to 100 and
/// keeps the input order; an empty input gives an empty output.
pub fn inverse_weights(scores: &[f64], min_score: f64) -> Vec<f64> {
    let inverted: Vec<f64> = scores.iter().map(|s| 1.0 / s.max(min_score)).collect();
    let total: f64 = inverted.iter().sum();
    inverted.iter().map(|inv| inv / total * 100.0).collect()
}

/// Applies the configured coefficients and thresholds to worker records.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    scoring: ScoringConfig,
    scale_up: f64,
    scale_down: f64,
}

impl ScoringEngine {
    pub fn new(scoring: ScoringConfig, thresholds: &ThresholdConfig) -> Self {
        Self {
            scoring,
            scale_up: thresholds.scale_up,
            scale_down: thresholds.scale_down,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.scoring.clone(), &config.thresholds)
    }

    pub fn min_score(&self) -> f64 {
        self.scoring.min_score
    }

    pub fn score(&self, metrics: &WorkerMetrics) -> f64 {
        load_score(
            metrics,
            self.scoring.coefficient_x,
            self.scoring.coefficient_y,
            self.scoring.coefficient_z,
            self.scoring.max_processing_ms,
        )
    }

    pub fn flag(&self, score: f64) -> ScaleFlag {
        derive_flag(score, self.scale_up, self.scale_down)
    }

    /// Whether `score` sits at or below the floor used for inversion.
    pub fn is_degenerate(&self, score: f64) -> bool {
        score <= self.scoring.min_score
    }

    /// Refresh score and flag from the record's metrics.
    ///
    /// Returns `false` and leaves the record untouched if it has never
    /// reported a sample.
    pub fn apply(&self, record: &mut WorkerRecord) -> bool {
        let Some(metrics) = record.metrics else {
            return false;
        };
        record.score = self.score(&metrics);
        record.flag = self.flag(record.score);
        true
    }
}
