//! Candidate scoring
//!
//! Weights adapt to the request: complex requests favour quality, simple ones
//! favour cost, and the caller's priority is applied last so it wins where
//! both adjust the same weight.

use super::RequestPriority;
use crate::models::performance::PerformanceScore;
use serde::Serialize;

/// Relative importance of each score component
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreWeights {
    pub perf: f64,
    pub cost: f64,
    pub quality: f64,
    pub latency: f64,
}

/// Weights used when no adaptation applies
pub const BASE_WEIGHTS: ScoreWeights = ScoreWeights {
    perf: 0.40,
    cost: 0.25,
    quality: 0.20,
    latency: 0.15,
};

/// Weights for a request's complexity (0..100) and priority
///
/// Adjusted weights are not renormalized.
pub fn weights_for(complexity_score: f64, priority: RequestPriority) -> ScoreWeights {
    let mut weights = BASE_WEIGHTS;

    if complexity_score > 80.0 {
        weights.quality = 0.40;
        weights.cost = 0.15;
    } else if complexity_score < 50.0 {
        weights.cost = 0.40;
        weights.quality = 0.15;
    }

    match priority {
        RequestPriority::Critical => {
            weights.quality = 0.45;
            weights.cost = 0.10;
        }
        RequestPriority::Low => {
            weights.cost = 0.45;
            weights.quality = 0.10;
        }
        RequestPriority::High | RequestPriority::Medium => {}
    }

    weights
}

/// Weighted candidate score, damped by the provider's traffic share
///
/// Quality is read from the success factor; perf from the smoothed total.
pub fn candidate_score(score: &PerformanceScore, weights: &ScoreWeights, traffic_share: f64) -> f64 {
    let raw = score.total_score * weights.perf
        + score.cost_factor * weights.cost
        + score.success_factor * weights.quality
        + score.speed_factor * weights.latency;
    raw * traffic_share.clamp(0.0, 1.0)
}
