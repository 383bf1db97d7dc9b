//! Epsilon-band weighted selection
//!
//! Every candidate scoring within `epsilon` of the best forms the tier. One
//! tier member is drawn with probability proportional to its model weight;
//! candidates outside the tier are never drawn.

use crate::models::catalog::CandidateKey;
use rand::Rng;
use std::cmp::Ordering;

/// A candidate with everything selection needs
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub key: CandidateKey,
    pub score: f64,
    /// `ModelRecord.weight`
    pub weight: f64,
    /// In-flight requests, the first tie-breaker
    pub inflight: u64,
    pub expected_latency_ms: f64,
}

fn tier_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.inflight.cmp(&b.inflight))
        .then_with(|| a.key.cmp(&b.key))
}

/// Candidates within `epsilon` of the top score
///
/// Sorted by score, then lower in-flight load, then provider and model id.
pub fn epsilon_tier(mut candidates: Vec<ScoredCandidate>, epsilon: f64) -> Vec<ScoredCandidate> {
    candidates.retain(|c| c.score.is_finite());
    candidates.sort_by(tier_order);

    let Some(top) = candidates.first().map(|c| c.score) else {
        return candidates;
    };
    candidates.retain(|c| c.score >= top - epsilon);
    candidates
}

/// Weighted random draw from a tier produced by [`epsilon_tier`]
///
/// A single-member tier, or one whose weights sum to zero, resolves to the
/// first member deterministically.
pub fn select_from_tier<'a, R: Rng + ?Sized>(
    tier: &'a [ScoredCandidate],
    rng: &mut R,
) -> Option<&'a ScoredCandidate> {
    let first = tier.first()?;
    if tier.len() == 1 {
        return Some(first);
    }

    let weight_of = |c: &ScoredCandidate| {
        if c.weight.is_finite() && c.weight > 0.0 {
            c.weight
        } else {
            0.0
        }
    };
    let total_weight: f64 = tier.iter().map(weight_of).sum();
    if total_weight <= 0.0 {
        return Some(first);
    }

    // Generate random number in range [0, total_weight)
    let random_weight = rng.random_range(0.0..total_weight);

    let mut cumulative_weight = 0.0;
    for candidate in tier {
        cumulative_weight += weight_of(candidate);
        if random_weight < cumulative_weight {
            return Some(candidate);
        }
    }

    // Floating-point rounding can leave the draw just past the last bound
    tier.iter().rev().find(|c| weight_of(*c) > 0.0)
}
