//! Performance tracking for (provider, model) pairs
//!
//! Every observed call outcome updates four factors and a smoothed total
//! score. Factors are clamped to `[0.1, 1.0]` so a single bad sample never
//! zeroes a candidate out, and the total moves geometrically toward the
//! current composite with smoothing factor `alpha`:
//!
//! ```text
//! composite = speed^0.3 * success^0.3 * cost^0.2 * load^0.2
//! total'    = clamp(total^(1-alpha) * composite^alpha, 0.1, 1.0)
//! ```
//!
//! A background tick re-applies the same step from the latest telemetry so
//! scores keep converging even when a pair receives no traffic.

use crate::clock::SharedClock;
use crate::models::catalog::CandidateKey;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lower clamp applied to every factor and to the total score
pub const MIN_FACTOR: f64 = 0.1;
/// Upper clamp applied to every factor and to the total score
pub const MAX_FACTOR: f64 = 1.0;
/// Value reported for pairs that have never been observed
pub const NEUTRAL_FACTOR: f64 = 0.5;

fn clamp_factor(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_FACTOR;
    }
    value.clamp(MIN_FACTOR, MAX_FACTOR)
}

/// Speed factor: 1.0 at or below 100ms, losing 0.1 per extra 200ms
pub fn speed_factor(latency_ms: f64) -> f64 {
    clamp_factor(1.0 - (latency_ms - 100.0) / 2000.0)
}

/// Success factor: the rolling success rate, halved when the latest call failed
pub fn success_factor(rolling_success_rate: f64, success: bool) -> f64 {
    if success {
        clamp_factor(rolling_success_rate)
    } else {
        clamp_factor(rolling_success_rate * 0.5)
    }
}

/// Cost factor from a cost normalized to `[0, 1]` (1 = most expensive)
pub fn cost_factor(cost_normalized: f64) -> f64 {
    clamp_factor(1.0 - cost_normalized)
}

/// Load factor from the provider-reported load percentage
pub fn load_factor(load_percent: f64) -> f64 {
    clamp_factor(1.0 - load_percent / 100.0)
}

/// One smoothing step of the total score toward the factor composite
pub fn smooth_total(old_total: f64, factors: &Factors, alpha: f64) -> f64 {
    let composite = factors.speed.powf(0.3)
        * factors.success.powf(0.3)
        * factors.cost.powf(0.2)
        * factors.load.powf(0.2);
    clamp_factor(old_total.powf(1.0 - alpha) * composite.powf(alpha))
}

/// The four per-pair factors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factors {
    pub speed: f64,
    pub success: f64,
    pub cost: f64,
    pub load: f64,
}

/// Smoothed performance view of one (provider, model) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceScore {
    pub speed_factor: f64,
    pub success_factor: f64,
    pub cost_factor: f64,
    pub load_factor: f64,
    pub total_score: f64,
    /// `None` until the first outcome or tick touches the pair
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl PerformanceScore {
    /// Score for a pair with no history
    pub fn neutral() -> Self {
        Self {
            speed_factor: NEUTRAL_FACTOR,
            success_factor: NEUTRAL_FACTOR,
            cost_factor: NEUTRAL_FACTOR,
            load_factor: NEUTRAL_FACTOR,
            total_score: NEUTRAL_FACTOR,
            last_updated_at: None,
        }
    }

    fn apply(&mut self, factors: Factors, alpha: f64, at: DateTime<Utc>) {
        self.speed_factor = factors.speed;
        self.success_factor = factors.success;
        self.cost_factor = factors.cost;
        self.load_factor = factors.load;
        self.total_score = smooth_total(self.total_score, &factors, alpha);
        self.last_updated_at = Some(at);
    }
}

/// A completed upstream call as reported by the Provider Agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub latency_ms: f64,
    pub success: bool,
    /// Cost of the call normalized to `[0, 1]`
    pub cost_normalized: f64,
    /// Provider load in percent, `[0, 100]`
    pub load_percent: f64,
}

/// Tracker tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    pub alpha: f64,
    /// Maximum outcomes kept for the rolling success rate
    pub success_window: usize,
    /// Outcomes older than this drop out of the rolling success rate
    pub success_horizon: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            success_window: 100,
            success_horizon: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
struct Telemetry {
    outcomes: VecDeque<(DateTime<Utc>, bool)>,
    last: Option<Observation>,
    latency_ema_ms: Option<f64>,
}

impl Telemetry {
    fn new() -> Self {
        Self {
            outcomes: VecDeque::new(),
            last: None,
            latency_ema_ms: None,
        }
    }

    fn observe(&mut self, observation: Observation, at: DateTime<Utc>, settings: &TrackerSettings) {
        self.outcomes.push_back((at, observation.success));
        while self.outcomes.len() > settings.success_window.max(1) {
            self.outcomes.pop_front();
        }
        self.latency_ema_ms = Some(match self.latency_ema_ms {
            Some(ema) => settings.alpha * observation.latency_ms + (1.0 - settings.alpha) * ema,
            None => observation.latency_ms,
        });
        self.last = Some(observation);
    }

    fn prune(&mut self, now: DateTime<Utc>, horizon: Duration) {
        let horizon = ChronoDuration::from_std(horizon).unwrap_or(ChronoDuration::MAX);
        while let Some((at, _)) = self.outcomes.front() {
            if now - *at > horizon {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn rolling_success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return NEUTRAL_FACTOR;
        }
        let successes = self.outcomes.iter().filter(|(_, ok)| *ok).count();
        successes as f64 / self.outcomes.len() as f64
    }

    fn factors(&self) -> Option<Factors> {
        let last = self.last?;
        Some(Factors {
            speed: speed_factor(last.latency_ms),
            success: success_factor(self.rolling_success_rate(), last.success),
            cost: cost_factor(last.cost_normalized),
            load: load_factor(last.load_percent),
        })
    }
}

#[derive(Debug, Clone)]
struct Entry {
    telemetry: Telemetry,
    score: PerformanceScore,
}

impl Entry {
    fn neutral() -> Self {
        Self {
            telemetry: Telemetry::new(),
            score: PerformanceScore::neutral(),
        }
    }
}

/// Keyed store of performance scores
///
/// Each (provider, model) entry is updated under its own map shard lock, so
/// outcome recording for one pair never serializes routing for the rest.
#[derive(Debug)]
pub struct PerformanceTracker {
    entries: DashMap<CandidateKey, Entry>,
    settings: TrackerSettings,
    clock: SharedClock,
}

impl PerformanceTracker {
    pub fn new(settings: TrackerSettings, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
            clock,
        }
    }

    /// Record the outcome of one upstream call
    pub fn record_outcome(&self, key: &CandidateKey, observation: Observation) -> PerformanceScore {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(Entry::neutral);
        let entry = entry.value_mut();

        entry.telemetry.observe(observation, now, &self.settings);
        if let Some(factors) = entry.telemetry.factors() {
            entry.score.apply(factors, self.settings.alpha, now);
        }

        tracing::debug!(
            candidate = %key,
            latency_ms = observation.latency_ms,
            success = observation.success,
            total_score = entry.score.total_score,
            "Recorded outcome"
        );
        entry.score
    }

    /// Current score for a pair; neutral defaults when never observed
    pub fn score(&self, key: &CandidateKey) -> PerformanceScore {
        self.entries
            .get(key)
            .map(|e| e.score)
            .unwrap_or_else(PerformanceScore::neutral)
    }

    /// Smoothed latency for a pair, or the latency implied by its speed factor
    pub fn expected_latency_ms(&self, key: &CandidateKey) -> f64 {
        let entry = self.entries.get(key);
        if let Some(ema) = entry.as_ref().and_then(|e| e.telemetry.latency_ema_ms) {
            return ema;
        }
        let speed = entry
            .map(|e| e.score.speed_factor)
            .unwrap_or(NEUTRAL_FACTOR);
        100.0 + (1.0 - speed) * 2000.0
    }

    /// Reset a pair to neutral defaults (provider or model (re)added)
    pub fn reset(&self, key: &CandidateKey) {
        self.entries.insert(key.clone(), Entry::neutral());
    }

    /// Drop a pair that left the catalog
    pub fn forget(&self, key: &CandidateKey) {
        self.entries.remove(key);
    }

    /// Number of tracked pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute every score from its latest telemetry
    ///
    /// Outcomes older than the success horizon leave the rolling rate, and
    /// the total takes one smoothing step toward the refreshed composite.
    pub fn decay_tick(&self) {
        let now = self.clock.now();
        let mut refreshed = 0usize;
        for mut entry in self.entries.iter_mut() {
            let entry = entry.value_mut();
            entry.telemetry.prune(now, self.settings.success_horizon);
            if let Some(factors) = entry.telemetry.factors() {
                entry.score.apply(factors, self.settings.alpha, now);
                refreshed += 1;
            }
        }
        tracing::debug!(refreshed, "Performance decay tick completed");
    }

    /// Spawn the periodic decay tick; stops when `shutdown` is cancelled
    pub fn spawn_decay_loop(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting performance decay tick"
            );
            let mut ticker = tokio::time::interval(interval);
            // First tick of tokio::time::interval fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Performance decay tick stopped");
                        break;
                    }
                    _ = ticker.tick() => self.decay_tick(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (PerformanceTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            PerformanceTracker::new(TrackerSettings::default(), clock.clone()),
            clock,
        )
    }

    fn ok(latency_ms: f64) -> Observation {
        Observation {
            latency_ms,
            success: true,
            cost_normalized: 0.2,
            load_percent: 30.0,
        }
    }

    #[test]
    fn test_factor_formulas() {
        assert_eq!(speed_factor(100.0), 1.0);
        assert_eq!(speed_factor(50.0), 1.0);
        assert!((speed_factor(1100.0) - 0.5).abs() < 1e-12);
        assert_eq!(speed_factor(10_000.0), MIN_FACTOR);

        assert_eq!(success_factor(0.8, true), 0.8);
        assert_eq!(success_factor(0.8, false), 0.4);
        assert_eq!(success_factor(0.1, false), MIN_FACTOR);

        assert!((cost_factor(0.25) - 0.75).abs() < 1e-12);
        assert_eq!(cost_factor(1.0), MIN_FACTOR);

        assert!((load_factor(40.0) - 0.6).abs() < 1e-12);
        assert_eq!(load_factor(100.0), MIN_FACTOR);
    }

    #[test]
    fn test_nan_inputs_clamp_to_floor() {
        assert_eq!(speed_factor(f64::NAN), MIN_FACTOR);
        assert_eq!(cost_factor(f64::NAN), MIN_FACTOR);
    }

    #[test]
    fn test_unseen_pair_is_neutral() {
        let (tracker, _) = tracker();
        let score = tracker.score(&CandidateKey::new("p", "m"));
        assert_eq!(score, PerformanceScore::neutral());
        assert_eq!(score.total_score, 0.5);
        assert!(score.last_updated_at.is_none());
    }

    #[test]
    fn test_smoothing_moves_total_toward_composite() {
        let (tracker, _) = tracker();
        let key = CandidateKey::new("p", "m");

        let first = tracker.record_outcome(&key, ok(100.0));
        assert!(first.total_score > 0.5, "good outcome should lift the score");

        let mut previous = first.total_score;
        for _ in 0..20 {
            let score = tracker.record_outcome(&key, ok(100.0));
            assert!(score.total_score >= previous);
            previous = score.total_score;
        }
        assert!(previous <= MAX_FACTOR);
    }

    #[test]
    fn test_single_step_matches_formula() {
        let (tracker, _) = tracker();
        let key = CandidateKey::new("p", "m");
        let score = tracker.record_outcome(&key, ok(600.0));

        let factors = Factors {
            speed: 0.75,
            success: 1.0,
            cost: 0.8,
            load: 0.7,
        };
        let expected = 0.5f64.powf(0.8)
            * (0.75f64.powf(0.3) * 1.0f64.powf(0.3) * 0.8f64.powf(0.2) * 0.7f64.powf(0.2))
                .powf(0.2);
        assert!((score.total_score - expected).abs() < 1e-12);
        assert!((score.speed_factor - factors.speed).abs() < 1e-12);
        assert!((score.load_factor - factors.load).abs() < 1e-12);
    }

    #[test]
    fn test_failure_halves_success_factor() {
        let (tracker, _) = tracker();
        let key = CandidateKey::new("p", "m");
        tracker.record_outcome(&key, ok(200.0));
        let score = tracker.record_outcome(
            &key,
            Observation {
                success: false,
                ..ok(200.0)
            },
        );
        // rolling rate = 1/2, halved for the failure
        assert!((score.success_factor - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_reset_restores_neutral() {
        let (tracker, _) = tracker();
        let key = CandidateKey::new("p", "m");
        tracker.record_outcome(&key, ok(100.0));
        tracker.reset(&key);
        assert_eq!(tracker.score(&key), PerformanceScore::neutral());
    }

    #[test]
    fn test_decay_tick_drops_stale_outcomes() {
        let (tracker, clock) = tracker();
        let key = CandidateKey::new("p", "m");
        tracker.record_outcome(
            &key,
            Observation {
                success: false,
                ..ok(200.0)
            },
        );
        let before = tracker.score(&key);
        assert!((before.success_factor - MIN_FACTOR).abs() < 1e-12);

        // Past the horizon the failure no longer counts; rate reverts to neutral
        clock.advance_secs(601);
        tracker.decay_tick();
        let after = tracker.score(&key);
        assert!((after.success_factor - 0.25).abs() < 1e-12);
        assert!(after.last_updated_at > before.last_updated_at);
    }

    #[test]
    fn test_decay_tick_ignores_pairs_without_telemetry() {
        let (tracker, _) = tracker();
        let key = CandidateKey::new("p", "m");
        tracker.reset(&key);
        tracker.decay_tick();
        assert_eq!(tracker.score(&key), PerformanceScore::neutral());
    }

    #[test]
    fn test_expected_latency_uses_ema() {
        let (tracker, _) = tracker();
        let key = CandidateKey::new("p", "m");
        assert_eq!(tracker.expected_latency_ms(&key), 1100.0);

        tracker.record_outcome(&key, ok(500.0));
        tracker.record_outcome(&key, ok(1000.0));
        // 0.2 * 1000 + 0.8 * 500
        assert!((tracker.expected_latency_ms(&key) - 600.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_loop_stops_on_cancel() {
        let clock = Arc::new(crate::clock::TokioClock::new());
        let tracker = Arc::new(PerformanceTracker::new(TrackerSettings::default(), clock));
        let token = CancellationToken::new();
        let handle = tracker
            .clone()
            .spawn_decay_loop(Duration::from_secs(60), token.clone());

        tokio::time::advance(Duration::from_secs(125)).await;
        token.cancel();
        handle.await.expect("decay loop should exit cleanly");
    }
}
