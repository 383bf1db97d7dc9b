//! Epsilon-tier weighted selection over many trials

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use switchyard::clock::ManualClock;
use switchyard::collaborators::{NoBudgetLimit, TracingAlertSink};
use switchyard::metrics::Metrics;
use switchyard::models::catalog::{CandidateKey, CatalogSnapshot, ModelRecord, ProviderRecord};
use switchyard::models::health::{FailoverSettings, FailoverSupervisor};
use switchyard::models::load::LoadTracker;
use switchyard::models::performance::{PerformanceTracker, TrackerSettings};
use switchyard::router::{
    AgentDeps, AgentSettings, RouteRequest, RoutingAgent, RuleMatcher, ScoredCandidate,
    epsilon_tier, select_from_tier,
};
use tokio::sync::mpsc;

const TRIALS: usize = 10_000;

fn candidate(provider_id: &str, score: f64, weight: f64) -> ScoredCandidate {
    ScoredCandidate {
        key: CandidateKey::new(provider_id, "m"),
        score,
        weight,
        inflight: 0,
        expected_latency_ms: 500.0,
    }
}

fn provider(id: &str) -> ProviderRecord {
    ProviderRecord {
        id: id.to_string(),
        kind: "openai".to_string(),
        base_url: format!("http://{id}.local/v1"),
        weight: 1.0,
        priority: 1,
        active: true,
    }
}

fn model(provider_id: &str, model_id: &str, weight: f64) -> ModelRecord {
    ModelRecord {
        model_id: model_id.to_string(),
        provider_id: provider_id.to_string(),
        name: None,
        context_window: 8192,
        priority: 1,
        weight,
        active: true,
        max_complexity: None,
    }
}

fn share(counts: &HashMap<String, usize>, provider_id: &str) -> f64 {
    counts.get(provider_id).copied().unwrap_or(0) as f64 / TRIALS as f64
}

/// SCENARIO: A (score 0.91, weight 3) and B (score 0.905, weight 1), epsilon 0.02
///
/// EXPECTED: Over 10,000 draws A is chosen about 75% of the time
#[test]
fn test_tier_draws_follow_weights() {
    // ARRANGE
    let tier = epsilon_tier(
        vec![candidate("b", 0.905, 1.0), candidate("a", 0.91, 3.0)],
        0.02,
    );
    assert_eq!(tier.len(), 2);
    let mut rng = StdRng::seed_from_u64(7);

    // ACT
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..TRIALS {
        let chosen = select_from_tier(&tier, &mut rng).unwrap();
        *counts.entry(chosen.key.provider_id.clone()).or_default() += 1;
    }

    // ASSERT: 3 sigma for n=10k at p=0.75 is about 1.3 points
    let a = share(&counts, "a");
    assert!((a - 0.75).abs() < 0.03, "A share was {a}");
    assert!((share(&counts, "b") - 0.25).abs() < 0.03);
}

/// SCENARIO: A third candidate scores just outside the epsilon band
///
/// EXPECTED: It is never drawn
#[test]
fn test_candidate_outside_band_never_drawn() {
    let tier = epsilon_tier(
        vec![
            candidate("a", 0.91, 1.0),
            candidate("b", 0.905, 1.0),
            candidate("c", 0.88, 100.0),
        ],
        0.02,
    );
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..1_000 {
        let chosen = select_from_tier(&tier, &mut rng).unwrap();
        assert_ne!(chosen.key.provider_id, "c");
    }
}

/// SCENARIO: Routing agent over two fresh pairs with model weights 3 and 1
///
/// EXPECTED: Neutral scores tie, so traffic splits roughly 75/25
#[test]
fn test_agent_splits_neutral_candidates_by_weight() {
    // ARRANGE
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let metrics = Arc::new(Metrics::new().unwrap());
    let alerts = Arc::new(TracingAlertSink);
    let deps = AgentDeps {
        rules: Arc::new(RuleMatcher::new(metrics.clone(), alerts.clone())),
        tracker: Arc::new(PerformanceTracker::new(
            TrackerSettings::default(),
            clock.clone(),
        )),
        supervisor: Arc::new(FailoverSupervisor::new(
            FailoverSettings::default(),
            clock.clone(),
            alerts.clone(),
            metrics.clone(),
        )),
        load: Arc::new(LoadTracker::new()),
        budget: Arc::new(NoBudgetLimit),
        alerts,
        metrics,
        clock,
    };
    let (tx, _rx) = mpsc::channel(1);
    let agent = RoutingAgent::new(deps, AgentSettings::default(), tx);
    agent.set_catalog(CatalogSnapshot::new(
        vec![provider("a"), provider("b")],
        vec![model("a", "m", 3.0), model("b", "m", 1.0)],
    ));

    // ACT
    let mut counts: HashMap<String, usize> = HashMap::new();
    let request = RouteRequest::new("hello");
    for _ in 0..TRIALS {
        let decision = agent.route(&request).unwrap();
        *counts.entry(decision.selected_provider_id).or_default() += 1;
    }

    // ASSERT
    let a = share(&counts, "a");
    assert!((a - 0.75).abs() < 0.03, "A share was {a}");
}
