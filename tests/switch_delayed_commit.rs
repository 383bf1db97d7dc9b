//! Routing switch behavior driven through the gateway
//!
//! Runs on paused tokio time; the gateway's clock follows `tokio::time`, so
//! delayed commits and cooldowns are exercised without real waiting.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use switchyard::clock::{Clock, TokioClock};
use switchyard::collaborators::RecordingAlertSink;
use switchyard::config::Config;
use switchyard::error::ToggleError;
use switchyard::gateway::Gateway;
use switchyard::models::catalog::ProviderRecord;
use switchyard::models::probe::{ProbeOutcome, Prober};
use switchyard::orchestrator::{HistoryKind, RoutingSwitchState, ToggleRequest};
use switchyard::router::{DecisionReason, RouteRequest};
use switchyard::store::MemoryStore;

struct HealthyProber;

#[async_trait::async_trait]
impl Prober for HealthyProber {
    async fn probe(&self, _: &ProviderRecord) -> ProbeOutcome {
        ProbeOutcome::healthy(1.0)
    }
}

const CONFIG: &str = r#"
[switch]
cooldown_seconds = 300
delay_seconds = 10

[[providers]]
id = "p1"
base_url = "http://p1.local/v1"

[[providers.models]]
id = "m1"
"#;

async fn gateway(store: MemoryStore, t0: DateTime<Utc>) -> Arc<Gateway> {
    Gateway::builder(Config::from_str(CONFIG).unwrap())
        .store(Arc::new(store))
        .alerts(Arc::new(RecordingAlertSink::new()))
        .prober(Arc::new(HealthyProber))
        .clock(Arc::new(TokioClock::starting_at(t0)))
        .build()
        .await
        .unwrap()
}

/// SCENARIO: Switch off, last toggle 1000s ago; toggle on at t=0
///
/// EXPECTED: Effective state stays off at t=5 and is on from t=10 onward;
/// routing reason flips from routing_disabled to an agent decision.
#[tokio::test(start_paused = true)]
async fn test_toggle_takes_effect_after_delay() {
    // ARRANGE: Stored state with a toggle well outside the cooldown window
    let t0 = Utc::now();
    let mut stored = RoutingSwitchState::new(false);
    stored.last_toggle_at = Some(t0 - ChronoDuration::seconds(1000));
    let gateway = gateway(MemoryStore::with_switch_state(stored), t0).await;
    let orchestrator = gateway.orchestrator();

    // ACT: Request the toggle at t=0
    let ack = orchestrator
        .request_toggle(ToggleRequest::new(true, "ops").with_reason("enable scoring"))
        .await
        .expect("toggle outside cooldown should be accepted");

    // ASSERT: Pending until t=10
    assert_eq!(ack.pending_effective_at, t0 + ChronoDuration::seconds(10));
    assert!(!orchestrator.get_effective_state(t0 + ChronoDuration::seconds(5)));
    assert!(orchestrator.get_effective_state(t0 + ChronoDuration::seconds(11)));

    tokio::time::advance(Duration::from_secs(5)).await;
    let decision = gateway.decide(&RouteRequest::new("hello")).unwrap();
    assert_eq!(decision.reason, DecisionReason::RoutingDisabled);

    tokio::time::advance(Duration::from_secs(6)).await;
    let decision = gateway.decide(&RouteRequest::new("hello")).unwrap();
    assert_ne!(decision.reason, DecisionReason::RoutingDisabled);
}

/// SCENARIO: Toggle on at t=0, toggle off at t=3 before the first commit
///
/// EXPECTED: Exactly one committed entry, at t=13, with new_state=false
#[tokio::test(start_paused = true)]
async fn test_superseded_toggle_never_commits() {
    // ARRANGE
    let t0 = Utc::now();
    let gateway = gateway(MemoryStore::new(), t0).await;
    let orchestrator = gateway.orchestrator();
    let clock = TokioClock::starting_at(t0);

    // ACT
    orchestrator
        .request_toggle(ToggleRequest::new(true, "ops"))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;
    orchestrator
        .request_toggle(ToggleRequest::new(false, "ops"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // ASSERT
    let committed: Vec<_> = orchestrator
        .get_history(100)
        .into_iter()
        .filter(|e| e.kind == HistoryKind::Committed)
        .collect();
    assert_eq!(committed.len(), 1, "only the latest request commits");
    assert!(!committed[0].new_state);
    let drift = committed[0].timestamp - (t0 + ChronoDuration::seconds(13));
    assert!(drift.num_milliseconds().abs() <= 1, "committed at t=13, drift {drift}");
    assert!(!orchestrator.get_effective_state(clock.now()));
}

/// SCENARIO: A commit lands at t=10; toggles at t=100 and t=311
///
/// EXPECTED: t=100 is inside the 300s cooldown and is rejected with the
/// remaining seconds; t=311 is outside and is accepted.
#[tokio::test(start_paused = true)]
async fn test_cooldown_window_bounds() {
    // ARRANGE: Commit a toggle at t=10
    let t0 = Utc::now();
    let gateway = gateway(MemoryStore::new(), t0).await;
    let orchestrator = gateway.orchestrator();
    let mut changes = orchestrator.subscribe();
    orchestrator
        .request_toggle(ToggleRequest::new(true, "ops"))
        .await
        .unwrap();
    changes.changed().await.unwrap();

    // ACT: Inside the cooldown window
    tokio::time::advance(Duration::from_secs(90)).await;
    let rejected = orchestrator
        .request_toggle(ToggleRequest::new(false, "ops"))
        .await;

    // ASSERT
    assert_eq!(
        rejected,
        Err(ToggleError::CooldownActive {
            remaining_seconds: 210
        })
    );
    assert_eq!(gateway.metrics().cooldown_rejections_count(), 1);

    // ACT: Outside the cooldown window
    tokio::time::advance(Duration::from_secs(211)).await;
    let accepted = orchestrator
        .request_toggle(ToggleRequest::new(false, "ops"))
        .await;

    // ASSERT
    assert!(accepted.is_ok());
}

/// SCENARIO: Operator forces a toggle during the cooldown with zero delay
///
/// EXPECTED: Accepted and committed on the next scheduler turn
#[tokio::test(start_paused = true)]
async fn test_forced_immediate_toggle() {
    let t0 = Utc::now();
    let gateway = gateway(MemoryStore::new(), t0).await;
    let orchestrator = gateway.orchestrator();
    let mut changes = orchestrator.subscribe();

    orchestrator
        .request_toggle(ToggleRequest::new(true, "ops").with_delay_seconds(0))
        .await
        .unwrap();
    changes.changed().await.unwrap();

    orchestrator
        .request_toggle(
            ToggleRequest::new(false, "ops")
                .forced()
                .with_delay_seconds(0),
        )
        .await
        .expect("force bypasses cooldown");
    changes.changed().await.unwrap();

    assert!(!*changes.borrow());
    let metrics = orchestrator.get_metrics(t0);
    assert_eq!(metrics.total_switches, 2);
    assert_eq!(metrics.enabled_count, 1);
    assert_eq!(metrics.disabled_count, 1);
}
