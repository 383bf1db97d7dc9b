//! HTTP API driven through the full router

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use switchyard::config::Config;
use switchyard::gateway::Gateway;
use switchyard::handlers::{self, AppState};
use switchyard::middleware::REQUEST_ID_HEADER;
use switchyard::models::catalog::ProviderRecord;
use switchyard::models::probe::{ProbeOutcome, Prober};
use switchyard::store::MemoryStore;
use tower::ServiceExt; // for `oneshot`

struct HealthyProber;

#[async_trait::async_trait]
impl Prober for HealthyProber {
    async fn probe(&self, _: &ProviderRecord) -> ProbeOutcome {
        ProbeOutcome::healthy(1.0)
    }
}

const CONFIG: &str = r#"
[switch]
admins = ["ops"]
cooldown_seconds = 300

[routing]
default_provider = "p2"

[[providers]]
id = "p1"
base_url = "http://p1.local/v1"

[[providers.models]]
id = "m1"

[[providers]]
id = "p2"
base_url = "http://p2.local/v1"

[[providers.models]]
id = "m2"
"#;

async fn app() -> (Router, Arc<Gateway>) {
    let gateway = Gateway::builder(Config::from_str(CONFIG).unwrap())
        .store(Arc::new(MemoryStore::new()))
        .prober(Arc::new(HealthyProber))
        .build()
        .await
        .unwrap();
    (handlers::router(AppState::new(gateway.clone())), gateway)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// SCENARIO: POST /route with an x-request-id header while routing is off
///
/// EXPECTED: 200 with the default provider; the header is echoed and used
/// as the decision's request id.
#[tokio::test]
async fn test_route_echoes_request_id() {
    // ARRANGE
    let (app, _) = app().await;
    let request_id = "6f1c2a57-8d3b-4c1e-9a0f-2b7d5e4c3a10";
    let mut request = post_json("/route", json!({"content": "hello"}));
    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, request_id.parse().unwrap());

    // ACT
    let response = app.oneshot(request).await.unwrap();

    // ASSERT
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), request_id);
    let decision = body_json(response).await;
    assert_eq!(decision["request_id"], request_id);
    assert_eq!(decision["selected_provider_id"], "p2");
    assert_eq!(decision["reason"], "routing_disabled");
}

/// SCENARIO: POST /route with complexity outside [0, 100]
///
/// EXPECTED: 400 with an error body
#[tokio::test]
async fn test_route_rejects_out_of_range_complexity() {
    let (app, _) = app().await;

    let response = app
        .oneshot(post_json(
            "/route",
            json!({"content": "hello", "analysis": {"complexity_score": 150.0}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("complexity_score"));
}

/// SCENARIO: Immediate toggle commits, then a second toggle inside the cooldown
///
/// EXPECTED: 202 then 429 with Retry-After and remaining_seconds
#[tokio::test]
async fn test_toggle_then_cooldown_rejection() {
    // ARRANGE
    let (app, gateway) = app().await;
    let mut committed = gateway.orchestrator().subscribe();

    // ACT: First toggle commits right away
    let response = app
        .clone()
        .oneshot(post_json(
            "/switch/toggle",
            json!({"target": true, "requested_by": "ops", "delay_seconds": 0}),
        ))
        .await
        .unwrap();

    // ASSERT
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ack = body_json(response).await;
    assert_eq!(ack["generation"], 1);
    committed.changed().await.unwrap();

    // ACT: Second toggle inside the cooldown
    let response = app
        .clone()
        .oneshot(post_json(
            "/switch/toggle",
            json!({"target": false, "requested_by": "ops"}),
        ))
        .await
        .unwrap();

    // ASSERT
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((299..=300).contains(&retry_after));
    let body = body_json(response).await;
    assert_eq!(body["remaining_seconds"], retry_after);

    // ASSERT: Status and history reflect the committed toggle
    let status = body_json(app.clone().oneshot(get("/switch")).await.unwrap()).await;
    assert_eq!(status["enabled"], true);
    assert_eq!(status["can_toggle"], false);

    let history = body_json(app.oneshot(get("/switch/history?limit=10")).await.unwrap()).await;
    let kinds: Vec<_> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["committed", "requested"]);
}

/// SCENARIO: A caller outside the admin list toggles
///
/// EXPECTED: 403 and no pending change
#[tokio::test]
async fn test_toggle_by_non_admin_is_forbidden() {
    let (app, gateway) = app().await;

    let response = app
        .oneshot(post_json(
            "/switch/toggle",
            json!({"target": true, "requested_by": "intern"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!gateway.orchestrator().snapshot().is_pending());
}

/// SCENARIO: An admin toggles with a delay override far beyond a week
///
/// EXPECTED: 400 naming the maximum; the switch is untouched and usable
#[tokio::test]
async fn test_toggle_with_oversized_delay_is_bad_request() {
    // ARRANGE
    let (app, gateway) = app().await;

    // ACT
    let response = app
        .clone()
        .oneshot(post_json(
            "/switch/toggle",
            json!({"target": true, "requested_by": "ops", "delay_seconds": 10_000_000_000_000u64}),
        ))
        .await
        .unwrap();

    // ASSERT
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("604800"));
    assert!(!gateway.orchestrator().snapshot().is_pending());

    let response = app
        .oneshot(post_json(
            "/switch/toggle",
            json!({"target": true, "requested_by": "ops", "delay_seconds": 60}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

/// SCENARIO: Rule CRUD over HTTP
///
/// EXPECTED: 201 on create, 200 on update, 204 on delete, 404 for unknown ids
#[tokio::test]
async fn test_rule_lifecycle() {
    // ARRANGE
    let (app, _) = app().await;
    let rule = json!({
        "name": "code",
        "priority": 10,
        "condition_type": "regex",
        "condition_value": "code",
        "action_type": "use_provider",
        "action_value": "p1"
    });

    // ACT + ASSERT: Create
    let response = app.clone().oneshot(post_json("/rules", rule.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_u64().unwrap();

    // ACT + ASSERT: Update
    let mut updated = rule.clone();
    updated["priority"] = json!(20);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/rules/{id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(updated.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["priority"], 20);

    // ACT + ASSERT: Invalid pattern
    let mut invalid = rule.clone();
    invalid["condition_value"] = json!("(unclosed");
    let response = app.clone().oneshot(post_json("/rules", invalid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // ACT + ASSERT: Delete, then delete again
    let delete = |uri: String| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(delete(format!("/rules/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.clone().oneshot(delete(format!("/rules/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let rules = body_json(app.oneshot(get("/rules")).await.unwrap()).await;
    assert!(rules.as_array().unwrap().is_empty());
}

/// SCENARIO: Outcomes reported over HTTP withdraw a failing provider
///
/// EXPECTED: 202 per outcome; /providers/health shows p1 failed with share 0
#[tokio::test]
async fn test_outcomes_drive_provider_health() {
    let (app, _) = app().await;

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/outcomes",
                json!({"provider_id": "p1", "model_id": "m1", "latency_ms": 900.0, "success": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let health = body_json(app.oneshot(get("/providers/health")).await.unwrap()).await;
    let p1 = &health.as_array().unwrap()[0];
    assert_eq!(p1["provider_id"], "p1");
    assert_eq!(p1["status"], "failed");
    assert_eq!(p1["traffic_share"], 0.0);
}

/// SCENARIO: Outcomes for a pair the catalog does not know
///
/// EXPECTED: Accepted but not tracked; the ignored counter goes up
#[tokio::test]
async fn test_outcomes_for_unknown_pairs_are_not_tracked() {
    let (app, gateway) = app().await;
    let tracked = gateway.tracker().len();

    let response = app
        .oneshot(post_json(
            "/outcomes",
            json!({"provider_id": "ghost", "model_id": "m9", "latency_ms": 10.0, "success": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(gateway.tracker().len(), tracked);
    assert_eq!(gateway.metrics().outcomes_ignored_count(), 1);
}

/// SCENARIO: GET /health and GET /metrics on a fresh gateway
///
/// EXPECTED: Health reports routing off with operational persistence;
/// metrics expose the switchyard counters in text format.
#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let (app, _) = app().await;

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "OK");
    assert_eq!(health["routing_enabled"], false);
    assert_eq!(health["persistence_status"], "operational");

    // Route once so decision metrics have a sample
    app.clone()
        .oneshot(post_json("/route", json!({"content": "hi"})))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("switchyard_"), "metrics output: {text}");
}

/// SCENARIO: Unknown path
///
/// EXPECTED: 404
#[tokio::test]
async fn test_unknown_route_not_found() {
    let (app, _) = app().await;
    let response = app.oneshot(get("/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
