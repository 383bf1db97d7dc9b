//! Provider health probes against a mock upstream

use std::time::Duration;
use switchyard::models::catalog::ProviderRecord;
use switchyard::models::probe::{HttpProber, Prober};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(base_url: String) -> ProviderRecord {
    ProviderRecord {
        id: "mock".to_string(),
        kind: "openai".to_string(),
        base_url,
        weight: 1.0,
        priority: 1,
        active: true,
    }
}

/// SCENARIO: Upstream answers HEAD /v1/models with 200
///
/// EXPECTED: Healthy probe with a measured latency
#[tokio::test]
async fn test_probe_success_is_healthy() {
    // ARRANGE
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let prober = HttpProber::new(Duration::from_secs(2)).unwrap();

    // ACT: Trailing slash on the base URL is tolerated
    let outcome = prober
        .probe(&provider(format!("{}/v1/", server.uri())))
        .await;

    // ASSERT
    assert!(outcome.healthy);
    assert!(outcome.latency_ms >= 0.0);
}

/// SCENARIO: Upstream answers with 500
///
/// EXPECTED: Unhealthy probe
#[tokio::test]
async fn test_probe_server_error_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let prober = HttpProber::new(Duration::from_secs(2)).unwrap();

    let outcome = prober.probe(&provider(format!("{}/v1", server.uri()))).await;

    assert!(!outcome.healthy);
}

/// SCENARIO: Upstream responds slower than the probe timeout
///
/// EXPECTED: Unhealthy probe rather than a hang
#[tokio::test]
async fn test_probe_timeout_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    let prober = HttpProber::new(Duration::from_millis(200)).unwrap();

    let outcome = prober.probe(&provider(format!("{}/v1", server.uri()))).await;

    assert!(!outcome.healthy);
}

/// SCENARIO: Nothing listens at the provider address
///
/// EXPECTED: Unhealthy probe
#[tokio::test]
async fn test_probe_connection_refused_is_unhealthy() {
    let prober = HttpProber::new(Duration::from_secs(1)).unwrap();

    let outcome = prober
        .probe(&provider("http://127.0.0.1:9/v1".to_string()))
        .await;

    assert!(!outcome.healthy);
}
