//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::{extract::State, http::StatusCode};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if metrics collection fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP switchyard_routing_decisions_total Total routing decisions by reason
/// # TYPE switchyard_routing_decisions_total counter
/// switchyard_routing_decisions_total{reason="scored"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    match state.gateway().metrics().gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use crate::router::RouteRequest;

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let state = test_support::state().await;
        state
            .gateway()
            .decide(&RouteRequest::new("hello"))
            .unwrap();

        let (status, body) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("switchyard_routing_decisions_total"));
        assert!(body.contains("reason=\"routing_disabled\""));
    }
}
