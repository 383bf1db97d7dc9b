//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Whether intelligent routing is in effect
    pub routing_enabled: bool,
    /// "operational", or "degraded" once a store write has failed for good
    pub persistence_status: &'static str,
}

/// Health check handler
///
/// Always returns 200 OK; persistence trouble is reported in the body so
/// load balancers keep sending traffic to a node that can still route.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let gateway = state.gateway();
    let orchestrator = gateway.orchestrator();
    let persistence_status = if orchestrator.is_persistence_inconsistent()
        || gateway.metrics().persistence_failures_count() > 0
    {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            routing_enabled: orchestrator.get_effective_state(gateway.clock().now()),
            persistence_status,
        }),
    )
}
