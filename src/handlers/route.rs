//! Routing decision and call outcome endpoints

use axum::{Extension, Json, extract::State, http::StatusCode};

use crate::error::{AppError, AppResult};
use crate::gateway::CallOutcome;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::router::{RouteRequest, RoutingDecision};

/// `POST /route`
///
/// Returns the decision for one request. The `x-request-id` of the HTTP
/// call becomes the decision's request id unless the body sets one.
///
/// # Response
/// - `200 OK` with the `RoutingDecision`
/// - `400 Bad Request` for an out-of-range complexity score
/// - `503 Service Unavailable` when no candidate is available
pub async fn route_handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(mut request): Json<RouteRequest>,
) -> AppResult<Json<RoutingDecision>> {
    let complexity = request.analysis.complexity_score;
    if !complexity.is_finite() || !(0.0..=100.0).contains(&complexity) {
        return Err(AppError::Validation(format!(
            "complexity_score must be within [0, 100], got {}",
            complexity
        )));
    }
    if request.request_id.is_none() {
        request.request_id = Some(request_id.to_string());
    }

    let decision = state.gateway().decide(&request)?;
    Ok(Json(decision))
}

/// `POST /outcomes`
///
/// Accepts the outcome of a completed upstream call for scoring and failover.
pub async fn outcome_handler(
    State(state): State<AppState>,
    Json(outcome): Json<CallOutcome>,
) -> AppResult<StatusCode> {
    if !outcome.latency_ms.is_finite() || outcome.latency_ms < 0.0 {
        return Err(AppError::Validation(format!(
            "latency_ms must be a non-negative number, got {}",
            outcome.latency_ms
        )));
    }
    state.gateway().record_outcome(&outcome);
    Ok(StatusCode::ACCEPTED)
}
