//! Routing switch endpoints

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::orchestrator::{SwitchHistoryEntry, SwitchMetrics, SwitchStatus, ToggleAck, ToggleRequest};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1000;

/// `GET /switch`
pub async fn status_handler(State(state): State<AppState>) -> Json<SwitchStatus> {
    let gateway = state.gateway();
    Json(gateway.orchestrator().status(gateway.clock().now()))
}

/// `POST /switch/toggle`
///
/// # Response
/// - `202 Accepted` with the pending commit's generation and effective time
/// - `403 Forbidden` when the caller lacks the admin capability
/// - `429 Too Many Requests` with `remaining_seconds` during the cooldown
pub async fn toggle_handler(
    State(state): State<AppState>,
    Json(request): Json<ToggleRequest>,
) -> AppResult<(StatusCode, Json<ToggleAck>)> {
    let ack = state.gateway().orchestrator().request_toggle(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// `GET /switch/history?limit=`, most recent first
pub async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<SwitchHistoryEntry>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    Json(state.gateway().orchestrator().get_history(limit))
}

/// `GET /switch/metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Json<SwitchMetrics> {
    let gateway = state.gateway();
    Json(gateway.orchestrator().get_metrics(gateway.clock().now()))
}
