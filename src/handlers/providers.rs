//! Provider failover state endpoint

use axum::{Json, extract::State};

use crate::gateway::ProviderHealth;
use crate::handlers::AppState;

/// `GET /providers/health`
///
/// Failover status, counters and current traffic share per provider.
pub async fn handler(State(state): State<AppState>) -> Json<Vec<ProviderHealth>> {
    Json(state.gateway().provider_health())
}
