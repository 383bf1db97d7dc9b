//! Routing rule administration endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::router::RoutingRule;

/// `GET /rules`, in evaluation order
pub async fn list_handler(State(state): State<AppState>) -> Json<Vec<RoutingRule>> {
    Json(state.gateway().list_rules())
}

/// `POST /rules`; the id in the body is ignored
pub async fn create_handler(
    State(state): State<AppState>,
    Json(rule): Json<RoutingRule>,
) -> AppResult<(StatusCode, Json<RoutingRule>)> {
    let created = state.gateway().create_rule(rule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PUT /rules/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(rule): Json<RoutingRule>,
) -> AppResult<Json<RoutingRule>> {
    Ok(Json(state.gateway().update_rule(id, rule).await?))
}

/// `DELETE /rules/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> AppResult<StatusCode> {
    state.gateway().delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
