//! HTTP request handlers for the Switchyard API

use crate::gateway::Gateway;
use crate::middleware::request_id_middleware;
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod health;
pub mod metrics;
pub mod providers;
pub mod route;
pub mod rules;
pub mod switch;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}

/// Build the HTTP router with every route and middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/route", post(route::route_handler))
        .route("/outcomes", post(route::outcome_handler))
        .route("/switch", get(switch::status_handler))
        .route("/switch/toggle", post(switch::toggle_handler))
        .route("/switch/history", get(switch::history_handler))
        .route("/switch/metrics", get(switch::metrics_handler))
        .route(
            "/rules",
            get(rules::list_handler).post(rules::create_handler),
        )
        .route(
            "/rules/{id}",
            put(rules::update_handler).delete(rules::delete_handler),
        )
        .route("/providers/health", get(providers::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
