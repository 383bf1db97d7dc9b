//! Contracts for the collaborators around the routing core
//!
//! Authorization, alerting and budgeting live outside this crate. The core
//! only depends on the traits below; the provided implementations cover
//! single-node deployments and tests.

use crate::models::catalog::{ModelRecord, ProviderRecord};
use crate::router::RouteRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;

/// Authorization collaborator consulted before a switch toggle
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_admin_capability(&self, caller: &str) -> bool;
}

/// Authorizer backed by a fixed set of admin caller ids
///
/// An empty set admits every caller.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    admins: HashSet<String>,
}

impl StaticAuthorizer {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }

    /// Authorizer that admits everyone
    pub fn allow_all() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn has_admin_capability(&self, caller: &str) -> bool {
        self.admins.is_empty() || self.admins.contains(caller)
    }
}

/// Which signal drove a provider into `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    Requests,
    Probes,
}

/// Alerts raised to the observability collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// Critical: a provider stopped receiving traffic
    ProviderFailed {
        provider_id: String,
        consecutive_failures: u32,
        source: FailureSource,
    },
    CooldownRejected {
        requested_by: String,
        remaining_seconds: u64,
    },
    NoHealthyCandidate { request_id: String },
    PersistenceFailed { operation: String, error: String },
    RuleEvaluationFailed { rule_id: u64, error: String },
}

/// Observability collaborator; `raise` must never block the caller
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// Alert sink that writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        match &alert {
            Alert::ProviderFailed {
                provider_id,
                consecutive_failures,
                source,
            } => tracing::error!(
                provider_id = %provider_id,
                consecutive_failures,
                source = ?source,
                "CRITICAL: provider marked failed, traffic withdrawn"
            ),
            Alert::CooldownRejected {
                requested_by,
                remaining_seconds,
            } => tracing::warn!(
                requested_by = %requested_by,
                remaining_seconds,
                "Routing switch toggle rejected by cooldown"
            ),
            Alert::NoHealthyCandidate { request_id } => tracing::error!(
                request_id = %request_id,
                "No healthy candidate available for request"
            ),
            Alert::PersistenceFailed { operation, error } => tracing::error!(
                operation = %operation,
                error = %error,
                "Durable store write failed after retries"
            ),
            Alert::RuleEvaluationFailed { rule_id, error } => tracing::warn!(
                rule_id,
                error = %error,
                "Routing rule skipped during evaluation"
            ),
        }
    }
}

/// Alert sink that keeps every alert in memory
///
/// Used by tests and by embedders that poll for alerts.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all alerts raised so far
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Budget predicate supplied by the Cost Agent
///
/// Evaluated for every candidate during routing, so implementations must
/// answer from local state.
pub trait BudgetGuard: Send + Sync {
    fn allows(&self, request: &RouteRequest, provider: &ProviderRecord, model: &ModelRecord)
    -> bool;
}

/// Budget guard that never excludes a candidate
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBudgetLimit;

impl BudgetGuard for NoBudgetLimit {
    fn allows(&self, _: &RouteRequest, _: &ProviderRecord, _: &ModelRecord) -> bool {
        true
    }
}
