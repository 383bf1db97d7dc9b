//! Routing agent: candidate filtering, scoring and selection
//!
//! # Routing Logic
//! 1. A request pinned to an active pair with traffic share is served directly.
//! 2. A matching custom rule narrows the candidates to its target.
//! 3. Otherwise every active pair with traffic share, fit for the request's
//!    complexity and allowed by the budget guard, is a candidate.
//! 4. With no candidates left, the least-failed provider is used.
//! 5. Candidates are scored and one is drawn from the epsilon tier.
//!
//! `route` only reads locally cached state and never awaits. The decision is
//! handed to the audit writer through a bounded queue and dropped when the
//! queue is full.

use super::rules::{ActionType, RoutingRule, RuleMatcher};
use super::scoring::{candidate_score, weights_for};
use super::selection::{ScoredCandidate, epsilon_tier, select_from_tier};
use super::{DecisionReason, RouteRequest, RoutingDecision};
use crate::clock::SharedClock;
use crate::collaborators::{Alert, AlertSink, BudgetGuard};
use crate::error::RoutingError;
use crate::metrics::Metrics;
use crate::models::catalog::{CandidateKey, CatalogSnapshot, ModelRecord, ProviderRecord};
use crate::models::health::FailoverSupervisor;
use crate::models::load::LoadTracker;
use crate::models::performance::PerformanceTracker;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Routing agent tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    /// Width of the weighted-random tier below the top score
    pub epsilon: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { epsilon: 0.02 }
    }
}

/// Shared state the agent reads while routing
#[derive(Clone)]
pub struct AgentDeps {
    pub rules: Arc<RuleMatcher>,
    pub tracker: Arc<PerformanceTracker>,
    pub supervisor: Arc<FailoverSupervisor>,
    pub load: Arc<LoadTracker>,
    pub budget: Arc<dyn BudgetGuard>,
    pub alerts: Arc<dyn AlertSink>,
    pub metrics: Arc<Metrics>,
    pub clock: SharedClock,
}

struct Selection {
    key: CandidateKey,
    total_score: f64,
    expected_latency_ms: f64,
    reason: DecisionReason,
    matched_rule_id: Option<u64>,
}

/// Picks a (provider, model) pair per request
pub struct RoutingAgent {
    catalog: RwLock<Arc<CatalogSnapshot>>,
    deps: AgentDeps,
    settings: AgentSettings,
    audit: mpsc::Sender<RoutingDecision>,
}

impl std::fmt::Debug for RoutingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingAgent")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RoutingAgent {
    /// Create an agent publishing decisions to `audit`
    pub fn new(
        deps: AgentDeps,
        settings: AgentSettings,
        audit: mpsc::Sender<RoutingDecision>,
    ) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(CatalogSnapshot::default())),
            deps,
            settings,
            audit,
        }
    }

    /// Current catalog snapshot
    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.catalog.read().clone()
    }

    /// Swap in a new catalog snapshot
    ///
    /// Newly seen providers are registered with the failover supervisor and
    /// newly seen pairs start from neutral scores. Scores of pairs that left
    /// the catalog are dropped. Returns how many pairs were new.
    pub fn set_catalog(&self, snapshot: CatalogSnapshot) -> usize {
        let previous = self.catalog();
        let known: HashSet<CandidateKey> = previous.models.iter().map(CandidateKey::from).collect();
        let current: HashSet<CandidateKey> = snapshot.models.iter().map(CandidateKey::from).collect();
        for departed in known.difference(&current) {
            self.deps.tracker.forget(departed);
        }

        for provider in &snapshot.providers {
            self.deps.supervisor.register(&provider.id);
        }

        let mut added = 0;
        for model in &snapshot.models {
            let key = CandidateKey::from(model);
            if !known.contains(&key) {
                self.deps.tracker.reset(&key);
                added += 1;
            }
        }

        let providers = snapshot.providers.len();
        let models = snapshot.models.len();
        *self.catalog.write() = Arc::new(snapshot);

        tracing::debug!(providers, models, added_pairs = added, "Catalog snapshot installed");
        added
    }

    /// Route a request to one (provider, model) pair
    ///
    /// # Errors
    /// Returns `NoHealthyCandidate` when the catalog has no active pair at all.
    pub fn route(&self, request: &RouteRequest) -> Result<RoutingDecision, RoutingError> {
        let started = Instant::now();
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let catalog = self.catalog();

        let selection = self
            .route_pinned(&catalog, request)
            .or_else(|| self.route_by_rule(&catalog, request))
            .or_else(|| self.route_scored(&catalog, request))
            .or_else(|| self.route_fallback(&catalog, request));

        let Some(selection) = selection else {
            tracing::error!(
                request_id = %request_id,
                providers = catalog.providers.len(),
                "No healthy candidate available"
            );
            self.deps.metrics.no_healthy_candidate();
            self.deps.alerts.raise(Alert::NoHealthyCandidate {
                request_id: request_id.clone(),
            });
            return Err(RoutingError::NoHealthyCandidate { request_id });
        };

        let decision = RoutingDecision {
            request_id,
            selected_provider_id: selection.key.provider_id,
            selected_model_id: selection.key.model_id,
            matched_rule_id: selection.matched_rule_id,
            reason: selection.reason,
            expected_latency_ms: selection.expected_latency_ms,
            total_score: selection.total_score,
            timestamp: self.deps.clock.now(),
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = self.deps.metrics.record_decision(decision.reason, duration_ms) {
            tracing::warn!(error = %e, "Failed to record routing decision metric");
            self.deps.metrics.metrics_recording_failure("record_decision");
        }

        tracing::debug!(
            request_id = %decision.request_id,
            provider_id = %decision.selected_provider_id,
            model_id = %decision.selected_model_id,
            reason = decision.reason.as_str(),
            total_score = decision.total_score,
            duration_ms,
            "Routing decision made"
        );

        self.publish(&decision);
        Ok(decision)
    }

    /// Hand a decision to the audit writer without waiting
    ///
    /// Dropped (and counted) when the queue is full or closed.
    pub fn publish(&self, decision: &RoutingDecision) {
        match self.audit.try_send(decision.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(
                    request_id = %decision.request_id,
                    "Audit queue full, routing decision dropped"
                );
                self.deps.metrics.audit_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                self.deps.metrics.audit_dropped();
            }
        }
    }

    fn route_pinned(&self, catalog: &CatalogSnapshot, request: &RouteRequest) -> Option<Selection> {
        if request.provider_id.is_none() && request.model_id.is_none() {
            return None;
        }

        let pinned: Vec<_> = catalog
            .active_pairs()
            .filter(|(p, m)| {
                request.provider_id.as_ref().is_none_or(|id| *id == p.id)
                    && request.model_id.as_ref().is_none_or(|id| *id == m.model_id)
            })
            .filter(|(p, _)| self.deps.supervisor.traffic_share(&p.id) > 0.0)
            .collect();

        match pinned.as_slice() {
            [] => {
                tracing::warn!(
                    provider_id = ?request.provider_id,
                    model_id = ?request.model_id,
                    "Pinned target unavailable, routing normally"
                );
                None
            }
            [(provider, model)] => {
                let key = CandidateKey::from(*model);
                Some(Selection {
                    total_score: self.weighted_score(request, &provider.id, &key),
                    expected_latency_ms: self.deps.tracker.expected_latency_ms(&key),
                    key,
                    reason: DecisionReason::Explicit,
                    matched_rule_id: None,
                })
            }
            _ => self.select(&pinned, request, DecisionReason::Explicit, None),
        }
    }

    fn route_by_rule(&self, catalog: &CatalogSnapshot, request: &RouteRequest) -> Option<Selection> {
        let rule = self
            .deps
            .rules
            .match_rule(&request.content, request.analysis.complexity_score)?;

        let candidates: Vec<_> = catalog
            .active_pairs()
            .filter(|(p, m)| rule_targets(&rule, p, m))
            .filter(|(p, m)| self.eligible(request, p, m))
            .collect();

        if candidates.is_empty() {
            tracing::warn!(
                rule_id = rule.id,
                action_value = %rule.action_value,
                "Rule target has no eligible candidates, using full candidate set"
            );
            return None;
        }
        self.select(&candidates, request, DecisionReason::Rule, Some(rule.id))
    }

    fn route_scored(&self, catalog: &CatalogSnapshot, request: &RouteRequest) -> Option<Selection> {
        let candidates: Vec<_> = catalog
            .active_pairs()
            .filter(|(p, m)| self.eligible(request, p, m))
            .collect();
        self.select(&candidates, request, DecisionReason::Scored, None)
    }

    /// Least-failed provider when filtering left nothing
    fn route_fallback(
        &self,
        catalog: &CatalogSnapshot,
        request: &RouteRequest,
    ) -> Option<Selection> {
        let supervisor = &self.deps.supervisor;
        let rank = |provider: &ProviderRecord| {
            let state = supervisor.state(&provider.id);
            let failures = state.as_ref().map(|s| s.consecutive_failures).unwrap_or(0);
            let last_success = state.and_then(|s| s.last_success_at);
            (failures, Reverse(last_success))
        };
        let (_, model) = catalog.active_pairs().min_by(|(pa, ma), (pb, mb)| {
            rank(pa)
                .cmp(&rank(pb))
                .then(pa.id.cmp(&pb.id))
                .then(mb.priority.cmp(&ma.priority))
                .then(mb.weight.total_cmp(&ma.weight))
                .then(ma.model_id.cmp(&mb.model_id))
        })?;

        let key = CandidateKey::from(model);
        tracing::warn!(
            provider_id = %key.provider_id,
            model_id = %key.model_id,
            "No eligible candidates, falling back to least-failed provider"
        );
        Some(Selection {
            total_score: self.weighted_score(request, &model.provider_id, &key),
            expected_latency_ms: self.deps.tracker.expected_latency_ms(&key),
            key,
            reason: DecisionReason::Fallback,
            matched_rule_id: None,
        })
    }

    /// Score on the scale the epsilon tier ranks by
    pub fn weighted_score(
        &self,
        request: &RouteRequest,
        provider_id: &str,
        key: &CandidateKey,
    ) -> f64 {
        candidate_score(
            &self.deps.tracker.score(key),
            &weights_for(request.analysis.complexity_score, request.priority),
            self.deps.supervisor.traffic_share(provider_id),
        )
    }

        fn eligible(&self, request: &RouteRequest, provider: &ProviderRecord, model: &ModelRecord) -> bool {
        if self.deps.supervisor.traffic_share(&provider.id) <= 0.0 {
            return false;
        }
        if let Some(max_complexity) = model.max_complexity {
            if max_complexity < request.analysis.complexity_score {
                return false;
            }
        }
        self.deps.budget.allows(request, provider, model)
    }

    fn select(
        &self,
        pairs: &[(&ProviderRecord, &ModelRecord)],
        request: &RouteRequest,
        reason: DecisionReason,
        matched_rule_id: Option<u64>,
    ) -> Option<Selection> {
        if pairs.is_empty() {
            return None;
        }

        let weights = weights_for(request.analysis.complexity_score, request.priority);
        let scored: Vec<ScoredCandidate> = pairs
            .iter()
            .map(|(provider, model)| {
                let key = CandidateKey::from(*model);
                let share = self.deps.supervisor.traffic_share(&provider.id);
                let performance = self.deps.tracker.score(&key);
                ScoredCandidate {
                    score: candidate_score(&performance, &weights, share),
                    weight: model.weight,
                    inflight: self.deps.load.inflight(&key),
                    expected_latency_ms: self.deps.tracker.expected_latency_ms(&key),
                    key,
                }
            })
            .collect();

        let tier = epsilon_tier(scored, self.settings.epsilon);
        let chosen = select_from_tier(&tier, &mut rand::rng())?;

        tracing::trace!(
            candidates = pairs.len(),
            tier_size = tier.len(),
            selected = %chosen.key,
            score = chosen.score,
            "Selected candidate from epsilon tier"
        );

        Some(Selection {
            key: chosen.key.clone(),
            total_score: chosen.score,
            expected_latency_ms: chosen.expected_latency_ms,
            reason,
            matched_rule_id,
        })
    }
}

/// Whether a pair is the target of a rule's action
fn rule_targets(rule: &RoutingRule, provider: &ProviderRecord, model: &ModelRecord) -> bool {
    match rule.action_type {
        ActionType::UseProvider => provider.id == rule.action_value,
        ActionType::UseModel => match rule.action_value.split_once('/') {
            Some((provider_id, model_id)) if provider.id == provider_id => {
                model.model_id == model_id
            }
            _ => model.model_id == rule.action_value,
        },
    }
}
