//! Gateway facade
//!
//! Wires the routing switch, rule matcher, performance tracker, failover
//! supervisor and routing agent together and owns their background tasks.

use crate::clock::{SharedClock, TokioClock};
use crate::collaborators::{
    Alert, AlertSink, Authorizer, BudgetGuard, NoBudgetLimit, StaticAuthorizer, TracingAlertSink,
};
use crate::config::Config;
use crate::error::{AppError, AppResult, RoutingError, RuleError};
use crate::metrics::Metrics;
use crate::models::catalog::{CandidateKey, CatalogError, CatalogSnapshot, CatalogSource, StaticCatalog};
use crate::models::health::{FailoverState, FailoverSupervisor};
use crate::models::load::{InflightGuard, LoadTracker};
use crate::models::performance::{Observation, PerformanceTracker};
use crate::models::probe::{HttpProber, Prober};
use crate::orchestrator::{GatewayOrchestrator, OrchestratorDeps};
use crate::router::{
    AgentDeps, DecisionReason, RouteRequest, RoutingAgent, RoutingDecision, RoutingRule,
    RuleMatcher,
};
use crate::store::{DurableStore, MemoryStore, with_retry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of one upstream call, reported after it completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub provider_id: String,
    pub model_id: String,
    pub latency_ms: f64,
    pub success: bool,
    /// Cost normalized to `[0, 1]`
    #[serde(default = "default_cost_normalized")]
    pub cost_normalized: f64,
    #[serde(default = "default_load_percent")]
    pub load_percent: f64,
}

fn default_cost_normalized() -> f64 {
    0.5
}

fn default_load_percent() -> f64 {
    50.0
}

/// Failover state of one provider with its current traffic share
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    #[serde(flatten)]
    pub state: FailoverState,
    pub traffic_share: f64,
}

#[derive(Debug, Clone)]
struct GatewaySettings {
    default_provider: Option<String>,
    default_model: Option<String>,
    catalog_refresh: Duration,
    decay_interval: Duration,
    persist_attempts: u32,
    persist_base_delay: Duration,
}

/// Builder for [`Gateway`]
///
/// Every collaborator has a single-node default: an in-memory store, a
/// logging alert sink, the config's providers as catalog and HTTP probes.
pub struct GatewayBuilder {
    config: Config,
    store: Option<Arc<dyn DurableStore>>,
    alerts: Option<Arc<dyn AlertSink>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    budget: Option<Arc<dyn BudgetGuard>>,
    catalog: Option<Arc<dyn CatalogSource>>,
    prober: Option<Arc<dyn Prober>>,
    clock: Option<SharedClock>,
}

impl GatewayBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            alerts: None,
            authorizer: None,
            budget: None,
            catalog: None,
            prober: None,
            clock: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn budget(mut self, budget: Arc<dyn BudgetGuard>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CatalogSource>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Assemble the gateway
    ///
    /// Loads the switch state and rules from the store and installs the
    /// first catalog snapshot. Background tasks are not started here; see
    /// [`Gateway::start`].
    pub async fn build(self) -> AppResult<Arc<Gateway>> {
        let config = self.config;
        let metrics = Arc::new(
            Metrics::new().map_err(|e| AppError::Internal(format!("metrics registry: {}", e)))?,
        );
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock::new()));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let alerts = self.alerts.unwrap_or_else(|| Arc::new(TracingAlertSink));
        let authorizer = self
            .authorizer
            .unwrap_or_else(|| Arc::new(StaticAuthorizer::new(config.switch.admins.clone())));
        let budget = self.budget.unwrap_or_else(|| Arc::new(NoBudgetLimit));
        let catalog_source = self
            .catalog
            .unwrap_or_else(|| Arc::new(StaticCatalog::from_config(&config)));
        let failover_settings = config.failover_settings();
        let prober = match self.prober {
            Some(prober) => prober,
            None => Arc::new(HttpProber::new(failover_settings.probe_timeout).map_err(|e| {
                AppError::Internal(format!("failed to build probe HTTP client: {}", e))
            })?),
        };

        let switch_settings = config.switch_settings();
        let orchestrator = GatewayOrchestrator::load(
            OrchestratorDeps {
                authorizer,
                store: store.clone(),
                alerts: alerts.clone(),
                metrics: metrics.clone(),
                clock: clock.clone(),
            },
            switch_settings.clone(),
        )
        .await;

        let rules = Arc::new(RuleMatcher::new(metrics.clone(), alerts.clone()));
        match store.load_rules().await {
            Ok(Some(stored)) => {
                tracing::info!(rules = stored.len(), "Restored routing rules from store");
                rules.restore(stored);
            }
            Ok(None) => rules.replace_all(config.rules.clone())?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load routing rules, using configured rules");
                rules.replace_all(config.rules.clone())?;
            }
        }

        let tracker = Arc::new(PerformanceTracker::new(
            config.tracker_settings(),
            clock.clone(),
        ));
        let supervisor = Arc::new(FailoverSupervisor::new(
            failover_settings,
            clock.clone(),
            alerts.clone(),
            metrics.clone(),
        ));
        let load = Arc::new(LoadTracker::new());

        let (audit_tx, audit_rx) = mpsc::channel(config.routing.audit_queue_capacity);
        let agent = Arc::new(RoutingAgent::new(
            AgentDeps {
                rules: rules.clone(),
                tracker: tracker.clone(),
                supervisor: supervisor.clone(),
                load: load.clone(),
                budget,
                alerts: alerts.clone(),
                metrics: metrics.clone(),
                clock: clock.clone(),
            },
            config.agent_settings(),
            audit_tx,
        ));

        match catalog_source.snapshot().await {
            Ok(snapshot) => {
                agent.set_catalog(snapshot);
            }
            Err(e) => tracing::warn!(error = %e, "Initial catalog fetch failed, starting empty"),
        }

        let gateway = Gateway {
            orchestrator,
            agent,
            rules,
            tracker,
            supervisor,
            load,
            metrics,
            store,
            alerts,
            catalog_source,
            prober,
            clock,
            settings: GatewaySettings {
                default_provider: config.routing.default_provider.clone(),
                default_model: config.routing.default_model.clone(),
                catalog_refresh: Duration::from_secs(config.routing.catalog_refresh_seconds),
                decay_interval: Duration::from_secs(config.performance.decay_interval_seconds),
                persist_attempts: switch_settings.persist_attempts,
                persist_base_delay: switch_settings.persist_base_delay,
            },
            audit_rx: Mutex::new(Some(audit_rx)),
            rule_edits: tokio::sync::Mutex::new(()),
            probed: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        };

        tracing::info!(
            providers = gateway.agent.catalog().providers.len(),
            rules = gateway.rules.list().len(),
            routing_enabled = gateway.orchestrator.snapshot().enabled,
            "Gateway assembled"
        );
        Ok(Arc::new(gateway))
    }
}

/// The routing core behind one gateway instance
pub struct Gateway {
    orchestrator: Arc<GatewayOrchestrator>,
    agent: Arc<RoutingAgent>,
    rules: Arc<RuleMatcher>,
    tracker: Arc<PerformanceTracker>,
    supervisor: Arc<FailoverSupervisor>,
    load: Arc<LoadTracker>,
    metrics: Arc<Metrics>,
    store: Arc<dyn DurableStore>,
    alerts: Arc<dyn AlertSink>,
    catalog_source: Arc<dyn CatalogSource>,
    prober: Arc<dyn Prober>,
    clock: SharedClock,
    settings: GatewaySettings,
    audit_rx: Mutex<Option<mpsc::Receiver<RoutingDecision>>>,
    /// Serializes rule edits with their persistence
    rule_edits: tokio::sync::Mutex<()>,
    /// Providers with a running probe loop
    probed: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("orchestrator", &self.orchestrator)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn builder(config: Config) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn orchestrator(&self) -> &Arc<GatewayOrchestrator> {
        &self.orchestrator
    }

    pub fn agent(&self) -> &Arc<RoutingAgent> {
        &self.agent
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn supervisor(&self) -> &Arc<FailoverSupervisor> {
        &self.supervisor
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Catalog snapshot currently routed over
    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.agent.catalog()
    }

    /// Choose a (provider, model) pair for a request
    ///
    /// While the routing switch is off the request goes straight to the
    /// default target and the agent is never consulted.
    ///
    /// # Errors
    /// Returns `NoHealthyCandidate` when the catalog has no active pair.
    pub fn decide(&self, request: &RouteRequest) -> Result<RoutingDecision, RoutingError> {
        if self.orchestrator.get_effective_state(self.clock.now()) {
            self.agent.route(request)
        } else {
            self.direct_decision(request)
        }
    }

    fn direct_decision(&self, request: &RouteRequest) -> Result<RoutingDecision, RoutingError> {
        let started = Instant::now();
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let Some(key) = self.default_target() else {
            tracing::error!(request_id = %request_id, "No active pair for direct routing");
            self.metrics.no_healthy_candidate();
            self.alerts.raise(Alert::NoHealthyCandidate {
                request_id: request_id.clone(),
            });
            return Err(RoutingError::NoHealthyCandidate { request_id });
        };

        let decision = RoutingDecision {
            request_id,
            total_score: self.agent.weighted_score(request, &key.provider_id, &key),
            expected_latency_ms: self.tracker.expected_latency_ms(&key),
            selected_provider_id: key.provider_id,
            selected_model_id: key.model_id,
            matched_rule_id: None,
            reason: DecisionReason::RoutingDisabled,
            timestamp: self.clock.now(),
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = self.metrics.record_decision(decision.reason, duration_ms) {
            tracing::warn!(error = %e, "Failed to record routing decision metric");
            self.metrics.metrics_recording_failure("record_decision");
        }
        tracing::debug!(
            request_id = %decision.request_id,
            provider_id = %decision.selected_provider_id,
            model_id = %decision.selected_model_id,
            "Routing disabled, using default target"
        );

        self.agent.publish(&decision);
        Ok(decision)
    }

    /// Configured default pair, else the highest priority and weight pair
    ///
    /// Pairs whose provider has traffic share are preferred.
    fn default_target(&self) -> Option<CandidateKey> {
        let catalog = self.agent.catalog();
        let defaults = &self.settings;
        let matches_default = |provider_id: &str, model_id: &str| {
            defaults.default_provider.as_deref() == Some(provider_id)
                && defaults
                    .default_model
                    .as_deref()
                    .is_none_or(|default| default == model_id)
        };

        catalog
            .active_pairs()
            .max_by(|(pa, ma), (pb, mb)| {
                let healthy_a = self.supervisor.traffic_share(&pa.id) > 0.0;
                let healthy_b = self.supervisor.traffic_share(&pb.id) > 0.0;
                healthy_a
                    .cmp(&healthy_b)
                    .then(matches_default(&pa.id, &ma.model_id).cmp(&matches_default(&pb.id, &mb.model_id)))
                    .then(ma.priority.cmp(&mb.priority))
                    .then(ma.weight.total_cmp(&mb.weight))
                    .then(pb.id.cmp(&pa.id))
                    .then(mb.model_id.cmp(&ma.model_id))
            })
            .map(|(_, model)| CandidateKey::from(model))
    }

    /// Feed a completed call into scoring and failover
    ///
    /// Outcomes for pairs that are not active in the current catalog are
    /// dropped and counted, so callers cannot grow the score table.
    /// Returns whether the outcome was recorded.
    pub fn record_outcome(&self, outcome: &CallOutcome) -> bool {
        let key = CandidateKey::new(outcome.provider_id.clone(), outcome.model_id.clone());
        if self.agent.catalog().active_pair(&key).is_none() {
            self.metrics.outcome_ignored();
            tracing::debug!(
                provider_id = %outcome.provider_id,
                model_id = %outcome.model_id,
                "Ignoring outcome for a pair outside the active catalog"
            );
            return false;
        }

        let score = self.tracker.record_outcome(
            &key,
            Observation {
                latency_ms: outcome.latency_ms,
                success: outcome.success,
                cost_normalized: outcome.cost_normalized,
                load_percent: outcome.load_percent,
            },
        );
        let transition = self
            .supervisor
            .record_result(&outcome.provider_id, outcome.success);

        tracing::debug!(
            provider_id = %outcome.provider_id,
            model_id = %outcome.model_id,
            success = outcome.success,
            latency_ms = outcome.latency_ms,
            total_score = score.total_score,
            transition = ?transition,
            "Call outcome recorded"
        );
        true
    }

    /// Count a call in flight until the guard is dropped
    pub fn begin_call(&self, decision: &RoutingDecision) -> InflightGuard {
        self.load.begin(&CandidateKey::new(
            decision.selected_provider_id.clone(),
            decision.selected_model_id.clone(),
        ))
    }

    /// Calls currently in flight for one pair
    pub fn inflight(&self, provider_id: &str, model_id: &str) -> u64 {
        self.load.inflight(&CandidateKey::new(provider_id, model_id))
    }

    /// Failover state and traffic share of every known provider
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.supervisor
            .all_states()
            .into_iter()
            .map(|(state, traffic_share)| ProviderHealth {
                state,
                traffic_share,
            })
            .collect()
    }

    /// Fetch a fresh catalog and install it
    ///
    /// Returns the number of newly seen (provider, model) pairs.
    pub async fn refresh_catalog(&self) -> Result<usize, CatalogError> {
        let snapshot = self.catalog_source.snapshot().await?;
        Ok(self.agent.set_catalog(snapshot))
    }

    pub fn list_rules(&self) -> Vec<RoutingRule> {
        self.rules.list()
    }

    /// Create a rule; its id is always assigned by the matcher
    pub async fn create_rule(&self, mut rule: RoutingRule) -> Result<RoutingRule, RuleError> {
        let _edit = self.rule_edits.lock().await;
        rule.id = 0;
        let created = self.rules.upsert(rule)?;
        tracing::info!(rule_id = created.id, name = %created.name, "Routing rule created");
        self.persist_rules().await;
        Ok(created)
    }

    /// Replace an existing rule
    pub async fn update_rule(&self, id: u64, mut rule: RoutingRule) -> Result<RoutingRule, RuleError> {
        let _edit = self.rule_edits.lock().await;
        if self.rules.get(id).is_none() {
            return Err(RuleError::NotFound(id));
        }
        rule.id = id;
        let updated = self.rules.upsert(rule)?;
        tracing::info!(rule_id = id, name = %updated.name, "Routing rule updated");
        self.persist_rules().await;
        Ok(updated)
    }

    pub async fn delete_rule(&self, id: u64) -> Result<RoutingRule, RuleError> {
        let _edit = self.rule_edits.lock().await;
        let removed = self.rules.remove(id)?;
        tracing::info!(rule_id = id, "Routing rule deleted");
        self.persist_rules().await;
        Ok(removed)
    }

    /// Write the rule list (with hit counts) to the store; best-effort
    async fn persist_rules(&self) {
        let rules = self.rules.list();
        let store = &self.store;
        let saved = with_retry(
            "save_rules",
            self.settings.persist_attempts,
            self.settings.persist_base_delay,
            || store.save_rules(&rules),
        )
        .await;
        if let Err(e) = saved {
            self.metrics.persistence_failure("save_rules");
            self.alerts.raise(Alert::PersistenceFailed {
                operation: "save_rules".to_string(),
                error: e.to_string(),
            });
        }
    }

    /// Spawn the background tasks
    ///
    /// The decay tick, one probe loop per provider, the catalog refresh
    /// loop and the audit writer all stop when `shutdown` is cancelled;
    /// the switch's pending commit is cancelled with them. Calling `start`
    /// twice does not start a second audit writer.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let mut tasks = Vec::new();

        tasks.push(
            self.tracker
                .clone()
                .spawn_decay_loop(self.settings.decay_interval, shutdown.clone()),
        );

        for provider in self.agent.catalog().providers.iter().filter(|p| p.active) {
            if let Some(task) = self.spawn_probe(provider.id.as_str(), &shutdown) {
                tasks.push(task);
            }
        }

        tasks.push(self.spawn_catalog_refresh(shutdown.clone()));

        if let Some(audit_rx) = self.audit_rx.lock().take() {
            tasks.push(spawn_audit_writer(
                audit_rx,
                self.store.clone(),
                self.metrics.clone(),
                shutdown.clone(),
            ));
        }

        let orchestrator = self.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            shutdown.cancelled().await;
            orchestrator.shutdown();
        }));

        tracing::info!(tasks = tasks.len(), "Gateway background tasks started");
        self.tasks.lock().extend(tasks);
    }

    fn spawn_probe(&self, provider_id: &str, shutdown: &CancellationToken) -> Option<JoinHandle<()>> {
        if !self.probed.lock().insert(provider_id.to_string()) {
            return None;
        }
        let provider = self.agent.catalog().provider(provider_id)?.clone();
        Some(
            self.supervisor
                .clone()
                .spawn_probe_loop(provider, self.prober.clone(), shutdown.clone()),
        )
    }

    fn spawn_catalog_refresh(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let interval = self.settings.catalog_refresh;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match gateway.refresh_catalog().await {
                    Ok(added) => {
                        let catalog = gateway.agent.catalog();
                        let mut started = Vec::new();
                        for provider in catalog.providers.iter().filter(|p| p.active) {
                            if let Some(task) = gateway.spawn_probe(&provider.id, &shutdown) {
                                started.push(task);
                            }
                        }
                        if added > 0 || !started.is_empty() {
                            tracing::info!(
                                added_pairs = added,
                                new_probes = started.len(),
                                "Catalog refreshed"
                            );
                        }
                        gateway.tasks.lock().extend(started);
                    }
                    Err(e) => tracing::warn!(error = %e, "Catalog refresh failed, keeping previous snapshot"),
                }
            }
            tracing::debug!("Catalog refresh loop stopped");
        })
    }

    /// Wait for background tasks after the shutdown token was cancelled
    ///
    /// Flushes the rule list so hit counts survive a restart.
    pub async fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        }
        self.persist_rules().await;
        tracing::info!("Gateway stopped");
    }
}

fn spawn_audit_writer(
    mut audit_rx: mpsc::Receiver<RoutingDecision>,
    store: Arc<dyn DurableStore>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let decision = tokio::select! {
                _ = shutdown.cancelled() => break,
                decision = audit_rx.recv() => match decision {
                    Some(decision) => decision,
                    None => break,
                },
            };
            save_decision(store.as_ref(), &metrics, &decision).await;
        }

        // Flush what was queued before shutdown
        while let Ok(decision) = audit_rx.try_recv() {
            save_decision(store.as_ref(), &metrics, &decision).await;
        }
        tracing::debug!("Audit writer stopped");
    })
}

async fn save_decision(store: &dyn DurableStore, metrics: &Metrics, decision: &RoutingDecision) {
    if let Err(e) = store.save_decision(decision).await {
        tracing::warn!(
            request_id = %decision.request_id,
            error = %e,
            "Failed to persist routing decision"
        );
        metrics.persistence_failure("save_decision");
    }
}
