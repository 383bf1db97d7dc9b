//! Prometheus metrics collection for switchyard
//!
//! This module provides metrics instrumentation for tracking:
//! - Routing decisions by reason and their latency
//! - Routing switch requests, commits and cooldown rejections
//! - Failover transitions and rule evaluation errors
//! - Dropped audit records and durable store failures
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::models::health::FailoverStatus;
use crate::orchestrator::HistoryKind;
use crate::router::DecisionReason;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for switchyard
///
/// Labels are always derived from enums so cardinality is fixed at compile
/// time.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    routing_decisions: CounterVec,
    routing_duration: HistogramVec,
    no_healthy_candidate: IntCounter,
    switch_events: IntCounterVec,
    cooldown_rejections: IntCounter,
    failover_transitions: IntCounterVec,
    rule_evaluation_errors: IntCounter,
    audit_dropped: IntCounter,
    outcomes_ignored: IntCounter,
    persistence_failures: IntCounterVec,
    metrics_recording_failures: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 5 decision reasons
        let routing_decisions = CounterVec::new(
            Opts::new(
                "switchyard_routing_decisions_total",
                "Total routing decisions by reason",
            ),
            &["reason"],
        )?;

        let routing_duration = HistogramVec::new(
            HistogramOpts::new(
                "switchyard_routing_duration_ms",
                "Routing decision latency in milliseconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0]),
            &["reason"],
        )?;

        // Alert on any sustained increase: requests are being refused
        let no_healthy_candidate = IntCounter::with_opts(Opts::new(
            "switchyard_no_healthy_candidate_total",
            "Requests refused because no provider could serve them",
        ))?;

        let switch_events = IntCounterVec::new(
            Opts::new(
                "switchyard_switch_events_total",
                "Routing switch history entries by kind (requested, committed)",
            ),
            &["kind"],
        )?;

        let cooldown_rejections = IntCounter::with_opts(Opts::new(
            "switchyard_cooldown_rejections_total",
            "Toggle requests rejected because the cooldown window was still open",
        ))?;

        let failover_transitions = IntCounterVec::new(
            Opts::new(
                "switchyard_failover_transitions_total",
                "Provider failover transitions by destination status",
            ),
            &["status"],
        )?;

        let rule_evaluation_errors = IntCounter::with_opts(Opts::new(
            "switchyard_rule_evaluation_errors_total",
            "Routing rules skipped during evaluation because they could not be compiled",
        ))?;

        let audit_dropped = IntCounter::with_opts(Opts::new(
            "switchyard_audit_dropped_total",
            "Routing decisions dropped before reaching the durable store",
        ))?;

        let outcomes_ignored = IntCounter::with_opts(Opts::new(
            "switchyard_outcomes_ignored_total",
            "Call outcomes dropped because the pair is not an active catalog entry",
        ))?;

        // Labels: operation (save_switch_state, append_switch_history, save_decision, save_rules)
        let persistence_failures = IntCounterVec::new(
            Opts::new(
                "switchyard_persistence_failures_total",
                "Durable store writes that failed after all retries",
            ),
            &["operation"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "switchyard_metrics_recording_failures_total",
                "Metrics recording operation failures by operation. \
                Indicates Prometheus internal errors.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(routing_decisions.clone()))?;
        registry.register(Box::new(routing_duration.clone()))?;
        registry.register(Box::new(no_healthy_candidate.clone()))?;
        registry.register(Box::new(switch_events.clone()))?;
        registry.register(Box::new(cooldown_rejections.clone()))?;
        registry.register(Box::new(failover_transitions.clone()))?;
        registry.register(Box::new(rule_evaluation_errors.clone()))?;
        registry.register(Box::new(audit_dropped.clone()))?;
        registry.register(Box::new(outcomes_ignored.clone()))?;
        registry.register(Box::new(persistence_failures.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            routing_decisions,
            routing_duration,
            no_healthy_candidate,
            switch_events,
            cooldown_rejections,
            failover_transitions,
            rule_evaluation_errors,
            audit_dropped,
            outcomes_ignored,
            persistence_failures,
            metrics_recording_failures,
        })
    }

    /// Record a routing decision and how long it took
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite or negative, or if
    /// the metric is not registered.
    pub fn record_decision(
        &self,
        reason: DecisionReason,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }

        self.routing_decisions
            .get_metric_with_label_values(&[reason.as_str()])?
            .inc();
        self.routing_duration
            .get_metric_with_label_values(&[reason.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    /// Record a request refused with `NoHealthyCandidate`
    pub fn no_healthy_candidate(&self) {
        self.no_healthy_candidate.inc();
    }

    pub fn no_healthy_candidate_count(&self) -> u64 {
        self.no_healthy_candidate.get()
    }

    /// Record a routing switch history entry
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_switch_event(&self, kind: HistoryKind) -> Result<(), prometheus::Error> {
        self.switch_events
            .get_metric_with_label_values(&[kind.as_str()])?
            .inc();
        Ok(())
    }

    pub fn cooldown_rejection(&self) {
        self.cooldown_rejections.inc();
    }

    pub fn cooldown_rejections_count(&self) -> u64 {
        self.cooldown_rejections.get()
    }

    /// Record a provider entering `status`
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_failover_transition(
        &self,
        status: FailoverStatus,
    ) -> Result<(), prometheus::Error> {
        self.failover_transitions
            .get_metric_with_label_values(&[status.as_str()])?
            .inc();
        Ok(())
    }

    pub fn rule_evaluation_error(&self) {
        self.rule_evaluation_errors.inc();
    }

    pub fn rule_evaluation_errors_count(&self) -> u64 {
        self.rule_evaluation_errors.get()
    }

    pub fn audit_dropped(&self) {
        self.audit_dropped.inc();
    }

    pub fn audit_dropped_count(&self) -> u64 {
        self.audit_dropped.get()
    }

    pub fn outcome_ignored(&self) {
        self.outcomes_ignored.inc();
    }

    pub fn outcomes_ignored_count(&self) -> u64 {
        self.outcomes_ignored.get()
    }

    /// Record a durable store write that failed after all retries
    ///
    /// `operation` must be one of the store method names.
    pub fn persistence_failure(&self, operation: &str) {
        self.persistence_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total persistence failures across all operations
    pub fn persistence_failures_count(&self) -> u64 {
        self.sum_counter("switchyard_persistence_failures_total")
    }

    /// Record a metrics recording operation failure
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.sum_counter("switchyard_metrics_recording_failures_total")
    }

    fn sum_counter(&self, name: &str) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == name)
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_count,
                    "Prometheus text encoder failed"
                );
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_count, e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                e.utf8_error().valid_up_to(),
                e
            ))
        })
    }
}
