//! Provider failover supervision
//!
//! Tracks a per-provider health state machine driven by request outcomes and
//! periodic probes:
//!
//! ```text
//! Active --(3 consecutive failures)--> Failed --(healthy probe)--> Recovering
//! Recovering --(ramp steps, each after a failure-free window)--> Active
//! Recovering --(any failure)--> Failed
//! ```
//!
//! Providers in `Failed` receive no traffic; `Recovering` providers receive
//! the ramp percentage of their current step.

use crate::clock::SharedClock;
use crate::collaborators::{Alert, AlertSink, FailureSource};
use crate::metrics::Metrics;
use crate::models::catalog::ProviderRecord;
use crate::models::probe::{ProbeOutcome, Prober};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Failover status of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStatus {
    Active,
    Failed,
    Recovering,
}

impl FailoverStatus {
    /// Convert status to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverStatus::Active => "active",
            FailoverStatus::Failed => "failed",
            FailoverStatus::Recovering => "recovering",
        }
    }
}

/// Health state for a single provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverState {
    pub provider_id: String,
    pub status: FailoverStatus,
    pub consecutive_failures: u32,
    pub consecutive_probe_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub recovery_step_index: usize,
    /// When the current recovery step began; `None` outside `Recovering`
    pub step_started_at: Option<DateTime<Utc>>,
    pub last_probe_latency_ms: Option<f64>,
}

impl FailoverState {
    fn new(provider_id: String) -> Self {
        Self {
            provider_id,
            status: FailoverStatus::Active,
            consecutive_failures: 0,
            consecutive_probe_failures: 0,
            last_failure_at: None,
            last_success_at: None,
            recovery_step_index: 0,
            step_started_at: None,
            last_probe_latency_ms: None,
        }
    }

    fn fail(&mut self) {
        self.status = FailoverStatus::Failed;
        self.recovery_step_index = 0;
        self.step_started_at = None;
    }
}

/// Failover tuning
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverSettings {
    pub failure_threshold: u32,
    pub recovery_window: Duration,
    /// Traffic share per recovery step; the last entry must be 1.0
    pub ramp_steps: Vec<f64>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_window: Duration::from_secs(60),
            ramp_steps: vec![0.10, 0.25, 0.50, 0.75, 1.00],
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct Transition {
    provider_id: String,
    to: FailoverStatus,
    consecutive_failures: u32,
    source: Option<FailureSource>,
}

/// Per-provider failover state machine
///
/// State lives in a sharded map keyed by provider id, so updates for one
/// provider never block reads for another.
pub struct FailoverSupervisor {
    states: DashMap<String, FailoverState>,
    settings: FailoverSettings,
    clock: SharedClock,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for FailoverSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverSupervisor")
            .field("providers", &self.states.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl FailoverSupervisor {
    pub fn new(
        settings: FailoverSettings,
        clock: SharedClock,
        alerts: Arc<dyn AlertSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            settings,
            clock,
            alerts,
            metrics,
        }
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    /// Register a provider in `Active`; returns false if it was already known
    pub fn register(&self, provider_id: &str) -> bool {
        if self.states.contains_key(provider_id) {
            return false;
        }
        let inserted = self
            .states
            .insert(
                provider_id.to_string(),
                FailoverState::new(provider_id.to_string()),
            )
            .is_none();
        if inserted {
            tracing::info!(provider_id = %provider_id, "Provider registered for failover supervision");
        }
        inserted
    }

    /// Record the outcome of a real request
    ///
    /// Returns the provider's status afterwards, or `None` for unknown providers.
    pub fn record_result(&self, provider_id: &str, success: bool) -> Option<FailoverStatus> {
        let now = self.clock.now();
        let threshold = self.settings.failure_threshold;

        let (status, transition) = {
            let Some(mut state) = self.states.get_mut(provider_id) else {
                tracing::warn!(
                    provider_id = %provider_id,
                    "Attempted to record result for unknown provider"
                );
                return None;
            };
            let state = state.value_mut();
            let mut transition = None;

            if success {
                state.consecutive_failures = 0;
                state.last_success_at = Some(now);
                if state.status == FailoverStatus::Failed {
                    tracing::debug!(
                        provider_id = %provider_id,
                        "Success recorded for failed provider; waiting for a healthy probe"
                    );
                }
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_failure_at = Some(now);

                match state.status {
                    FailoverStatus::Active if state.consecutive_failures == threshold => {
                        state.fail();
                        transition = Some(Transition {
                            provider_id: provider_id.to_string(),
                            to: FailoverStatus::Failed,
                            consecutive_failures: state.consecutive_failures,
                            source: Some(FailureSource::Requests),
                        });
                    }
                    FailoverStatus::Active => {
                        tracing::debug!(
                            provider_id = %provider_id,
                            consecutive_failures = state.consecutive_failures,
                            "Provider failure recorded (still active)"
                        );
                    }
                    FailoverStatus::Recovering => {
                        state.fail();
                        transition = Some(Transition {
                            provider_id: provider_id.to_string(),
                            to: FailoverStatus::Failed,
                            consecutive_failures: state.consecutive_failures,
                            source: Some(FailureSource::Requests),
                        });
                    }
                    FailoverStatus::Failed => {
                        state.recovery_step_index = 0;
                    }
                }
            }
            (state.status, transition)
        };

        if let Some(transition) = transition {
            self.emit(transition);
        }
        Some(status)
    }

    /// Record the result of a health probe
    ///
    /// A healthy probe moves `Failed` to `Recovering` and advances a
    /// `Recovering` provider once its current step has run failure-free for
    /// the recovery window. Failed probes never count as request failures.
    pub fn probe_result(
        &self,
        provider_id: &str,
        healthy: bool,
        latency_ms: f64,
    ) -> Option<FailoverStatus> {
        let now = self.clock.now();
        let threshold = self.settings.failure_threshold;
        let window = ChronoDuration::from_std(self.settings.recovery_window)
            .unwrap_or(ChronoDuration::MAX);
        let last_step = self.settings.ramp_steps.len().saturating_sub(1);

        let (status, transition) = {
            let Some(mut state) = self.states.get_mut(provider_id) else {
                tracing::warn!(
                    provider_id = %provider_id,
                    "Attempted to record probe for unknown provider"
                );
                return None;
            };
            let state = state.value_mut();
            state.last_probe_latency_ms = Some(latency_ms);
            let mut transition = None;

            if healthy {
                state.consecutive_probe_failures = 0;
                match state.status {
                    FailoverStatus::Failed => {
                        state.status = FailoverStatus::Recovering;
                        state.recovery_step_index = 0;
                        state.step_started_at = Some(now);
                        transition = Some(Transition {
                            provider_id: provider_id.to_string(),
                            to: FailoverStatus::Recovering,
                            consecutive_failures: state.consecutive_failures,
                            source: None,
                        });
                    }
                    FailoverStatus::Recovering => {
                        let started = state.step_started_at.unwrap_or(now);
                        if now - started >= window {
                            state.recovery_step_index += 1;
                            state.step_started_at = Some(now);
                            if state.recovery_step_index >= last_step {
                                state.status = FailoverStatus::Active;
                                state.recovery_step_index = 0;
                                state.step_started_at = None;
                                state.consecutive_failures = 0;
                                transition = Some(Transition {
                                    provider_id: provider_id.to_string(),
                                    to: FailoverStatus::Active,
                                    consecutive_failures: 0,
                                    source: None,
                                });
                            } else {
                                tracing::info!(
                                    provider_id = %provider_id,
                                    recovery_step_index = state.recovery_step_index,
                                    traffic_share = self.settings.ramp_steps[state.recovery_step_index],
                                    "Provider recovery advanced to next ramp step"
                                );
                            }
                        }
                    }
                    FailoverStatus::Active => {}
                }
            } else {
                state.consecutive_probe_failures =
                    state.consecutive_probe_failures.saturating_add(1);
                state.last_failure_at = Some(now);
                match state.status {
                    FailoverStatus::Active if state.consecutive_probe_failures == threshold => {
                        state.fail();
                        transition = Some(Transition {
                            provider_id: provider_id.to_string(),
                            to: FailoverStatus::Failed,
                            consecutive_failures: state.consecutive_probe_failures,
                            source: Some(FailureSource::Probes),
                        });
                    }
                    FailoverStatus::Recovering => {
                        state.fail();
                        transition = Some(Transition {
                            provider_id: provider_id.to_string(),
                            to: FailoverStatus::Failed,
                            consecutive_failures: state.consecutive_probe_failures,
                            source: Some(FailureSource::Probes),
                        });
                    }
                    _ => {
                        tracing::debug!(
                            provider_id = %provider_id,
                            consecutive_probe_failures = state.consecutive_probe_failures,
                            "Provider probe failed"
                        );
                    }
                }
            }
            (state.status, transition)
        };

        if let Some(transition) = transition {
            self.emit(transition);
        }
        Some(status)
    }

    /// Fraction of traffic the provider may currently receive
    ///
    /// Unknown providers receive no traffic.
    pub fn traffic_share(&self, provider_id: &str) -> f64 {
        self.states
            .get(provider_id)
            .map(|state| self.share_for(&state))
            .unwrap_or(0.0)
    }

    fn share_for(&self, state: &FailoverState) -> f64 {
        match state.status {
            FailoverStatus::Active => 1.0,
            FailoverStatus::Failed => 0.0,
            FailoverStatus::Recovering => self
                .settings
                .ramp_steps
                .get(state.recovery_step_index)
                .copied()
                .unwrap_or(1.0),
        }
    }

    /// Snapshot of one provider's state
    pub fn state(&self, provider_id: &str) -> Option<FailoverState> {
        self.states.get(provider_id).map(|s| s.clone())
    }

    /// Snapshot of every provider with its traffic share, sorted by id
    pub fn all_states(&self) -> Vec<(FailoverState, f64)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|entry| {
                let share = self.share_for(entry.value());
                (entry.value().clone(), share)
            })
            .collect();
        states.sort_by(|a, b| a.0.provider_id.cmp(&b.0.provider_id));
        states
    }

    fn emit(&self, transition: Transition) {
        if let Err(e) = self.metrics.record_failover_transition(transition.to) {
            tracing::warn!(error = %e, "Failed to record failover transition metric");
            self.metrics
                .metrics_recording_failure("record_failover_transition");
        }

        match (transition.to, transition.source) {
            (FailoverStatus::Failed, Some(source)) => {
                tracing::warn!(
                    provider_id = %transition.provider_id,
                    consecutive_failures = transition.consecutive_failures,
                    source = ?source,
                    "Provider marked as failed"
                );
                self.alerts.raise(Alert::ProviderFailed {
                    provider_id: transition.provider_id,
                    consecutive_failures: transition.consecutive_failures,
                    source,
                });
            }
            (FailoverStatus::Recovering, _) => {
                tracing::info!(
                    provider_id = %transition.provider_id,
                    traffic_share = self.settings.ramp_steps.first().copied().unwrap_or(1.0),
                    "Provider probe healthy, starting gradual recovery"
                );
            }
            (status, _) => {
                tracing::info!(
                    provider_id = %transition.provider_id,
                    status = status.as_str(),
                    "Provider recovered to full traffic"
                );
            }
        }
    }

    /// Start the health probe loop for one provider
    ///
    /// Probes every `probe_interval`; each probe is bounded by
    /// `probe_timeout` and a timeout counts as an unhealthy probe.
    pub fn spawn_probe_loop(
        self: Arc<Self>,
        provider: ProviderRecord,
        prober: Arc<dyn Prober>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let interval = self.settings.probe_interval;
        let timeout = self.settings.probe_timeout;

        tokio::spawn(async move {
            tracing::info!(
                provider_id = %provider.id,
                interval_seconds = interval.as_secs(),
                "Starting provider health probes"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = tokio::time::timeout(timeout, prober.probe(&provider)) => {
                        result.unwrap_or_else(|_| {
                            tracing::debug!(
                                provider_id = %provider.id,
                                timeout_seconds = timeout.as_secs(),
                                "Provider probe timed out"
                            );
                            ProbeOutcome::unhealthy(timeout.as_secs_f64() * 1000.0)
                        })
                    }
                };

                self.probe_result(&provider.id, outcome.healthy, outcome.latency_ms);
            }

            tracing::info!(provider_id = %provider.id, "Provider health probes stopped");
        })
    }
}
