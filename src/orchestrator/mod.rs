//! Gateway orchestrator: the routing on/off switch
//!
//! A toggle request never takes effect immediately. It becomes pending,
//! is recorded in history, and a commit task applies it once the delay has
//! elapsed. Every request bumps the generation counter; a commit whose
//! generation is no longer current does nothing, so only the most recent
//! request is ever committed.
//!
//! Reads go through a `watch` snapshot and never wait on a writer. Writes
//! (requests and commits) are serialized by one async mutex.

pub mod state;

pub use state::{
    HistoryKind, RoutingSwitchState, SwitchHistoryEntry, SwitchMetrics, SwitchStatus,
};

use crate::clock::SharedClock;
use crate::collaborators::{Alert, AlertSink, Authorizer};
use crate::error::ToggleError;
use crate::metrics::Metrics;
use crate::store::{DurableStore, with_retry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Longest commit delay or cooldown the switch accepts (one week)
pub const MAX_SWITCH_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Switch tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchSettings {
    /// Used only when the store has no saved state
    pub initial_enabled: bool,
    pub cooldown: Duration,
    pub delay: Duration,
    pub history_capacity: usize,
    pub persist_attempts: u32,
    pub persist_base_delay: Duration,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            initial_enabled: false,
            cooldown: Duration::from_secs(300),
            delay: Duration::from_secs(10),
            history_capacity: 1000,
            persist_attempts: 3,
            persist_base_delay: Duration::from_millis(100),
        }
    }
}

/// A request to change the routing switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub target: bool,
    #[serde(default)]
    pub reason: String,
    pub requested_by: String,
    /// Skip the cooldown check
    #[serde(default)]
    pub force: bool,
    /// Override the commit delay; `0` commits as soon as possible
    #[serde(default)]
    pub delay_seconds: Option<u64>,
}

impl ToggleRequest {
    pub fn new(target: bool, requested_by: impl Into<String>) -> Self {
        Self {
            target,
            reason: String::new(),
            requested_by: requested_by.into(),
            force: false,
            delay_seconds: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_delay_seconds(mut self, delay_seconds: u64) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }
}

/// Acknowledgement of an accepted toggle request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleAck {
    pub generation: u64,
    pub pending_target: bool,
    pub pending_effective_at: DateTime<Utc>,
}

/// Collaborators the orchestrator depends on
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub authorizer: Arc<dyn Authorizer>,
    pub store: Arc<dyn DurableStore>,
    pub alerts: Arc<dyn AlertSink>,
    pub metrics: Arc<Metrics>,
    pub clock: SharedClock,
}

/// Owns the routing switch
pub struct GatewayOrchestrator {
    state: watch::Sender<RoutingSwitchState>,
    committed: watch::Sender<bool>,
    history: Mutex<VecDeque<SwitchHistoryEntry>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    inconsistent: AtomicBool,
    shutdown: CancellationToken,
    deps: OrchestratorDeps,
    settings: SwitchSettings,
}

impl std::fmt::Debug for GatewayOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayOrchestrator")
            .field("state", &*self.state.borrow())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GatewayOrchestrator {
    /// Load the switch from the durable store
    ///
    /// Falls back to `initial_enabled` when nothing is stored or the store
    /// cannot be read. A pending commit found in storage is rescheduled, or
    /// committed right away if it is overdue.
    pub async fn load(deps: OrchestratorDeps, settings: SwitchSettings) -> Arc<Self> {
        let stored = match deps.store.load_switch_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load routing switch state, using defaults");
                None
            }
        };
        let history = match deps.store.load_switch_history(settings.history_capacity).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load routing switch history");
                Vec::new()
            }
        };

        let state = stored.unwrap_or_else(|| RoutingSwitchState::new(settings.initial_enabled));
        tracing::info!(
            enabled = state.enabled,
            pending = state.is_pending(),
            generation = state.generation,
            "Routing switch loaded"
        );

        let (committed, _) = watch::channel(state.enabled);
        let pending = state.pending_target.is_some().then_some((
            state.generation,
            state.pending_effective_at,
        ));
        let orchestrator = Arc::new(Self {
            state: watch::Sender::new(state),
            committed,
            history: Mutex::new(history.into_iter().collect()),
            writer: tokio::sync::Mutex::new(None),
            inconsistent: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            deps,
            settings,
        });

        if let Some((generation, effective_at)) = pending {
            let now = orchestrator.deps.clock.now();
            let delay = effective_at
                .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(Duration::ZERO);
            tracing::info!(
                generation,
                delay_ms = delay.as_millis() as u64,
                "Rescheduling stored pending toggle"
            );
            let task = orchestrator.schedule_commit(generation, delay);
            *orchestrator.writer.lock().await = Some(task);
        }

        orchestrator
    }

    /// Whether intelligent routing is in effect at `now`
    ///
    /// Pure read of the latest snapshot; never waits on a writer.
    pub fn get_effective_state(&self, now: DateTime<Utc>) -> bool {
        self.state.borrow().effective_at(now)
    }

    /// Copy of the current switch state
    pub fn snapshot(&self) -> RoutingSwitchState {
        self.state.borrow().clone()
    }

    /// Receiver notified with the new state on every commit
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.committed.subscribe()
    }

    /// Request a switch change
    ///
    /// # Errors
    /// - `PermissionDenied` when the caller lacks the admin capability
    /// - `CooldownActive` when not forced and the last commit was within the
    ///   cooldown window
    /// - `DelayOutOfRange` when the delay override exceeds
    ///   [`MAX_SWITCH_WINDOW_SECONDS`]
    pub async fn request_toggle(
        self: &Arc<Self>,
        request: ToggleRequest,
    ) -> Result<ToggleAck, ToggleError> {
        if !self
            .deps
            .authorizer
            .has_admin_capability(&request.requested_by)
            .await
        {
            tracing::warn!(
                requested_by = %request.requested_by,
                "Routing switch toggle denied: caller lacks admin capability"
            );
            return Err(ToggleError::PermissionDenied {
                caller: request.requested_by,
            });
        }
        if let Some(delay_seconds) = request
            .delay_seconds
            .filter(|secs| *secs > MAX_SWITCH_WINDOW_SECONDS)
        {
            return Err(ToggleError::DelayOutOfRange {
                delay_seconds,
                max_seconds: MAX_SWITCH_WINDOW_SECONDS,
            });
        }

        let mut commit_task = self.writer.lock().await;
        let now = self.deps.clock.now();
        let current = self.snapshot();

        if !request.force {
            if let Some(remaining) = self.cooldown_remaining(&current, now) {
                let remaining_seconds = ceil_seconds(remaining);
                self.deps.metrics.cooldown_rejection();
                self.deps.alerts.raise(Alert::CooldownRejected {
                    requested_by: request.requested_by.clone(),
                    remaining_seconds,
                });
                return Err(ToggleError::CooldownActive { remaining_seconds });
            }
        }

        let delay = request
            .delay_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.settings.delay);
        let effective_at = now
            .checked_add_signed(to_chrono(delay))
            .ok_or(ToggleError::DelayOutOfRange {
                delay_seconds: delay.as_secs(),
                max_seconds: MAX_SWITCH_WINDOW_SECONDS,
            })?;

        let mut next = current.clone();
        next.generation += 1;
        next.pending_target = Some(request.target);
        next.pending_effective_at = Some(effective_at);

        let entry = SwitchHistoryEntry {
            old_state: current.enabled,
            new_state: request.target,
            reason: request.reason,
            triggered_by: request.requested_by,
            kind: HistoryKind::Requested,
            timestamp: now,
            generation: next.generation,
        };

        self.state.send_replace(next.clone());
        self.push_history(entry.clone());
        if let Some(previous) = commit_task.take() {
            previous.abort();
        }
        *commit_task = Some(self.schedule_commit(next.generation, delay));

        tracing::info!(
            generation = next.generation,
            target = request_target(&next),
            requested_by = %entry.triggered_by,
            force = request.force,
            effective_at = %effective_at,
            "Routing switch toggle requested"
        );

        self.persist(&next, &entry).await;

        Ok(ToggleAck {
            generation: next.generation,
            pending_target: entry.new_state,
            pending_effective_at: effective_at,
        })
    }

    fn schedule_commit(self: &Arc<Self>, generation: u64, delay: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(orchestrator) = orchestrator.upgrade() {
                        orchestrator.commit(generation).await;
                    }
                }
            }
        })
    }

    /// Apply the pending target if `generation` is still current
    async fn commit(&self, generation: u64) {
        let mut commit_task = self.writer.lock().await;
        let now = self.deps.clock.now();
        let current = self.snapshot();

        let Some(target) = current.pending_target else {
            return;
        };
        if current.generation != generation {
            tracing::debug!(
                generation,
                current_generation = current.generation,
                "Superseded routing switch commit skipped"
            );
            return;
        }

        // Stamped with the scheduled time, which readers already treat as effective
        let committed_at = current
            .pending_effective_at
            .map_or(now, |effective_at| effective_at.min(now));

        let mut next = current.clone();
        next.enabled = target;
        next.pending_target = None;
        next.pending_effective_at = None;
        next.last_toggle_at = Some(committed_at);
        next.total_switches += 1;
        if target {
            next.enabled_count += 1;
        } else {
            next.disabled_count += 1;
        }

        let requested = self
            .history
            .lock()
            .iter()
            .find(|e| e.generation == generation && e.kind == HistoryKind::Requested)
            .cloned();
        let entry = SwitchHistoryEntry {
            old_state: current.enabled,
            new_state: target,
            reason: requested.as_ref().map(|e| e.reason.clone()).unwrap_or_default(),
            triggered_by: requested
                .map(|e| e.triggered_by)
                .unwrap_or_else(|| "system".to_string()),
            kind: HistoryKind::Committed,
            timestamp: committed_at,
            generation,
        };

        self.state.send_replace(next.clone());
        self.push_history(entry.clone());
        // The running task is this one; dropping the handle detaches it
        commit_task.take();

        tracing::info!(
            generation,
            enabled = target,
            previous = current.enabled,
            "Routing switch committed"
        );

        self.persist(&next, &entry).await;
        self.committed.send_replace(target);
    }

    fn push_history(&self, entry: SwitchHistoryEntry) {
        if let Err(e) = self.deps.metrics.record_switch_event(entry.kind) {
            tracing::warn!(error = %e, "Failed to record switch event metric");
            self.deps.metrics.metrics_recording_failure("record_switch_event");
        }
        let mut history = self.history.lock();
        history.push_front(entry);
        history.truncate(self.settings.history_capacity.max(1));
    }

    async fn persist(&self, state: &RoutingSwitchState, entry: &SwitchHistoryEntry) {
        let store = &self.deps.store;
        let attempts = self.settings.persist_attempts;
        let base_delay = self.settings.persist_base_delay;

        let saved = with_retry("save_switch_state", attempts, base_delay, || {
            store.save_switch_state(state)
        })
        .await;
        if let Err(e) = saved {
            self.persistence_failed("save_switch_state", e.to_string());
        }

        let appended = with_retry("append_switch_history", attempts, base_delay, || {
            store.append_switch_history(entry)
        })
        .await;
        if let Err(e) = appended {
            self.persistence_failed("append_switch_history", e.to_string());
        }
    }

    fn persistence_failed(&self, operation: &str, error: String) {
        // In-memory state stays authoritative; only the flag records the gap
        self.inconsistent.store(true, Ordering::SeqCst);
        self.deps.metrics.persistence_failure(operation);
        self.deps.alerts.raise(Alert::PersistenceFailed {
            operation: operation.to_string(),
            error,
        });
    }

    fn cooldown_remaining(
        &self,
        state: &RoutingSwitchState,
        now: DateTime<Utc>,
    ) -> Option<ChronoDuration> {
        let last = state.last_toggle_at?;
        let elapsed = now - last;
        let cooldown = to_chrono(self.settings.cooldown);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Up to `limit` history entries, most recent first
    pub fn get_history(&self, limit: usize) -> Vec<SwitchHistoryEntry> {
        self.history.lock().iter().take(limit).cloned().collect()
    }

    /// Switch counters at `now`
    pub fn get_metrics(&self, now: DateTime<Utc>) -> SwitchMetrics {
        let state = self.snapshot();
        let hour_ago = now - ChronoDuration::hours(1);
        let toggle_count_last_hour = self
            .history
            .lock()
            .iter()
            .filter(|e| e.kind == HistoryKind::Committed && e.timestamp > hour_ago)
            .count() as u64;

        SwitchMetrics {
            toggle_count_last_hour,
            current_effective_state: state.effective_at(now),
            pending: state.is_pending(),
            cooldown_remaining_seconds: self
                .cooldown_remaining(&state, now)
                .map(ceil_seconds)
                .unwrap_or(0),
            total_switches: state.total_switches,
            enabled_count: state.enabled_count,
            disabled_count: state.disabled_count,
            persistence_inconsistent: self.inconsistent.load(Ordering::SeqCst),
        }
    }

    /// Full switch status at `now`
    pub fn status(&self, now: DateTime<Utc>) -> SwitchStatus {
        let state = self.snapshot();
        let cooldown_until = state
            .last_toggle_at
            .and_then(|last| last.checked_add_signed(to_chrono(self.settings.cooldown)));
        SwitchStatus {
            enabled: state.enabled,
            effective: state.effective_at(now),
            pending: state.is_pending(),
            pending_target: state.pending_target,
            pending_effective_at: state.pending_effective_at,
            can_toggle: cooldown_until.is_none_or(|until| now >= until),
            cooldown_until,
            generation: state.generation,
        }
    }

    /// Whether a store write failed after all retries
    pub fn is_persistence_inconsistent(&self) -> bool {
        self.inconsistent.load(Ordering::SeqCst)
    }

    /// Cancel the scheduled commit, if any
    ///
    /// The pending target stays in the stored state and is rescheduled on
    /// the next load.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn request_target(state: &RoutingSwitchState) -> bool {
    state.pending_target.unwrap_or(state.enabled)
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

fn ceil_seconds(duration: ChronoDuration) -> u64 {
    let millis = duration.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
