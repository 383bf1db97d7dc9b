//! Routing switch state and history records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The enabled/disabled routing switch with its pending overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSwitchState {
    pub enabled: bool,
    pub pending_target: Option<bool>,
    pub pending_effective_at: Option<DateTime<Utc>>,
    /// Time of the last committed toggle; `None` before the first one
    pub last_toggle_at: Option<DateTime<Utc>>,
    /// Incremented on every toggle request
    pub generation: u64,
    #[serde(default)]
    pub total_switches: u64,
    #[serde(default)]
    pub enabled_count: u64,
    #[serde(default)]
    pub disabled_count: u64,
}

impl RoutingSwitchState {
    /// Fresh state with no history
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pending_target: None,
            pending_effective_at: None,
            last_toggle_at: None,
            generation: 0,
            total_switches: 0,
            enabled_count: 0,
            disabled_count: 0,
        }
    }

    /// State in effect at `now`
    ///
    /// A pending target takes effect once its effective time has passed,
    /// even if the commit task has not run yet.
    pub fn effective_at(&self, now: DateTime<Utc>) -> bool {
        match (self.pending_target, self.pending_effective_at) {
            (Some(target), Some(effective_at)) if effective_at <= now => target,
            _ => self.enabled,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_target.is_some()
    }
}

/// Whether a history entry records a request or its commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Requested,
    Committed,
}

impl HistoryKind {
    /// Convert kind to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Committed => "committed",
        }
    }
}

/// Immutable record of a toggle request or commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchHistoryEntry {
    pub old_state: bool,
    pub new_state: bool,
    pub reason: String,
    pub triggered_by: String,
    pub kind: HistoryKind,
    pub timestamp: DateTime<Utc>,
    /// Generation of the request this entry belongs to
    #[serde(default)]
    pub generation: u64,
}

/// Point-in-time view returned by `GatewayOrchestrator::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchStatus {
    pub enabled: bool,
    pub effective: bool,
    pub pending: bool,
    pub pending_target: Option<bool>,
    pub pending_effective_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub can_toggle: bool,
    pub generation: u64,
}

/// Switch metrics returned by `GatewayOrchestrator::metrics`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchMetrics {
    pub toggle_count_last_hour: u64,
    pub current_effective_state: bool,
    pub pending: bool,
    pub cooldown_remaining_seconds: u64,
    pub total_switches: u64,
    pub enabled_count: u64,
    pub disabled_count: u64,
    pub persistence_inconsistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_effective_state_follows_pending_after_effective_time() {
        let t0 = Utc::now();
        let mut state = RoutingSwitchState::new(false);
        state.pending_target = Some(true);
        state.pending_effective_at = Some(t0 + Duration::seconds(10));

        assert!(!state.effective_at(t0 + Duration::seconds(5)));
        assert!(state.effective_at(t0 + Duration::seconds(10)));
        assert!(state.effective_at(t0 + Duration::seconds(11)));
    }

    #[test]
    fn test_effective_state_without_pending_is_enabled() {
        let state = RoutingSwitchState::new(true);
        assert!(state.effective_at(Utc::now()));
        assert!(!state.is_pending());
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = RoutingSwitchState::new(true);
        state.generation = 4;
        state.last_toggle_at = Some(Utc::now());
        let json = serde_json::to_string(&state).unwrap();
        let decoded: RoutingSwitchState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state);
    }
}
