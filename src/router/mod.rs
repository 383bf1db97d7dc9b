//! Routing logic for switchyard
//!
//! The routing agent picks a (provider, model) pair per request: explicit
//! pins first, then custom rules, then scored selection over every healthy
//! candidate.

pub mod agent;
pub mod rules;
pub mod scoring;
pub mod selection;

pub use agent::{AgentDeps, AgentSettings, RoutingAgent};
pub use rules::{ActionType, ConditionType, RoutingRule, RuleMatcher};
pub use scoring::{ScoreWeights, weights_for};
pub use selection::{ScoredCandidate, epsilon_tier, select_from_tier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-declared request priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// Precomputed output of the content analyzer
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ContentAnalysis {
    #[serde(default)]
    pub intent: Option<String>,
    /// 0..100
    #[serde(default = "default_complexity")]
    pub complexity_score: f64,
    #[serde(default)]
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_complexity() -> f64 {
    50.0
}

impl Default for ContentAnalysis {
    fn default() -> Self {
        Self {
            intent: None,
            complexity_score: default_complexity(),
            scenarios: Vec::new(),
            language: None,
        }
    }
}

/// A request to be routed
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteRequest {
    /// Generated when absent
    #[serde(default)]
    pub request_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub analysis: ContentAnalysis,
    #[serde(default)]
    pub priority: RequestPriority,
    /// Pin to a provider (all its models) or, with `model_id`, to one pair
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl RouteRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            request_id: None,
            content: content.into(),
            analysis: ContentAnalysis::default(),
            priority: RequestPriority::default(),
            provider_id: None,
            model_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_complexity(mut self, complexity_score: f64) -> Self {
        self.analysis.complexity_score = complexity_score;
        self
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Pin the request to a provider, optionally to one of its models
    pub fn pinned(mut self, provider_id: impl Into<String>, model_id: Option<&str>) -> Self {
        self.provider_id = Some(provider_id.into());
        self.model_id = model_id.map(str::to_string);
        self
    }

    /// Pin the request to a model id served by any provider
    pub fn pinned_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// Why a candidate was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The request pinned its target
    Explicit,
    /// A custom routing rule narrowed the candidates
    Rule,
    /// Scored selection over the full candidate set
    Scored,
    /// No candidate passed filtering; least-failed provider used
    Fallback,
    /// The routing switch is off; the default target was used
    RoutingDisabled,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Rule => "rule",
            Self::Scored => "scored",
            Self::Fallback => "fallback",
            Self::RoutingDisabled => "routing_disabled",
        }
    }
}

/// Immutable audit record of one routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub selected_provider_id: String,
    pub selected_model_id: String,
    pub matched_rule_id: Option<u64>,
    pub reason: DecisionReason,
    pub expected_latency_ms: f64,
    /// Weighted candidate score, damped by traffic share, whatever the reason
    pub total_score: f64,
    pub timestamp: DateTime<Utc>,
}
