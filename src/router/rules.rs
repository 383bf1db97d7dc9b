//! Custom routing rules
//!
//! Rules are evaluated in `(priority desc, id asc)` order and the first
//! match wins. Patterns are compiled once when a rule is installed; a rule
//! whose pattern does not compile is skipped at match time and never aborts
//! routing for the request.

use crate::collaborators::{Alert, AlertSink};
use crate::error::RuleError;
use crate::metrics::Metrics;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const MAX_RULE_NAME_LEN: usize = 100;
const MAX_PATTERN_SIZE: usize = 1 << 20;

/// How a rule's condition is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Case-insensitive regex match against the request content
    Regex,
    /// Inclusive complexity range
    Complexity,
}

/// What a matched rule forces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// `action_value` is a model id, or `provider/model`
    UseModel,
    /// `action_value` is a provider id; scoring runs among its models
    UseProvider,
}

fn default_active() -> bool {
    true
}

/// A custom routing rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Assigned on creation when zero
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub condition_type: ConditionType,
    #[serde(default)]
    pub condition_value: String,
    #[serde(default)]
    pub min_complexity: Option<f64>,
    #[serde(default)]
    pub max_complexity: Option<f64>,
    pub action_type: ActionType,
    pub action_value: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub hit_count: u64,
}

impl RoutingRule {
    /// Check the rule's fields
    ///
    /// Patterns must compile and complexity bounds must lie within `[0, 100]`
    /// with `min <= max`.
    pub fn validate(&self) -> Result<(), RuleError> {
        let invalid = |reason: String| RuleError::Invalid {
            rule: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.name.chars().count() > MAX_RULE_NAME_LEN {
            return Err(invalid(format!(
                "name must be at most {} characters",
                MAX_RULE_NAME_LEN
            )));
        }
        if self.action_value.trim().is_empty() {
            return Err(invalid("action_value must not be empty".to_string()));
        }

        match self.condition_type {
            ConditionType::Regex => {
                if self.condition_value.is_empty() {
                    return Err(invalid(
                        "regex rules need a non-empty condition_value".to_string(),
                    ));
                }
                compile_pattern(&self.condition_value)
                    .map_err(|e| invalid(format!("pattern does not compile: {}", e)))?;
            }
            ConditionType::Complexity => {
                if self.min_complexity.is_none() && self.max_complexity.is_none() {
                    return Err(invalid(
                        "complexity rules need min_complexity or max_complexity".to_string(),
                    ));
                }
                for bound in [self.min_complexity, self.max_complexity].into_iter().flatten() {
                    if !bound.is_finite() || !(0.0..=100.0).contains(&bound) {
                        return Err(invalid(format!(
                            "complexity bound {} must be within [0, 100]",
                            bound
                        )));
                    }
                }
                if let (Some(min), Some(max)) = (self.min_complexity, self.max_complexity) {
                    if min > max {
                        return Err(invalid(format!(
                            "min_complexity {} exceeds max_complexity {}",
                            min, max
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn matches_complexity(&self, complexity_score: f64) -> bool {
        let min = self.min_complexity.unwrap_or(f64::NEG_INFINITY);
        let max = self.max_complexity.unwrap_or(f64::INFINITY);
        complexity_score >= min && complexity_score <= max
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(MAX_PATTERN_SIZE)
        .build()
}

#[derive(Debug)]
struct CompiledRule {
    rule: RoutingRule,
    pattern: Result<Option<Regex>, RuleError>,
    hits: AtomicU64,
}

impl CompiledRule {
    fn compile(rule: RoutingRule) -> Self {
        let pattern = match rule.condition_type {
            ConditionType::Regex => compile_pattern(&rule.condition_value)
                .map(Some)
                .map_err(|e| RuleError::Evaluation {
                    rule_id: rule.id,
                    error: e.to_string(),
                }),
            ConditionType::Complexity => Ok(None),
        };
        let hits = AtomicU64::new(rule.hit_count);
        Self {
            rule,
            pattern,
            hits,
        }
    }

    fn snapshot(&self) -> RoutingRule {
        RoutingRule {
            hit_count: self.hits.load(Ordering::Relaxed),
            ..self.rule.clone()
        }
    }
}

type RuleSet = Arc<Vec<Arc<CompiledRule>>>;

/// Evaluates custom routing rules against request content and complexity
///
/// Matching reads an immutable snapshot of the rule set; edits build a new
/// snapshot and swap it in, so matching never waits on an edit.
pub struct RuleMatcher {
    rules: RwLock<RuleSet>,
    metrics: Arc<Metrics>,
    alerts: Arc<dyn AlertSink>,
}

impl std::fmt::Debug for RuleMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleMatcher")
            .field("rules", &self.rules.read().len())
            .finish()
    }
}

impl RuleMatcher {
    pub fn new(metrics: Arc<Metrics>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            metrics,
            alerts,
        }
    }

    /// First active rule matching the request, by `(priority desc, id asc)`
    pub fn match_rule(&self, content: &str, complexity_score: f64) -> Option<RoutingRule> {
        let rules = self.rules.read().clone();

        for compiled in rules.iter().filter(|c| c.rule.active) {
            let rule = &compiled.rule;
            let matched = match (&compiled.pattern, rule.condition_type) {
                (Err(error), _) => {
                    tracing::warn!(
                        rule_id = rule.id,
                        rule_name = %rule.name,
                        error = %error,
                        "Skipping routing rule with invalid pattern"
                    );
                    self.metrics.rule_evaluation_error();
                    continue;
                }
                (Ok(Some(pattern)), ConditionType::Regex) => pattern.is_match(content),
                (Ok(_), ConditionType::Complexity) => rule.matches_complexity(complexity_score),
                (Ok(None), ConditionType::Regex) => false,
            };

            if matched {
                compiled.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    rule_id = rule.id,
                    rule_name = %rule.name,
                    priority = rule.priority,
                    "Routing rule matched"
                );
                return Some(compiled.snapshot());
            }
        }
        None
    }

    /// All rules in evaluation order, with current hit counts
    pub fn list(&self) -> Vec<RoutingRule> {
        self.rules.read().iter().map(|c| c.snapshot()).collect()
    }

    pub fn get(&self, id: u64) -> Option<RoutingRule> {
        self.rules
            .read()
            .iter()
            .find(|c| c.rule.id == id)
            .map(|c| c.snapshot())
    }

    /// Create or replace a rule
    ///
    /// A rule with `id == 0` gets the next free id. Replacing a rule keeps
    /// its hit count.
    pub fn upsert(&self, mut rule: RoutingRule) -> Result<RoutingRule, RuleError> {
        rule.validate()?;

        let mut guard = self.rules.write();
        let mut rules: Vec<Arc<CompiledRule>> = guard.as_ref().clone();

        if rule.id == 0 {
            rule.id = rules.iter().map(|c| c.rule.id).max().unwrap_or(0) + 1;
        }
        if let Some(index) = rules.iter().position(|c| c.rule.id == rule.id) {
            rule.hit_count = rules[index].hits.load(Ordering::Relaxed);
            rules.remove(index);
        } else {
            rule.hit_count = 0;
        }

        let compiled = Arc::new(CompiledRule::compile(rule));
        let saved = compiled.snapshot();
        rules.push(compiled);
        sort_rules(&mut rules);
        *guard = Arc::new(rules);

        tracing::info!(rule_id = saved.id, rule_name = %saved.name, "Routing rule saved");
        Ok(saved)
    }

    /// Delete a rule
    pub fn remove(&self, id: u64) -> Result<RoutingRule, RuleError> {
        let mut guard = self.rules.write();
        let mut rules: Vec<Arc<CompiledRule>> = guard.as_ref().clone();
        let index = rules
            .iter()
            .position(|c| c.rule.id == id)
            .ok_or(RuleError::NotFound(id))?;
        let removed = rules.remove(index).snapshot();
        *guard = Arc::new(rules);

        tracing::info!(rule_id = id, rule_name = %removed.name, "Routing rule removed");
        Ok(removed)
    }

    /// Validate and install a complete rule set
    ///
    /// Nothing is installed if any rule is invalid or ids collide.
    pub fn replace_all(&self, rules: Vec<RoutingRule>) -> Result<(), RuleError> {
        let mut next_id = rules.iter().map(|r| r.id).max().unwrap_or(0);
        let mut seen = std::collections::HashSet::new();
        let mut prepared = Vec::with_capacity(rules.len());
        for mut rule in rules {
            rule.validate()?;
            if rule.id == 0 {
                next_id += 1;
                rule.id = next_id;
            }
            if !seen.insert(rule.id) {
                return Err(RuleError::Invalid {
                    rule: rule.name,
                    reason: format!("duplicate rule id {}", rule.id),
                });
            }
            prepared.push(rule);
        }
        self.restore(prepared);
        Ok(())
    }

    /// Install rules loaded from storage without validating them
    ///
    /// Rules whose pattern does not compile are kept and skipped at match time.
    pub fn restore(&self, rules: Vec<RoutingRule>) {
        let mut compiled: Vec<Arc<CompiledRule>> = rules
            .into_iter()
            .map(|rule| Arc::new(CompiledRule::compile(rule)))
            .collect();

        for rule in &compiled {
            if let Err(error) = &rule.pattern {
                self.alerts.raise(Alert::RuleEvaluationFailed {
                    rule_id: rule.rule.id,
                    error: error.to_string(),
                });
            }
        }

        sort_rules(&mut compiled);
        let count = compiled.len();
        *self.rules.write() = Arc::new(compiled);
        tracing::info!(rule_count = count, "Routing rules installed");
    }
}

fn sort_rules(rules: &mut [Arc<CompiledRule>]) {
    rules.sort_by(|a, b| {
        b.rule
            .priority
            .cmp(&a.rule.priority)
            .then(a.rule.id.cmp(&b.rule.id))
    });
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn regex_rule(id: u64, priority: i32, pattern: &str, action_value: &str) -> RoutingRule {
        RoutingRule {
            id,
            name: format!("rule-{id}"),
            description: None,
            priority,
            condition_type: ConditionType::Regex,
            condition_value: pattern.to_string(),
            min_complexity: None,
            max_complexity: None,
            action_type: ActionType::UseModel,
            action_value: action_value.to_string(),
            active: true,
            hit_count: 0,
        }
    }

    pub fn complexity_rule(
        id: u64,
        priority: i32,
        min: Option<f64>,
        max: Option<f64>,
        provider_id: &str,
    ) -> RoutingRule {
        RoutingRule {
            condition_type: ConditionType::Complexity,
            condition_value: String::new(),
            min_complexity: min,
            max_complexity: max,
            action_type: ActionType::UseProvider,
            ..regex_rule(id, priority, "", provider_id)
        }
    }
}
