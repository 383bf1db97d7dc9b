//! Configuration management for Switchyard
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::error::{AppError, AppResult};
use crate::models::catalog::{CatalogSnapshot, ModelRecord, ProviderRecord};
use crate::models::health::FailoverSettings;
use crate::models::performance::TrackerSettings;
use crate::orchestrator::{MAX_SWITCH_WINDOW_SECONDS, SwitchSettings};
use crate::router::{AgentSettings, RoutingRule};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub switch: SwitchConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Routing switch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwitchConfig {
    /// State used when the durable store holds none
    #[serde(default)]
    pub initial_enabled: bool,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Callers allowed to toggle the switch; empty admits everyone
    #[serde(default)]
    pub admins: Vec<String>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            initial_enabled: false,
            cooldown_seconds: default_cooldown_seconds(),
            delay_seconds: default_delay_seconds(),
            history_capacity: default_history_capacity(),
            admins: Vec::new(),
        }
    }
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_delay_seconds() -> u64 {
    10
}

fn default_history_capacity() -> usize {
    1000
}

/// Routing agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Provider used while intelligent routing is off
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_catalog_refresh_seconds")]
    pub catalog_refresh_seconds: u64,
    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            default_provider: None,
            default_model: None,
            catalog_refresh_seconds: default_catalog_refresh_seconds(),
            audit_queue_capacity: default_audit_queue_capacity(),
        }
    }
}

fn default_epsilon() -> f64 {
    0.02
}

fn default_catalog_refresh_seconds() -> u64 {
    30
}

fn default_audit_queue_capacity() -> usize {
    1024
}

/// Performance tracker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_decay_interval_seconds")]
    pub decay_interval_seconds: u64,
    #[serde(default = "default_success_window")]
    pub success_window: usize,
    #[serde(default = "default_success_horizon_seconds")]
    pub success_horizon_seconds: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            decay_interval_seconds: default_decay_interval_seconds(),
            success_window: default_success_window(),
            success_horizon_seconds: default_success_horizon_seconds(),
        }
    }
}

fn default_alpha() -> f64 {
    0.2
}

fn default_decay_interval_seconds() -> u64 {
    60
}

fn default_success_window() -> usize {
    100
}

fn default_success_horizon_seconds() -> u64 {
    600
}

/// Failover supervisor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailoverConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_probe_interval_seconds")]
    pub probe_interval_seconds: u64,
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
    #[serde(default = "default_recovery_window_seconds")]
    pub recovery_window_seconds: u64,
    #[serde(default = "default_ramp_steps")]
    pub ramp_steps: Vec<f64>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            probe_interval_seconds: default_probe_interval_seconds(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
            recovery_window_seconds: default_recovery_window_seconds(),
            ramp_steps: default_ramp_steps(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_interval_seconds() -> u64 {
    30
}

fn default_probe_timeout_seconds() -> u64 {
    10
}

fn default_recovery_window_seconds() -> u64 {
    60
}

fn default_ramp_steps() -> Vec<f64> {
    vec![0.10, 0.25, 0.50, 0.75, 1.00]
}

/// Upstream provider entry (`[[providers]]`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type", default = "default_provider_type")]
    pub kind: String,
    pub base_url: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// Model served by a provider (`[[providers.models]]`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub max_complexity: Option<f64>,
}

fn default_provider_type() -> String {
    "openai".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_priority() -> i32 {
    1
}

fn default_active() -> bool {
    true
}

fn default_context_window() -> u32 {
    8192
}

/// Durable store configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory for the file-backed store; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Provider and model records described by `[[providers]]`
    pub fn catalog_snapshot(&self) -> CatalogSnapshot {
        let providers = self
            .providers
            .iter()
            .map(|p| ProviderRecord {
                id: p.id.clone(),
                kind: p.kind.clone(),
                base_url: p.base_url.clone(),
                weight: p.weight,
                priority: p.priority,
                active: p.active,
            })
            .collect();
        let models = self
            .providers
            .iter()
            .flat_map(|p| {
                p.models.iter().map(move |m| ModelRecord {
                    model_id: m.id.clone(),
                    provider_id: p.id.clone(),
                    name: m.name.clone(),
                    context_window: m.context_window,
                    priority: m.priority,
                    weight: m.weight,
                    active: m.active,
                    max_complexity: m.max_complexity,
                })
            })
            .collect();
        CatalogSnapshot::new(providers, models)
    }

    pub fn switch_settings(&self) -> SwitchSettings {
        SwitchSettings {
            initial_enabled: self.switch.initial_enabled,
            cooldown: Duration::from_secs(self.switch.cooldown_seconds),
            delay: Duration::from_secs(self.switch.delay_seconds),
            history_capacity: self.switch.history_capacity,
            ..SwitchSettings::default()
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            alpha: self.performance.alpha,
            success_window: self.performance.success_window,
            success_horizon: Duration::from_secs(self.performance.success_horizon_seconds),
        }
    }

    pub fn failover_settings(&self) -> FailoverSettings {
        FailoverSettings {
            failure_threshold: self.failover.failure_threshold,
            recovery_window: Duration::from_secs(self.failover.recovery_window_seconds),
            ramp_steps: self.failover.ramp_steps.clone(),
            probe_interval: Duration::from_secs(self.failover.probe_interval_seconds),
            probe_timeout: Duration::from_secs(self.failover.probe_timeout_seconds),
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            epsilon: self.routing.epsilon,
        }
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()`, but can also be called
    /// explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> AppResult<()> {
        self.validate_tuning()?;
        self.validate_providers()?;

        for rule in &self.rules {
            rule.validate()
                .map_err(|e| AppError::Config(format!("Configuration error: {}", e)))?;
        }
        let mut rule_ids = HashSet::new();
        for rule in self.rules.iter().filter(|r| r.id != 0) {
            if !rule_ids.insert(rule.id) {
                return Err(AppError::Config(format!(
                    "Configuration error: duplicate rule id {}",
                    rule.id
                )));
            }
        }

        self.validate_default_target()
    }

    fn validate_tuning(&self) -> AppResult<()> {
        let routing = &self.routing;
        if !routing.epsilon.is_finite() || !(0.0..=1.0).contains(&routing.epsilon) {
            return Err(AppError::Config(format!(
                "Configuration error: routing.epsilon must be within [0, 1], got {}",
                routing.epsilon
            )));
        }
        if routing.catalog_refresh_seconds == 0 {
            return Err(AppError::Config(
                "Configuration error: routing.catalog_refresh_seconds must be greater than 0"
                    .to_string(),
            ));
        }
        if routing.audit_queue_capacity == 0 {
            return Err(AppError::Config(
                "Configuration error: routing.audit_queue_capacity must be greater than 0"
                    .to_string(),
            ));
        }

        let performance = &self.performance;
        if !performance.alpha.is_finite() || performance.alpha <= 0.0 || performance.alpha > 1.0
        {
            return Err(AppError::Config(format!(
                "Configuration error: performance.alpha must be within (0, 1], got {}",
                performance.alpha
            )));
        }
        for (name, value) in [
            (
                "performance.decay_interval_seconds",
                performance.decay_interval_seconds,
            ),
            (
                "performance.success_horizon_seconds",
                performance.success_horizon_seconds,
            ),
            (
                "failover.probe_interval_seconds",
                self.failover.probe_interval_seconds,
            ),
            (
                "failover.probe_timeout_seconds",
                self.failover.probe_timeout_seconds,
            ),
            (
                "failover.recovery_window_seconds",
                self.failover.recovery_window_seconds,
            ),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "Configuration error: {} must be greater than 0",
                    name
                )));
            }
        }
        if performance.success_window == 0 {
            return Err(AppError::Config(
                "Configuration error: performance.success_window must be greater than 0"
                    .to_string(),
            ));
        }
        if self.failover.failure_threshold == 0 {
            return Err(AppError::Config(
                "Configuration error: failover.failure_threshold must be greater than 0"
                    .to_string(),
            ));
        }
        for (name, value) in [
            ("switch.cooldown_seconds", self.switch.cooldown_seconds),
            ("switch.delay_seconds", self.switch.delay_seconds),
        ] {
            if value > MAX_SWITCH_WINDOW_SECONDS {
                return Err(AppError::Config(format!(
                    "Configuration error: {} must be at most {}, got {}",
                    name, MAX_SWITCH_WINDOW_SECONDS, value
                )));
            }
        }
        if self.switch.history_capacity == 0 {
            return Err(AppError::Config(
                "Configuration error: switch.history_capacity must be greater than 0".to_string(),
            ));
        }

        let steps = &self.failover.ramp_steps;
        if steps.is_empty() {
            return Err(AppError::Config(
                "Configuration error: failover.ramp_steps must not be empty".to_string(),
            ));
        }
        for step in steps {
            if !step.is_finite() || *step <= 0.0 || *step > 1.0 {
                return Err(AppError::Config(format!(
                    "Configuration error: failover.ramp_steps entry {} must be within (0, 1]",
                    step
                )));
            }
        }
        if steps.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AppError::Config(format!(
                "Configuration error: failover.ramp_steps must be strictly increasing, got {:?}",
                steps
            )));
        }
        if steps.last().copied() != Some(1.0) {
            return Err(AppError::Config(format!(
                "Configuration error: failover.ramp_steps must end at 1.0, got {:?}",
                steps
            )));
        }
        Ok(())
    }

    fn validate_providers(&self) -> AppResult<()> {
        let mut provider_ids = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(AppError::Config(
                    "Configuration error: provider id must not be empty".to_string(),
                ));
            }
            if !provider_ids.insert(provider.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Configuration error: duplicate provider id '{}'",
                    provider.id
                )));
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "Configuration error: Provider '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    provider.id, provider.base_url
                )));
            }
            if !provider.weight.is_finite() || provider.weight < 0.0 {
                return Err(AppError::Config(format!(
                    "Configuration error: Provider '{}' has invalid weight {}. \
                    Weight must be a non-negative finite number.",
                    provider.id, provider.weight
                )));
            }

            let mut model_ids = HashSet::new();
            for model in &provider.models {
                if !model_ids.insert(model.id.as_str()) {
                    return Err(AppError::Config(format!(
                        "Configuration error: model '{}' is listed twice for provider '{}'",
                        model.id, provider.id
                    )));
                }
                if !model.weight.is_finite() || model.weight < 0.0 {
                    return Err(AppError::Config(format!(
                        "Configuration error: Model '{}/{}' has invalid weight {}. \
                        Weight must be a non-negative finite number.",
                        provider.id, model.id, model.weight
                    )));
                }
                if let Some(ceiling) = model.max_complexity {
                    if !ceiling.is_finite() || !(0.0..=100.0).contains(&ceiling) {
                        return Err(AppError::Config(format!(
                            "Configuration error: Model '{}/{}' has max_complexity {} outside [0, 100]",
                            provider.id, model.id, ceiling
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_default_target(&self) -> AppResult<()> {
        let routing = &self.routing;
        match (&routing.default_provider, &routing.default_model) {
            (None, None) => Ok(()),
            (None, Some(model)) => Err(AppError::Config(format!(
                "Configuration error: routing.default_model '{}' requires routing.default_provider",
                model
            ))),
            (Some(provider_id), model_id) => {
                let Some(provider) = self.providers.iter().find(|p| &p.id == provider_id) else {
                    return Err(AppError::Config(format!(
                        "Configuration error: routing.default_provider '{}' is not a configured provider",
                        provider_id
                    )));
                };
                if let Some(model_id) = model_id {
                    if !provider.models.iter().any(|m| &m.id == model_id) {
                        return Err(AppError::Config(format!(
                            "Configuration error: routing.default_model '{}' is not served by provider '{}'",
                            model_id, provider_id
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        // Validate config before returning
        config.validate()?;
        Ok(config)
    }
}
