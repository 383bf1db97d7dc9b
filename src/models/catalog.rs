//! Provider and model catalog
//!
//! The Provider Agent owns provider/model records. The routing core keeps a
//! read-only snapshot of them, refreshed periodically from a `CatalogSource`.

use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Upstream provider as published by the Provider Agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub base_url: String,
    pub weight: f64,
    pub priority: i32,
    pub active: bool,
}

/// Model served by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub context_window: u32,
    pub priority: i32,
    pub weight: f64,
    pub active: bool,
    /// Highest request complexity (0..100) this model is declared fit for
    #[serde(default)]
    pub max_complexity: Option<f64>,
}

/// Identity of a routable (provider, model) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateKey {
    pub provider_id: String,
    pub model_id: String,
}

impl CandidateKey {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl From<&ModelRecord> for CandidateKey {
    fn from(model: &ModelRecord) -> Self {
        Self::new(model.provider_id.clone(), model.model_id.clone())
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// Point-in-time view of every provider and model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub providers: Vec<ProviderRecord>,
    pub models: Vec<ModelRecord>,
}

impl CatalogSnapshot {
    pub fn new(providers: Vec<ProviderRecord>, models: Vec<ModelRecord>) -> Self {
        Self { providers, models }
    }

    /// Look up a provider by id
    pub fn provider(&self, provider_id: &str) -> Option<&ProviderRecord> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    /// Every (provider, model) pair where both records are active
    pub fn active_pairs(&self) -> impl Iterator<Item = (&ProviderRecord, &ModelRecord)> {
        self.models.iter().filter(|m| m.active).filter_map(|m| {
            self.provider(&m.provider_id)
                .filter(|p| p.active)
                .map(|p| (p, m))
        })
    }

    /// Look up an active pair by key
    pub fn active_pair(&self, key: &CandidateKey) -> Option<(&ProviderRecord, &ModelRecord)> {
        self.active_pairs()
            .find(|(p, m)| p.id == key.provider_id && m.model_id == key.model_id)
    }

    /// Whether the snapshot has no providers at all
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Error returned when the catalog cannot be fetched
#[derive(Debug, Error)]
#[error("catalog refresh failed: {0}")]
pub struct CatalogError(pub String);

/// Supplier of provider/model snapshots (the Provider Agent contract)
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError>;
}

/// Catalog served from the `[[providers]]` section of the config file
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    snapshot: Arc<CatalogSnapshot>,
}

impl StaticCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
        }
    }

    /// Build the catalog from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.catalog_snapshot())
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        Ok(self.snapshot.as_ref().clone())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn provider(id: &str) -> ProviderRecord {
        ProviderRecord {
            id: id.to_string(),
            kind: "openai".to_string(),
            base_url: format!("http://{id}.local/v1"),
            weight: 1.0,
            priority: 1,
            active: true,
        }
    }

    pub fn model(provider_id: &str, model_id: &str, weight: f64) -> ModelRecord {
        ModelRecord {
            model_id: model_id.to_string(),
            provider_id: provider_id.to_string(),
            name: None,
            context_window: 8192,
            priority: 1,
            weight,
            active: true,
            max_complexity: None,
        }
    }
}
