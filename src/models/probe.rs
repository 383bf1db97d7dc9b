//! Provider health probes

use crate::models::catalog::ProviderRecord;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Result of probing one provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub latency_ms: f64,
}

impl ProbeOutcome {
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            healthy: true,
            latency_ms,
        }
    }

    pub fn unhealthy(latency_ms: f64) -> Self {
        Self {
            healthy: false,
            latency_ms,
        }
    }
}

/// Checks whether a provider is reachable
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, provider: &ProviderRecord) -> ProbeOutcome;
}

/// Prober issuing `HEAD {base_url}/models`
///
/// Any 2xx response is healthy. Transport errors and other statuses are not.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a prober whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, provider: &ProviderRecord) -> ProbeOutcome {
        // base_url already includes the API prefix (e.g., "http://host:port/v1")
        let url = format!("{}/models", provider.base_url.trim_end_matches('/'));
        let started = Instant::now();

        match self.client.head(&url).send().await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let healthy = response.status().is_success();
                tracing::debug!(
                    provider_id = %provider.id,
                    url = %url,
                    status = %response.status(),
                    healthy,
                    "Provider probe completed"
                );
                ProbeOutcome {
                    healthy,
                    latency_ms,
                }
            }
            Err(e) => {
                tracing::debug!(
                    provider_id = %provider.id,
                    url = %url,
                    error = %e,
                    "Provider probe failed"
                );
                ProbeOutcome::unhealthy(started.elapsed().as_secs_f64() * 1000.0)
            }
        }
    }
}
