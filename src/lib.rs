//! Switchyard - routing core for an LLM API gateway
//!
//! Decides which (provider, model) pair serves each request. Provider
//! performance is scored from observed outcomes, failing providers are
//! withdrawn and ramped back gradually, custom rules can narrow the choice,
//! and a guarded switch turns intelligent routing on and off.

pub mod cli;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod router;
pub mod store;
pub mod telemetry;
