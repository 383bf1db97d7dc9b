//! Provider catalog, health and performance state
//!
//! Everything the routing agent reads while scoring lives here as locally
//! cached, keyed state.

pub mod catalog;
pub mod health;
pub mod load;
pub mod performance;
pub mod probe;

pub use catalog::{
    CandidateKey, CatalogError, CatalogSnapshot, CatalogSource, ModelRecord, ProviderRecord,
    StaticCatalog,
};
pub use health::{FailoverSettings, FailoverState, FailoverStatus, FailoverSupervisor};
pub use load::{InflightGuard, LoadTracker};
pub use performance::{Observation, PerformanceScore, PerformanceTracker, TrackerSettings};
pub use probe::{HttpProber, ProbeOutcome, Prober};
