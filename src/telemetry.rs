//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use crate::config::LogFormat;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Build the filter used when `RUST_LOG` is not set
fn default_directives(level: &str) -> String {
    format!("switchyard={},tower_http=debug", level)
}

/// Install the global tracing subscriber
///
/// Only the first call per process installs a subscriber; later calls are
/// ignored. `RUST_LOG` takes precedence over `default_level`.
///
/// # Examples
///
/// ```no_run
/// use switchyard::config::LogFormat;
///
/// switchyard::telemetry::init("info", LogFormat::Json);
/// tracing::info!(provider_id = "openai", "Gateway started");
/// ```
pub fn init(default_level: &str, format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));
        let registry = tracing_subscriber::registry().with(filter);

        match format {
            LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_target(true),
                )
                .init(),
        }
    });
}
