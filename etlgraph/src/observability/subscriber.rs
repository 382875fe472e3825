//! Subscriber installation.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::errors::{EtlGraphError, Result};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "etlgraph=info";

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs a human-readable subscriber as the global default.
///
/// `RUST_LOG` takes precedence over `default_filter`.
///
/// # Errors
///
/// Returns a configuration error if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|err| EtlGraphError::Config(format!("failed to install subscriber: {err}")))
}

/// Installs a JSON-lines subscriber as the global default.
///
/// # Errors
///
/// Returns a configuration error if a global subscriber is already set.
pub fn init_json_tracing(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
        .try_init()
        .map_err(|err| EtlGraphError::Config(format!("failed to install subscriber: {err}")))
}
