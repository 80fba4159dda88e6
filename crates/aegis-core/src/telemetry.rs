//! Tracing bootstrap for hosts embedding the cache client.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the host's decision. Hosts without their own subscriber can call
//! [`init_tracing`] once at startup.

#[cfg(feature = "subscriber")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use serde::{Deserialize, Serialize};

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,aegis=debug";

/// Tracing subscriber configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter directive (`EnvFilter` syntax). `RUST_LOG` wins when set.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Builds a config that logs everything at `level`.
    #[must_use]
    pub fn with_level(level: &str) -> Self {
        Self {
            filter: level.to_lowercase(),
            json: false,
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Returns `false` when a subscriber was already installed, which is not an
/// error: tests and hosts commonly race to initialize logging.
#[cfg(feature = "subscriber")]
pub fn init_tracing(config: &TracingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    match installed {
        Ok(()) => {
            tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}

/// Placeholder for when the subscriber feature is disabled.
#[cfg(not(feature = "subscriber"))]
pub fn init_tracing(_config: &TracingConfig) -> bool {
    false
}
